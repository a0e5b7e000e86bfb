use std::io;

use libc::{c_int, WEXITSTATUS, WIFEXITED, WIFSIGNALED, WNOHANG, WTERMSIG};

use crate::cutils::cerr;
use crate::system::signal::signal_name;
use crate::{system::interface::ProcessId, system::signal::SignalNumber};

mod sealed {
    pub(crate) trait Sealed {}

    impl Sealed for crate::system::interface::ProcessId {}
}

pub(crate) trait Wait: sealed::Sealed {
    /// Wait for a process to change state.
    ///
    /// Calling this function will block until a child specified by the given process ID has
    /// changed state. This can be configured further using [`WaitOptions`].
    fn wait(self, options: WaitOptions) -> Result<(ProcessId, WaitStatus), WaitError>;
}

impl Wait for ProcessId {
    fn wait(self, options: WaitOptions) -> Result<(ProcessId, WaitStatus), WaitError> {
        let mut status: c_int = 0;

        let pid = loop {
            // SAFETY: `status` is a valid pointer for the duration of the call.
            match cerr(unsafe { libc::waitpid(self.get(), &mut status, options.flags) }) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.raw_os_error() == Some(libc::ECHILD) => {
                    return Err(WaitError::NoChild)
                }
                Err(err) => return Err(WaitError::Io(err)),
                Ok(pid) => break pid,
            }
        };

        if pid == 0 && options.flags & WNOHANG != 0 {
            return Err(WaitError::NotReady);
        }

        Ok((ProcessId::new(pid), WaitStatus { status }))
    }
}

/// Error values returned when [`Wait::wait`] fails.
#[derive(Debug)]
pub(crate) enum WaitError {
    // No children were in a waitable state.
    //
    // This is only returned if the [`WaitOptions::no_hang`] option is used.
    NotReady,
    // The process is not (or no longer) a child of this process, it was already reaped.
    NoChild,
    // Regular I/O error.
    Io(io::Error),
}

/// Options to configure how [`Wait::wait`] waits for children.
pub(crate) struct WaitOptions {
    flags: c_int,
}

impl WaitOptions {
    /// Only wait for terminated children.
    pub(crate) const fn new() -> Self {
        Self { flags: 0 }
    }

    /// Return immediately if no child has exited.
    pub(crate) const fn no_hang(mut self) -> Self {
        self.flags |= WNOHANG;
        self
    }
}

/// The status of the waited child.
#[derive(Clone, Copy)]
pub(crate) struct WaitStatus {
    status: c_int,
}

impl std::fmt::Debug for WaitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(exit_status) = self.exit_status() {
            write!(f, "ExitStatus({exit_status})")
        } else if let Some(signal) = self.term_signal() {
            match signal_name(signal) {
                Some(name) => write!(f, "TermSignal({name})"),
                None => write!(f, "TermSignal({signal})"),
            }
        } else {
            write!(f, "Unknown")
        }
    }
}

impl WaitStatus {
    /// Return the exit status of the child if the child terminated normally.
    pub(crate) const fn exit_status(&self) -> Option<c_int> {
        if WIFEXITED(self.status) {
            Some(WEXITSTATUS(self.status))
        } else {
            None
        }
    }

    /// Return the signal number which caused the child to terminate if the child was terminated by
    /// a signal.
    pub(crate) const fn term_signal(&self) -> Option<SignalNumber> {
        if WIFSIGNALED(self.status) {
            Some(WTERMSIG(self.status))
        } else {
            None
        }
    }

    /// The code a shell would report for this status: the exit status, or `128 + signal` for a
    /// child killed by a signal.
    pub(crate) const fn return_code(&self) -> c_int {
        if let Some(code) = self.exit_status() {
            code
        } else if let Some(signal) = self.term_signal() {
            128 + signal
        } else {
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use libc::SIGKILL;

    use crate::system::{
        interface::ProcessId,
        kill,
        wait::{Wait, WaitError, WaitOptions},
    };

    #[test]
    fn exit_status() {
        let command = std::process::Command::new("sh")
            .args(["-c", "sleep 0.1; exit 42"])
            .spawn()
            .unwrap();

        let command_pid = ProcessId::new(command.id() as i32);

        let (pid, status) = command_pid.wait(WaitOptions::new()).unwrap();
        assert_eq!(command_pid, pid);
        assert_eq!(status.exit_status(), Some(42));
        assert_eq!(status.return_code(), 42);
        assert!(status.term_signal().is_none());

        // Waiting when there are no children should fail.
        let Err(WaitError::NoChild) = command_pid.wait(WaitOptions::new()) else {
            panic!("waiting twice for the same child should report `NoChild`");
        };
    }

    #[test]
    fn killed_by_signal() {
        let command = std::process::Command::new("sh")
            .args(["-c", "sleep 10"])
            .spawn()
            .unwrap();

        let command_pid = ProcessId::new(command.id() as i32);

        kill(command_pid, SIGKILL).unwrap();

        let (pid, status) = command_pid.wait(WaitOptions::new()).unwrap();
        assert_eq!(command_pid, pid);
        assert_eq!(status.term_signal(), Some(SIGKILL));
        assert!(status.exit_status().is_none());
        assert_eq!(status.return_code(), 128 + SIGKILL);
    }

    #[test]
    fn no_hang() {
        let command = std::process::Command::new("sh")
            .args(["-c", "sleep 0.1; exit 42"])
            .spawn()
            .unwrap();

        let command_pid = ProcessId::new(command.id() as i32);

        let mut count = 0;
        let (pid, status) = loop {
            match command_pid.wait(WaitOptions::new().no_hang()) {
                Ok(ok) => break ok,
                Err(WaitError::NotReady) => count += 1,
                Err(err) => panic!("{err:?}"),
            }
        };

        assert_eq!(command_pid, pid);
        assert_eq!(status.exit_status(), Some(42));
        assert!(count > 0);
    }
}
