use std::{fs, io};

use crate::cutils::cerr;
use interface::ProcessId;

use self::signal::SignalNumber;

// generalized traits for when we want to hide implementations
pub mod interface;

pub mod pipe;

pub mod poll;

pub mod signal;

pub(crate) mod wait;

pub(crate) fn _exit(status: libc::c_int) -> ! {
    unsafe { libc::_exit(status) }
}

pub(crate) enum ForkResult {
    // Parent process branch with the child process' PID.
    Parent(ProcessId),
    // Child process branch.
    Child,
}

/// Create a new process.
///
/// # Safety
///
/// In a multithreaded program, only async-signal-safe functions are guaranteed to work in the
/// child process until a call to `execve` or a similar function is done. In particular the child
/// must not allocate, take locks or run destructors.
pub(crate) unsafe fn fork() -> io::Result<ForkResult> {
    let pid = cerr(unsafe { libc::fork() })?;
    if pid == 0 {
        Ok(ForkResult::Child)
    } else {
        Ok(ForkResult::Parent(ProcessId::new(pid)))
    }
}

/// Send a signal to a process with the specified ID.
pub fn kill(pid: ProcessId, signal: SignalNumber) -> io::Result<()> {
    // SAFETY: This function cannot cause UB even if `pid` is not a valid process ID or if
    // `signal` is not a valid signal code.
    cerr(unsafe { libc::kill(pid.get(), signal) }).map(|_| ())
}

/// Send a signal to a process group with the specified ID.
pub fn killpg(pgid: ProcessId, signal: SignalNumber) -> io::Result<()> {
    // SAFETY: This function cannot cause UB even if `pgid` is not a valid process ID or if
    // `signal` is not a valid signal code.
    cerr(unsafe { libc::killpg(pgid.get(), signal) }).map(|_| ())
}

/// Set a process group ID.
pub fn setpgid(pid: ProcessId, pgid: ProcessId) -> io::Result<()> {
    cerr(unsafe { libc::setpgid(pid.get(), pgid.get()) }).map(|_| ())
}

/// Returns `true` if some running process has exactly the given command name.
///
/// The name is compared against `/proc/<pid>/comm`, which the kernel truncates to 15 bytes.
pub fn process_named_exists(name: &str) -> bool {
    const COMM_LEN: usize = 15;

    let Ok(entries) = fs::read_dir("/proc") else {
        return false;
    };

    let wanted = &name.as_bytes()[..name.len().min(COMM_LEN)];

    entries
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|s| s.bytes().all(|b| b.is_ascii_digit()))
        })
        .filter_map(|entry| fs::read(entry.path().join("comm")).ok())
        .any(|comm| comm.strip_suffix(b"\n").unwrap_or(&comm) == wanted)
}
