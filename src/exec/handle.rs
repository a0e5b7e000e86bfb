use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use super::{
    config::{ExecConfig, OutputCallback},
    io_loop,
    redirect::{Redirect, RedirectMode, StdinSource},
    state::Shared,
    status::Status,
    terminate::TerminationPolicy,
};
use crate::{
    common::{Environment, ErrorKind},
    defaults::{PID_WAIT_TIMEOUT, TERMINATION_CHECK_INTERVAL, WORKER_JOIN_TIMEOUT},
    log::{dev_debug, exec_error, exec_warn},
    system::process_named_exists,
};

/// Runs shell commands as child processes and keeps track of one execution at a time.
///
/// Configure the handle with the setters, then call [`execute`](Self::execute) to run a command
/// to completion or [`execute_async`](Self::execute_async) to run it on a worker thread. The
/// results of the last execution stay available until the next one starts.
///
/// ```no_run
/// use shexec::{ProcessHandle, Status};
///
/// let mut handle = ProcessHandle::new();
/// handle.execute("echo hello");
/// assert_eq!(handle.get_status(), Status::Finished);
/// assert_eq!(handle.get_stdout(), "hello");
/// ```
///
/// Dropping a handle while its command still runs kills the command. The drop waits a bounded
/// time for the worker thread and leaves it to a detached thread after that.
#[derive(Debug, Default)]
pub struct ProcessHandle {
    config: ExecConfig,
    command: String,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ProcessHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ExecConfig) -> Self {
        Self {
            config,
            command: String::new(),
            shared: Arc::default(),
            worker: None,
        }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Feed `data` to the command's stdin, followed by end-of-file.
    pub fn set_stdin(&mut self, data: impl Into<Vec<u8>>) {
        self.config.stdin = StdinSource::Buffer(data.into());
    }

    /// Let the command read its stdin from a file. Replaces any data set with `set_stdin`.
    pub fn set_stdin_file(&mut self, path: impl Into<PathBuf>) {
        self.config.stdin = StdinSource::File(path.into());
    }

    pub fn set_stdout_file(&mut self, path: impl Into<PathBuf>, mode: RedirectMode) {
        self.config.stdout = Redirect::to_file(path, mode);
    }

    pub fn set_stderr_file(&mut self, path: impl Into<PathBuf>, mode: RedirectMode) {
        self.config.stderr = Redirect::to_file(path, mode);
    }

    pub fn set_stdout_redirect(&mut self, redirect: Redirect) {
        self.config.stdout = redirect;
    }

    pub fn set_stderr_redirect(&mut self, redirect: Redirect) {
        self.config.stderr = redirect;
    }

    pub fn set_working_directory(&mut self, dir: impl Into<PathBuf>) {
        self.config.working_directory = Some(dir.into());
    }

    /// Limit the run time of commands. A zero duration removes the limit.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = (!timeout.is_zero()).then_some(timeout);
    }

    /// Time a command gets to exit after the graceful signal before it is killed.
    pub fn set_graceful_termination_timeout(&mut self, timeout: Duration) {
        self.config.termination.graceful_timeout = timeout;
    }

    pub fn set_termination_policy(&mut self, policy: TerminationPolicy) {
        self.config.termination = policy;
    }

    /// Replace the whole environment overlay.
    pub fn set_environment(&mut self, environment: Environment) {
        self.config.environment = environment;
    }

    pub fn set_environment_variable(
        &mut self,
        key: impl Into<OsString>,
        value: impl Into<OsString>,
    ) {
        self.config.environment.insert(key.into(), value.into());
    }

    pub fn set_capture_output(&mut self, capture: bool) {
        self.config.capture_output = capture;
    }

    pub fn set_stdout_callback(&mut self, callback: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.config.stdout_callback = Some(Arc::new(callback) as OutputCallback);
    }

    pub fn set_stderr_callback(&mut self, callback: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.config.stderr_callback = Some(Arc::new(callback) as OutputCallback);
    }

    /// Join the worker of a finished execution. Returns `false` if an execution is still in
    /// progress.
    ///
    /// Once `done` is open the worker is only returning, so joining it does not block for long.
    fn reap_worker(&mut self) -> bool {
        match self.worker.take() {
            None => true,
            Some(worker) if self.shared.done.is_open() || worker.is_finished() => {
                if worker.join().is_err() {
                    exec_error!("worker thread panicked");
                }
                true
            }
            Some(worker) => {
                self.worker = Some(worker);
                false
            }
        }
    }

    /// Prepare a new execution, unless one is still running.
    fn start(&mut self, command: String) -> bool {
        if !self.reap_worker() {
            exec_warn!("cannot run '{command}' while '{}' is running", self.command);
            self.shared.last_error.store(ErrorKind::InvalidState);
            return false;
        }

        self.command = command;
        self.shared.begin();
        true
    }

    /// Run `command` and return once it finished, timed out, was terminated or failed to launch.
    ///
    /// Failures are not returned but reflected in [`get_status`](Self::get_status) and
    /// [`get_last_error`](Self::get_last_error).
    pub fn execute(&mut self, command: impl Into<String>) {
        if self.start(command.into()) {
            io_loop::run(&self.shared, &self.config, &self.command);
        }
    }

    /// Start `command` on a worker thread and return once its pid is known.
    pub fn execute_async(&mut self, command: impl Into<String>) {
        if !self.start(command.into()) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let command = self.command.clone();

        let spawned = thread::Builder::new()
            .name("shexec-worker".into())
            .spawn(move || io_loop::run(&shared, &config, &command));

        match spawned {
            Ok(worker) => self.worker = Some(worker),
            Err(err) => {
                exec_error!("cannot start worker thread: {err}");
                self.shared.fail_launch(ErrorKind::SystemError);
                self.shared.done.open();
                return;
            }
        }

        if !self.wait_for_pid(PID_WAIT_TIMEOUT) && self.shared.is_running() {
            exec_warn!("no pid for '{}' after {PID_WAIT_TIMEOUT:?}", self.command);
        }
    }

    /// Block until the pid of the current execution is known, for at most `timeout`.
    ///
    /// Returns `false` if the command failed to launch.
    pub fn wait_for_pid(&self, timeout: Duration) -> bool {
        self.shared.pid_ready.wait_timeout(timeout) && self.shared.pid().is_some()
    }

    /// Block until an asynchronous execution is over.
    pub fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                exec_error!("worker thread panicked");
            }
        }
    }

    /// Block until an asynchronous execution is over, for at most `timeout`. Returns whether it
    /// is over.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        match self.worker {
            Some(_) => self.shared.done.wait_timeout(timeout),
            None => true,
        }
    }

    /// Stop the running command, see [`ProcessController::terminate`].
    pub fn terminate(&self, force: bool) -> bool {
        self.controller().terminate(force)
    }

    /// A handle for watching or stopping the current execution from another thread.
    pub fn controller(&self) -> ProcessController {
        ProcessController {
            shared: Arc::clone(&self.shared),
            policy: self.config.termination,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Returns `true` once an execution reached its final state and released its resources.
    ///
    /// A handle that never executed anything is not finished, this returns `false` until the
    /// first execution is over.
    pub fn is_finished(&self) -> bool {
        self.shared.done.is_open()
    }

    /// Captured stdout of the last execution, with one trailing newline removed.
    pub fn get_stdout(&self) -> String {
        String::from_utf8_lossy(&self.shared.output().stdout).into_owned()
    }

    /// Captured stderr of the last execution, with one trailing newline removed.
    pub fn get_stderr(&self) -> String {
        String::from_utf8_lossy(&self.shared.output().stderr).into_owned()
    }

    /// The exit code, `128 + signal` for a child killed by a signal, or `-1` if unknown.
    pub fn get_return_code(&self) -> i32 {
        self.shared.return_code()
    }

    /// The pid of the last launched child, `0` if none was launched.
    pub fn get_pid(&self) -> i32 {
        self.shared.raw_pid()
    }

    pub fn get_status(&self) -> Status {
        self.shared.status.load()
    }

    pub fn get_last_error(&self) -> ErrorKind {
        self.shared.last_error.load()
    }

    pub fn get_error_message(&self) -> String {
        self.get_last_error().to_string()
    }

    pub fn get_command(&self) -> &str {
        &self.command
    }

    pub fn get_working_directory(&self) -> Option<&Path> {
        self.config.working_directory.as_deref()
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.config.timeout
    }

    /// Returns `true` if a process named exactly `name` is running on this system.
    pub fn check_process_running(name: &str) -> bool {
        process_named_exists(name)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        if self.shared.is_running() {
            dev_debug!("dropping handle of running '{}'", self.command);
            self.shared.termination.request(true);
        }

        let budget = self.config.termination.forced_timeout + WORKER_JOIN_TIMEOUT;
        if self.shared.done.wait_timeout(budget) {
            if worker.join().is_err() {
                exec_error!("worker thread panicked");
            }
        } else {
            exec_warn!("'{}' did not stop in time, detaching", self.command);
            let detached = thread::Builder::new()
                .name("shexec-reaper".into())
                .spawn(move || {
                    let _ = worker.join();
                });
            if let Err(err) = detached {
                exec_error!("cannot detach worker: {err}");
            }
        }
    }
}

/// Watches and stops the execution of a [`ProcessHandle`] from any thread.
#[derive(Debug, Clone)]
pub struct ProcessController {
    shared: Arc<Shared>,
    policy: TerminationPolicy,
}

impl ProcessController {
    /// Ask the running command to stop and wait until it did.
    ///
    /// Unless `force` is set the command first gets the graceful signal and is only killed when
    /// it outlives the graceful timeout. Returns `true` right away if nothing is running, and
    /// `false` if the termination did not complete in time.
    pub fn terminate(&self, force: bool) -> bool {
        if self.shared.pid().is_none() || !self.shared.is_running() {
            return true;
        }

        self.shared.termination.request(force);

        let budget = self.policy.graceful_timeout
            + self.policy.forced_timeout
            + TERMINATION_CHECK_INTERVAL * 10;
        self.shared.termination.wait_completed(budget)
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn get_pid(&self) -> i32 {
        self.shared.raw_pid()
    }

    pub fn get_status(&self) -> Status {
        self.shared.status.load()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        thread,
        time::{Duration, Instant},
    };

    use pretty_assertions::assert_eq;

    use super::ProcessHandle;
    use crate::{common::ErrorKind, exec::status::Status};

    #[test]
    fn fresh_handle() {
        let handle = ProcessHandle::new();
        assert_eq!(handle.get_status(), Status::NotStarted);
        assert_eq!(handle.get_return_code(), -1);
        assert_eq!(handle.get_pid(), 0);
        assert_eq!(handle.get_last_error(), ErrorKind::None);
        assert_eq!(handle.get_error_message(), "no error");
        assert!(!handle.is_running());
        assert!(!handle.is_finished());
        assert!(handle.terminate(false));
        assert!(handle.wait_for(Duration::ZERO));
    }

    #[test]
    fn setters_fill_config() {
        let mut handle = ProcessHandle::new();
        handle.set_timeout(Duration::from_millis(250));
        handle.set_working_directory("/tmp");
        handle.set_environment_variable("A", "1");
        assert_eq!(handle.get_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(
            handle.get_working_directory(),
            Some(std::path::Path::new("/tmp"))
        );
        assert_eq!(handle.config().environment.len(), 1);

        handle.set_timeout(Duration::ZERO);
        assert_eq!(handle.get_timeout(), None);
    }

    #[test]
    fn rejects_execute_while_running() {
        let mut handle = ProcessHandle::new();
        handle.execute_async("sleep 5");
        assert!(handle.is_running());
        let pid = handle.get_pid();

        handle.execute("echo nope");
        assert_eq!(handle.get_last_error(), ErrorKind::InvalidState);
        assert_eq!(handle.get_pid(), pid);
        assert_eq!(handle.get_command(), "sleep 5");

        assert!(handle.terminate(true));
        handle.wait();
        assert_eq!(handle.get_status(), Status::Terminated);
    }

    #[test]
    fn reusable_right_after_async_run() {
        let mut handle = ProcessHandle::new();
        for _ in 0..100 {
            handle.execute_async("true");
            assert!(handle.wait_for(Duration::from_secs(5)));
            assert!(handle.is_finished());

            handle.execute("echo again");
            assert_eq!(handle.get_last_error(), ErrorKind::None);
            assert_eq!(handle.get_status(), Status::Finished);
            assert_eq!(handle.get_stdout(), "again");
        }
    }

    #[test]
    fn panicking_callback_ends_async_run() {
        let mut handle = ProcessHandle::new();
        handle.set_stdout_callback(|chunk| {
            if !chunk.is_empty() {
                panic!("callback failed");
            }
        });
        handle.execute_async("echo hi; sleep 3; echo bye");
        handle.wait();

        assert_eq!(handle.get_status(), Status::Error);
        assert_eq!(handle.get_last_error(), ErrorKind::SystemError);
        assert!(handle.is_finished());
        assert!(!handle.is_running());
        assert!(unsafe { libc::kill(handle.get_pid(), 0) } == -1);

        // the handle is still usable afterwards
        handle.set_stdout_callback(|_| {});
        handle.execute("echo fine");
        assert_eq!(handle.get_status(), Status::Finished);
        assert_eq!(handle.get_stdout(), "fine");
    }

    #[test]
    fn controller_stops_synchronous_execution() {
        let mut handle = ProcessHandle::new();
        let controller = handle.controller();

        let stopper = thread::spawn(move || {
            while controller.get_pid() <= 0 || !controller.is_running() {
                thread::sleep(Duration::from_millis(5));
            }
            controller.terminate(false)
        });

        let start = Instant::now();
        handle.execute("sleep 5");
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(stopper.join().unwrap());
        assert_eq!(handle.get_status(), Status::Terminated);
        assert_eq!(handle.get_return_code(), 128 + libc::SIGTERM);
    }

    #[test]
    fn callback_sees_every_chunk() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut handle = ProcessHandle::new();
        {
            let seen = seen.clone();
            handle.set_stdout_callback(move |chunk| seen.lock().unwrap().extend_from_slice(chunk));
        }
        handle.set_capture_output(false);

        handle.execute("printf 'one\\ntwo\\n'");
        assert_eq!(handle.get_status(), Status::Finished);
        assert_eq!(handle.get_stdout(), "");
        assert_eq!(*seen.lock().unwrap(), b"one\ntwo\n");
    }

    #[test]
    fn drop_kills_running_command() {
        let mut handle = ProcessHandle::new();
        handle.execute_async("sleep 30");
        let pid = handle.get_pid();
        assert!(pid > 0);

        let start = Instant::now();
        drop(handle);
        assert!(start.elapsed() < Duration::from_secs(5));
        // reaped by the worker, so no longer signalable
        assert!(unsafe { libc::kill(pid, 0) } == -1);
    }
}
