//! Tunables of the execution engine.
use std::time::Duration;

/// Exit code of a child that could not change directory, redirect its streams or exec the shell.
pub const EXEC_ERROR_CODE: i32 = 127;

/// Size of a single read from a child's output pipe.
pub const BUFFER_SIZE: usize = 8192;
/// Buffers kept around by the buffer pool; any released beyond this are freed.
pub const MAX_POOLED_BUFFERS: usize = 32;

/// Mode of files created for redirected output.
pub const FILE_PERMISSIONS: libc::mode_t = 0o644;

/// The shell every command is handed to, as `<SHELL> -c <command>`.
pub const SHELL: &str = "/bin/sh";

/// Longest readiness wait in a single main loop iteration.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(5);
/// Sleep inserted once the main loop has been idle for [`MAX_IDLE_CYCLES`] iterations.
pub const IDLE_SLEEP: Duration = Duration::from_millis(5);
pub const MAX_IDLE_CYCLES: u32 = 50;
/// Non-blocking reads attempted after the child exited, to collect what it left in the pipes.
pub const MAX_DRAIN_ATTEMPTS: u32 = 20;

/// How often the main loop looks at the termination request.
pub const TERMINATION_CHECK_INTERVAL: Duration = Duration::from_millis(10);
/// How often a terminating child is polled for having exited.
pub const TERMINATION_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long a child may take to die after the forced signal, and how long `terminate` waits for
/// the termination to be carried out.
pub const TERMINATION_TIMEOUT: Duration = Duration::from_millis(5000);
/// Time between the graceful signal and escalating to the forced one.
pub const GRACEFUL_TERMINATION_TIMEOUT: Duration = Duration::from_millis(2000);

/// Retry delay when the child's stdin pipe is full.
pub const STDIN_WRITE_RETRY: Duration = Duration::from_millis(5);

/// How long `execute_async` waits for the child's pid to be published.
pub const PID_WAIT_TIMEOUT: Duration = Duration::from_millis(10000);
/// Extra time granted to a worker after a forced termination before dropping a handle detaches it.
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_millis(2000);
