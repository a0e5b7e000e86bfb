use std::{
    sync::{
        atomic::{AtomicI32, Ordering},
        Condvar, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use super::{
    redirect::Stream,
    status::{AtomicErrorKind, AtomicStatus, Status},
    terminate::TerminationRequest,
};
use crate::{common::ErrorKind, system::interface::ProcessId};

/// A one-shot gate threads can wait on with a timeout.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub(crate) fn open(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_all();
    }

    pub(crate) fn reset(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns whether the latch was opened within `timeout`.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |open| !*open)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

#[derive(Debug, Default)]
pub(crate) struct Output {
    pub(crate) stdout: Vec<u8>,
    pub(crate) stderr: Vec<u8>,
}

impl Output {
    pub(crate) fn stream_mut(&mut self, stream: Stream) -> &mut Vec<u8> {
        match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        }
    }
}

/// The state of an execution that is visible outside the thread running it.
#[derive(Debug)]
pub(crate) struct Shared {
    pid: AtomicI32,
    pub(crate) status: AtomicStatus,
    pub(crate) last_error: AtomicErrorKind,
    return_code: AtomicI32,
    pub(crate) termination: TerminationRequest,
    output: Mutex<Output>,
    /// Opened once the pid is known, or once launching failed.
    pub(crate) pid_ready: Latch,
    /// Opened when the execution reached a terminal state and released its resources.
    pub(crate) done: Latch,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            pid: AtomicI32::new(0),
            status: AtomicStatus::default(),
            last_error: AtomicErrorKind::default(),
            return_code: AtomicI32::new(-1),
            termination: TerminationRequest::default(),
            output: Mutex::default(),
            pid_ready: Latch::default(),
            done: Latch::default(),
        }
    }
}

impl Shared {
    /// Forget everything about a previous execution and mark a new one as running.
    pub(crate) fn begin(&self) {
        self.pid.store(0, Ordering::Release);
        self.last_error.store(ErrorKind::None);
        self.return_code.store(-1, Ordering::Release);
        self.termination.reset();
        *self.output() = Output::default();
        self.pid_ready.reset();
        self.done.reset();
        self.status.store(Status::Running);
    }

    pub(crate) fn pid(&self) -> Option<ProcessId> {
        let pid = ProcessId::new(self.pid.load(Ordering::Acquire));
        pid.is_valid().then_some(pid)
    }

    pub(crate) fn raw_pid(&self) -> i32 {
        self.pid.load(Ordering::Acquire)
    }

    pub(crate) fn publish_pid(&self, pid: ProcessId) {
        self.pid.store(pid.get(), Ordering::Release);
        self.pid_ready.open();
    }

    pub(crate) fn return_code(&self) -> i32 {
        self.return_code.load(Ordering::Acquire)
    }

    pub(crate) fn set_return_code(&self, code: i32) {
        self.return_code.store(code, Ordering::Release);
    }

    pub(crate) fn output(&self) -> MutexGuard<'_, Output> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a failure that prevented the command from being launched.
    pub(crate) fn fail_launch(&self, kind: ErrorKind) {
        self.last_error.store(kind);
        self.status.finish(Status::Error);
        self.pid_ready.open();
    }

    pub(crate) fn is_running(&self) -> bool {
        self.status.load() == Status::Running
    }
}
