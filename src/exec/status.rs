use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

use crate::common::ErrorKind;

/// The lifecycle of one execution.
///
/// Every execution leaves [`Status::Running`] for exactly one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Status {
    #[default]
    NotStarted = 0,
    Running,
    /// The command exited on its own.
    Finished,
    /// The command was stopped by a termination request.
    Terminated,
    /// The command ran longer than the configured timeout and was killed.
    Timeout,
    /// The command could not be launched, or waiting for it failed.
    Error,
}

impl Status {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Status::NotStarted,
            1 => Status::Running,
            2 => Status::Finished,
            3 => Status::Terminated,
            4 => Status::Timeout,
            _ => Status::Error,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::NotStarted | Status::Running)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::NotStarted => "not started",
            Status::Running => "running",
            Status::Finished => "finished",
            Status::Terminated => "terminated",
            Status::Timeout => "timed out",
            Status::Error => "error",
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub(crate) fn load(&self) -> Status {
        Status::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, status: Status) {
        self.0.store(status as u8, Ordering::Release);
    }

    /// Move from `Running` to the terminal state `status`. Returns `false`, leaving the status
    /// untouched, if the execution already reached a terminal state.
    pub(crate) fn finish(&self, status: Status) -> bool {
        debug_assert!(status.is_terminal());
        self.0
            .compare_exchange(
                Status::Running as u8,
                status as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[derive(Debug, Default)]
pub(crate) struct AtomicErrorKind(AtomicU8);

impl AtomicErrorKind {
    pub(crate) fn load(&self) -> ErrorKind {
        ErrorKind::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, kind: ErrorKind) {
        self.0.store(kind as u8, Ordering::Release);
    }
}
