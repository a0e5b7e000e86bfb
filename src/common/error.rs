use std::{fmt, io};

/// The kind of the last failure observed by a [`ProcessHandle`](crate::ProcessHandle).
///
/// Failures are reported through `get_last_error` instead of being returned, callers inspect the
/// status after an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ErrorKind {
    #[default]
    None = 0,
    ForkFailed,
    PipeCreationFailed,
    ExecFailed,
    WorkingDirFailed,
    EnvSetupFailed,
    StdinWriteFailed,
    TerminationFailed,
    TimeoutExceeded,
    InvalidState,
    SystemError,
    InsufficientPrivileges,
    ResourceLimitExceeded,
}

impl ErrorKind {
    const ALL: [ErrorKind; 13] = [
        ErrorKind::None,
        ErrorKind::ForkFailed,
        ErrorKind::PipeCreationFailed,
        ErrorKind::ExecFailed,
        ErrorKind::WorkingDirFailed,
        ErrorKind::EnvSetupFailed,
        ErrorKind::StdinWriteFailed,
        ErrorKind::TerminationFailed,
        ErrorKind::TimeoutExceeded,
        ErrorKind::InvalidState,
        ErrorKind::SystemError,
        ErrorKind::InsufficientPrivileges,
        ErrorKind::ResourceLimitExceeded,
    ];

    pub(crate) fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(ErrorKind::SystemError)
    }

    /// Returns `true` unless this is [`ErrorKind::None`].
    pub fn is_error(self) -> bool {
        self != ErrorKind::None
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::None => "no error",
            ErrorKind::ForkFailed => "fork operation failed",
            ErrorKind::PipeCreationFailed => "pipe creation failed",
            ErrorKind::ExecFailed => "process execution failed",
            ErrorKind::WorkingDirFailed => "working directory change failed",
            ErrorKind::EnvSetupFailed => "environment setup failed",
            ErrorKind::StdinWriteFailed => "stdin write operation failed",
            ErrorKind::TerminationFailed => "process termination failed",
            ErrorKind::TimeoutExceeded => "process timeout exceeded",
            ErrorKind::InvalidState => "invalid process state",
            ErrorKind::SystemError => "system error occurred",
            ErrorKind::InsufficientPrivileges => "insufficient privileges for operation",
            ErrorKind::ResourceLimitExceeded => "resource limit exceeded",
        })
    }
}

/// A failure while preparing or launching a command, before any output was collected.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: io::Error,
}

impl Error {
    pub fn new(kind: ErrorKind, source: io::Error) -> Self {
        Self { kind, source }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Attach a kind to an I/O error, for use with `map_err`.
    pub(crate) fn with(kind: ErrorKind) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::new(kind, source)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.source)
    }
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Self::new(ErrorKind::SystemError, source)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::{Error, ErrorKind};

    #[test]
    fn u8_round_trip_covers_every_kind() {
        for (idx, kind) in ErrorKind::ALL.iter().enumerate() {
            assert_eq!(*kind as u8 as usize, idx);
            assert_eq!(ErrorKind::from_u8(*kind as u8), *kind);
        }
        assert_eq!(ErrorKind::from_u8(200), ErrorKind::SystemError);
    }

    #[test]
    fn display() {
        assert_eq!(ErrorKind::None.to_string(), "no error");
        assert!(!ErrorKind::None.is_error());
        assert!(ErrorKind::ForkFailed.is_error());

        let err = Error::with(ErrorKind::PipeCreationFailed)(io::Error::from_raw_os_error(
            libc::EMFILE,
        ));
        assert_eq!(err.kind(), ErrorKind::PipeCreationFailed);
        assert!(err.to_string().starts_with("pipe creation failed: "));
    }
}
