use std::path::PathBuf;

/// Where the output written by the child to one of its streams ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectMode {
    /// Not touched, the child inherits the stream from this process.
    None,
    /// Captured in memory.
    #[default]
    Memory,
    /// Written to a file.
    File,
    /// Written to a file and captured in memory.
    Both,
}

/// The destination of a child's stdout or stderr.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Redirect {
    pub mode: RedirectMode,
    pub path: Option<PathBuf>,
}

impl Redirect {
    pub fn to_file(path: impl Into<PathBuf>, mode: RedirectMode) -> Self {
        Self {
            mode,
            path: Some(path.into()),
        }
    }

    /// The file the stream is written to, if the mode writes to one.
    pub fn file(&self) -> Option<&PathBuf> {
        match self.mode {
            RedirectMode::File | RedirectMode::Both => self.path.as_ref(),
            RedirectMode::None | RedirectMode::Memory => None,
        }
    }

    /// Whether the data has to flow through a pipe we read from.
    pub(crate) fn needs_pipe(&self, has_callback: bool) -> bool {
        match self.mode {
            RedirectMode::Memory | RedirectMode::Both => true,
            RedirectMode::None => has_callback,
            // a file without a path falls back to inheriting the stream
            RedirectMode::File => has_callback,
        }
    }

    /// Whether the data read from the pipe is kept in memory.
    pub(crate) fn captures(&self) -> bool {
        matches!(self.mode, RedirectMode::Memory | RedirectMode::Both)
    }
}

/// What the child reads from its stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdinSource {
    /// These bytes, fed through a pipe. The child sees end-of-file afterwards.
    Buffer(Vec<u8>),
    /// A file opened directly by the child.
    File(PathBuf),
}

impl Default for StdinSource {
    fn default() -> Self {
        StdinSource::Buffer(Vec::new())
    }
}

/// One of the output streams of a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub(crate) const fn name(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}
