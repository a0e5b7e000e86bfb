use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use super::{
    redirect::{Redirect, StdinSource, Stream},
    terminate::TerminationPolicy,
};
use crate::common::Environment;

/// Called with every chunk read from a child's output pipe, from the thread running the child.
pub type OutputCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Everything that is decided before a command is launched.
///
/// A copy is taken for each execution, so changing the configuration of a handle never affects
/// a command that is already running.
#[derive(Clone)]
pub struct ExecConfig {
    pub working_directory: Option<PathBuf>,
    /// Overall limit on the run time of a command. `None` lets it run forever.
    pub timeout: Option<Duration>,
    /// Variables set on top of the environment inherited from this process.
    pub environment: Environment,
    /// Keep the output of streams in memory or both mode. Callbacks and files are unaffected.
    pub capture_output: bool,
    pub stdin: StdinSource,
    pub stdout: Redirect,
    pub stderr: Redirect,
    pub stdout_callback: Option<OutputCallback>,
    pub stderr_callback: Option<OutputCallback>,
    pub termination: TerminationPolicy,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            working_directory: None,
            timeout: None,
            environment: Environment::new(),
            capture_output: true,
            stdin: StdinSource::default(),
            stdout: Redirect::default(),
            stderr: Redirect::default(),
            stdout_callback: None,
            stderr_callback: None,
            termination: TerminationPolicy::default(),
        }
    }
}

impl ExecConfig {
    pub fn redirect(&self, stream: Stream) -> &Redirect {
        match stream {
            Stream::Stdout => &self.stdout,
            Stream::Stderr => &self.stderr,
        }
    }

    pub fn callback(&self, stream: Stream) -> Option<&OutputCallback> {
        match stream {
            Stream::Stdout => self.stdout_callback.as_ref(),
            Stream::Stderr => self.stderr_callback.as_ref(),
        }
    }
}

impl fmt::Debug for ExecConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecConfig")
            .field("working_directory", &self.working_directory)
            .field("timeout", &self.timeout)
            .field("environment", &self.environment)
            .field("capture_output", &self.capture_output)
            .field("stdin", &self.stdin)
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .field("stdout_callback", &self.stdout_callback.is_some())
            .field("stderr_callback", &self.stderr_callback.is_some())
            .field("termination", &self.termination)
            .finish()
    }
}
