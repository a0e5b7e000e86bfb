//! Running shell commands as supervised child processes.
mod buffer_pool;
mod config;
mod handle;
mod io_loop;
mod launch;
mod redirect;
mod state;
mod status;
mod terminate;

pub use buffer_pool::{BufferPool, PooledBuffer};
pub use config::{ExecConfig, OutputCallback};
pub use handle::{ProcessController, ProcessHandle};
pub use redirect::{Redirect, RedirectMode, StdinSource, Stream};
pub use status::Status;
pub use terminate::TerminationPolicy;
