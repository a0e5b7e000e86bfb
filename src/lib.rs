//! Supervised execution of shell commands.
//!
//! A [`ProcessHandle`] runs a command line through `/bin/sh -c`, feeds its stdin, collects its
//! stdout and stderr in memory, in files or through callbacks, enforces a timeout and stops the
//! command with a graceful signal that escalates to a forced one.
pub(crate) mod cli;
pub(crate) mod common;
pub(crate) mod cutils;
pub mod defaults;
pub(crate) mod exec;
pub mod log;
pub(crate) mod system;

pub use common::{Environment, Error, ErrorKind};
pub use exec::{
    BufferPool, ExecConfig, OutputCallback, PooledBuffer, ProcessController, ProcessHandle,
    Redirect, RedirectMode, StdinSource, Status, Stream, TerminationPolicy,
};
pub use system::signal::{consts as signals, SignalNumber};

pub use cli::main as shexec_main;
