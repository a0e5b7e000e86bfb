#![forbid(unsafe_code)]
use std::{collections::HashMap, ffi::OsString};

pub use error::{Error, ErrorKind};

pub mod error;

/// Environment variables laid over the inherited environment of a command.
pub type Environment = HashMap<OsString, OsString>;
