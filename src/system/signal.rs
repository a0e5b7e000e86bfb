//! Signal numbers and their names.
use std::borrow::Cow;

use libc::c_int;

pub type SignalNumber = c_int;

macro_rules! define_consts {
    ($($signal:ident,)*) => {
        pub mod consts {
            pub use libc::{$($signal,)*};
        }

        pub(crate) fn signal_name(signal: SignalNumber) -> Option<&'static str> {
            match signal {
                $(consts::$signal => Some(stringify!($signal)),)*
                _ => None,
            }
        }
    };
}

define_consts! {
    SIGINT,
    SIGQUIT,
    SIGTERM,
    SIGHUP,
    SIGALRM,
    SIGPIPE,
    SIGUSR1,
    SIGUSR2,
    SIGCHLD,
    SIGCONT,
    SIGKILL,
    SIGSTOP,
    SIGSEGV,
    SIGABRT,
}

pub(crate) fn signal_fmt(signal: SignalNumber) -> Cow<'static, str> {
    signal_name(signal)
        .map(|name| name.into())
        .unwrap_or_else(|| format!("unknown signal #{}", signal).into())
}
