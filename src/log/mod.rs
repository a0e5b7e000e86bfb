#![allow(unused_macros)]
use self::simple_logger::SimpleLogger;
use std::fmt;
use std::ops::Deref;

mod simple_logger;

macro_rules! logger_macro {
    ($name:ident is $rule_level:ident to $target:expr, $d:tt) => {
        macro_rules! $name {
            ($d($d arg:tt)+) => (::log::log!(target: $target, ::log::Level::$rule_level, $d($d arg)+));
        }

        pub(crate) use $name;
    };
    ($name:ident is $rule_level:ident to $target:expr) => {
        logger_macro!($name is $rule_level to $target, $);
    };
}

logger_macro!(exec_error is Error to "shexec::exec");
logger_macro!(exec_warn is Warn to "shexec::exec");
logger_macro!(exec_info is Info to "shexec::exec");
logger_macro!(exec_debug is Debug to "shexec::exec");

macro_rules! dev_logger_macro {
    ($name:ident is $rule_level:ident to $target:expr, $d:tt) => {
        macro_rules! $name {
            ($d($d arg:tt)+) => {
                if std::cfg!(feature = "dev") {
                    (::log::log!(
                        target: $target,
                        ::log::Level::$rule_level,
                        "{}: {}",
                        std::panic::Location::caller(),
                        format_args!($d($d arg)+)
                    ));
                }
            };
        }

        pub(crate) use $name;
    };
    ($name:ident is $rule_level:ident to $target:expr) => {
        dev_logger_macro!($name is $rule_level to $target, $);
    };
}

dev_logger_macro!(dev_warn is Warn to "shexec::dev");
dev_logger_macro!(dev_info is Info to "shexec::dev");
dev_logger_macro!(dev_debug is Debug to "shexec::dev");

/// A logger that dispatches records to sinks by target prefix.
#[derive(Default)]
pub struct ShexecLogger(Vec<(String, Box<dyn Log>)>);

impl ShexecLogger {
    pub fn new(prefix: &'static str) -> Self {
        let mut logger: Self = Default::default();

        logger.add_logger("shexec::exec", SimpleLogger::to_stderr(prefix));

        #[cfg(feature = "dev")]
        {
            let path = option_env!("SHEXEC_DEV_LOGS")
                .map(|s| s.into())
                .unwrap_or_else(|| {
                    std::env::temp_dir().join(format!("shexec-dev-{}.log", std::process::id()))
                });
            if let Ok(file_logger) = SimpleLogger::to_file(path, "") {
                logger.add_logger("shexec::dev", file_logger);
            }
        }

        logger
    }

    /// Install this logger as the `log` facade's global logger, letting records up to `level`
    /// through. Returns `false` if another logger was installed already.
    pub fn into_global_logger(self, level: log::LevelFilter) -> bool {
        log::set_boxed_logger(Box::new(self))
            .map(|()| log::set_max_level(level))
            .is_ok()
    }

    /// Add a logger for a specific prefix to the stack
    fn add_logger(
        &mut self,
        prefix: impl ToString + Deref<Target = str>,
        logger: impl Log + 'static,
    ) {
        let prefix = if prefix.ends_with("::") {
            prefix.to_string()
        } else {
            // given a prefix `my::prefix`, we want to match `my::prefix::somewhere`
            // but not `my::prefix_to_somewhere`
            format!("{}::", prefix.to_string())
        };
        self.0.push((prefix, Box::new(logger)))
    }
}

impl log::Log for ShexecLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level() && metadata.level() <= log::STATIC_MAX_LEVEL
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        for (prefix, l) in self.0.iter() {
            if record.target() == &prefix[..prefix.len() - 2] || record.target().starts_with(prefix)
            {
                let level = match record.level() {
                    log::Level::Error => Level::Error,
                    log::Level::Warn => Level::Warn,
                    log::Level::Info => Level::Info,
                    log::Level::Debug => Level::Debug,
                    log::Level::Trace => Level::Trace,
                };
                l.log(level, record.args());
            }
        }
    }

    fn flush(&self) {
        for (_, l) in self.0.iter() {
            l.flush();
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Error => "error",
            Level::Warn => "warning",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Trace => "trace",
        })
    }
}

trait Log: Send + Sync {
    fn log(&self, level: Level, args: &fmt::Arguments<'_>);
    fn flush(&self);
}

#[cfg(test)]
mod tests {
    use std::{
        fmt,
        sync::{Arc, Mutex},
    };

    use super::{Level, Log, ShexecLogger};

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<(Level, String)>>>);

    impl Log for Recorder {
        fn log(&self, level: Level, args: &fmt::Arguments<'_>) {
            self.0.lock().unwrap().push((level, args.to_string()));
        }

        fn flush(&self) {}
    }

    #[test]
    fn can_construct_logger() {
        let logger = ShexecLogger::new("shexec: ");
        let len = if cfg!(feature = "dev") { 2 } else { 1 };
        assert!(logger.0.len() <= len && !logger.0.is_empty());
    }

    #[test]
    fn routes_by_target_prefix() {
        let recorder = Recorder::default();
        let mut logger = ShexecLogger::default();
        logger.add_logger("shexec::exec", recorder.clone());

        log::set_max_level(log::LevelFilter::Trace);
        for target in ["shexec::exec", "shexec::exec::loop", "shexec::execute", "other"] {
            log::Log::log(
                &logger,
                &log::Record::builder()
                    .target(target)
                    .level(log::Level::Warn)
                    .args(format_args!("from {target}"))
                    .build(),
            );
        }

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (Level::Warn, "from shexec::exec".to_string()),
                (Level::Warn, "from shexec::exec::loop".to_string()),
            ]
        );
    }
}
