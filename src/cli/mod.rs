#![forbid(unsafe_code)]

use std::{
    io::{self, Write},
    path::PathBuf,
    process,
    time::Duration,
};

use crate::{
    exec::{ProcessHandle, Status},
    log::ShexecLogger,
};

use self::help::{long_help_message, USAGE_MSG};

pub mod help;


/// Exit code used when the command was killed for running too long.
const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Debug, Default, PartialEq, Clone)]
pub enum ShexecAction {
    #[default]
    Help,
    Version,
    Run(String),
}

#[derive(Debug, Default, PartialEq, Clone)]
pub struct ShexecOptions {
    pub timeout: Option<Duration>,
    pub grace: Option<Duration>,
    pub directory: Option<PathBuf>,
    pub input: Option<PathBuf>,
    pub action: ShexecAction,
    help: bool,
    version: bool,
}

type OptionSetter = fn(&mut ShexecOptions, Option<String>) -> Result<(), String>;

struct ShexecOption {
    short: char,
    long: &'static str,
    takes_argument: bool,
    set: OptionSetter,
}

fn seconds(argument: Option<String>, short: char) -> Result<Duration, String> {
    let argument = argument.ok_or(format!("option requires an argument -- '{short}'"))?;
    argument
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or(format!("invalid number of seconds '{argument}'"))
}

impl ShexecOptions {
    const SHEXEC_OPTIONS: &[ShexecOption] = &[
        ShexecOption {
            short: 'D',
            long: "chdir",
            takes_argument: true,
            set: |options, argument| {
                let directory = argument.ok_or("option requires an argument -- 'D'")?;
                options.directory = Some(directory.into());
                Ok(())
            },
        },
        ShexecOption {
            short: 'g',
            long: "grace",
            takes_argument: true,
            set: |options, argument| {
                options.grace = Some(seconds(argument, 'g')?);
                Ok(())
            },
        },
        ShexecOption {
            short: 'h',
            long: "help",
            takes_argument: false,
            set: |options, _| {
                options.help = true;
                Ok(())
            },
        },
        ShexecOption {
            short: 'i',
            long: "input",
            takes_argument: true,
            set: |options, argument| {
                let input = argument.ok_or("option requires an argument -- 'i'")?;
                options.input = Some(input.into());
                Ok(())
            },
        },
        ShexecOption {
            short: 't',
            long: "timeout",
            takes_argument: true,
            set: |options, argument| {
                options.timeout = Some(seconds(argument, 't')?);
                Ok(())
            },
        },
        ShexecOption {
            short: 'V',
            long: "version",
            takes_argument: false,
            set: |options, _| {
                options.version = true;
                Ok(())
            },
        },
    ];

    pub fn from_env() -> Result<ShexecOptions, String> {
        Self::try_parse_from(std::env::args())
    }

    /// Parse the arguments of the binary, the first one being its name.
    pub fn try_parse_from<I, T>(iter: I) -> Result<ShexecOptions, String>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut options = ShexecOptions::default();
        let mut command: Vec<String> = Vec::new();
        let mut arg_iter = iter.into_iter().map(Into::into).skip(1);

        while let Some(arg) = arg_iter.next() {
            if arg == "--" {
                command.extend(arg_iter.by_ref());
                break;
            } else if let Some(long) = arg.strip_prefix("--") {
                // '--timeout=5' carries its argument, '--timeout 5' takes the next one
                let (name, value) = match long.split_once('=') {
                    Some((name, value)) => (name, Some(value.to_string())),
                    None => (long, None),
                };
                let option = Self::SHEXEC_OPTIONS
                    .iter()
                    .find(|o| o.long == name)
                    .ok_or(format!("unrecognized option '{arg}'"))?;

                match (option.takes_argument, value) {
                    (true, Some(value)) => (option.set)(&mut options, Some(value))?,
                    (true, None) => (option.set)(&mut options, arg_iter.next())?,
                    (false, None) => (option.set)(&mut options, None)?,
                    (false, Some(_)) => {
                        Err(format!("'--{}' does not take any arguments", option.long))?
                    }
                }
            } else if arg.starts_with('-') && arg.len() > 1 {
                // flags can be grouped, so we loop over the characters
                for (n, char) in arg.char_indices().skip(1) {
                    let option = Self::SHEXEC_OPTIONS
                        .iter()
                        .find(|o| o.short == char)
                        .ok_or(format!("unrecognized option '{char}'"))?;

                    if option.takes_argument {
                        // the rest of the group, or else the next argument
                        let rest = &arg[n + char.len_utf8()..];
                        let argument = if rest.is_empty() {
                            arg_iter.next()
                        } else {
                            Some(rest.to_string())
                        };
                        (option.set)(&mut options, argument)?;
                        break;
                    } else {
                        (option.set)(&mut options, None)?;
                    }
                }
            } else {
                // the command starts here, whatever follows belongs to it
                command.push(arg);
                command.extend(arg_iter.by_ref());
                break;
            }
        }

        options.action = if options.help {
            ShexecAction::Help
        } else if options.version {
            ShexecAction::Version
        } else if command.is_empty() {
            Err("no command given")?
        } else {
            ShexecAction::Run(command.join(" "))
        };

        Ok(options)
    }
}

fn log_level() -> log::LevelFilter {
    std::env::var("SHEXEC_LOG")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(log::LevelFilter::Warn)
}

/// Run the command and work out the exit code of the binary.
fn run(options: &ShexecOptions, command: &str) -> i32 {
    let mut handle = ProcessHandle::new();

    if let Some(timeout) = options.timeout {
        handle.set_timeout(timeout);
    }
    if let Some(grace) = options.grace {
        handle.set_graceful_termination_timeout(grace);
    }
    if let Some(directory) = &options.directory {
        handle.set_working_directory(directory);
    }
    if let Some(input) = &options.input {
        handle.set_stdin_file(input);
    }

    // pass output through as it arrives instead of collecting it
    handle.set_capture_output(false);
    handle.set_stdout_callback(|chunk| {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(chunk).and_then(|()| stdout.flush());
    });
    handle.set_stderr_callback(|chunk| {
        let _ = io::stderr().lock().write_all(chunk);
    });

    handle.execute(command);

    match handle.get_status() {
        Status::Finished | Status::Terminated => handle.get_return_code(),
        Status::Timeout => {
            eprintln!("shexec: command timed out");
            TIMEOUT_EXIT_CODE
        }
        Status::Error | Status::NotStarted | Status::Running => {
            eprintln!("shexec: {}", handle.get_error_message());
            1
        }
    }
}

pub fn main() {
    let options = match ShexecOptions::from_env() {
        Ok(options) => options,
        Err(error) => {
            eprintln!("shexec: {error}\n{USAGE_MSG}");
            process::exit(1);
        }
    };

    match &options.action {
        ShexecAction::Help => println!("{}", long_help_message()),
        ShexecAction::Version => println!("shexec {}", env!("CARGO_PKG_VERSION")),
        ShexecAction::Run(command) => {
            ShexecLogger::new("shexec: ").into_global_logger(log_level());
            process::exit(run(&options, command));
        }
    }
}
