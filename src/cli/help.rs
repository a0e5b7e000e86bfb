pub const USAGE_MSG: &str = "\
usage: shexec [-t seconds] [-g seconds] [-D directory] [-i file] [--] <command>
       shexec -h | -V";

const DESCRIPTOR: &str = "shexec - run a shell command under supervision";

const HELP_MSG: &str = "Options:
  -D, --chdir=directory         change the working directory before running command
  -g, --grace=seconds           time between the graceful and the forced signal
  -h, --help                    display help message and exit
  -i, --input=file              read the command's standard input from file
  -t, --timeout=seconds         kill the command after this many seconds
  -V, --version                 display version information and exit
  --                            stop processing command line arguments

Set SHEXEC_LOG to error, warn, info or debug to change what is logged.";

pub fn long_help_message() -> String {
    format!("{DESCRIPTOR}\n{USAGE_MSG}\n{HELP_MSG}")
}
