use std::{
    collections::HashMap,
    ffi::{CString, OsString},
    fs::{File, OpenOptions},
    io,
    mem::MaybeUninit,
    os::{
        fd::{AsRawFd, RawFd},
        raw::c_char,
        unix::{
            ffi::{OsStrExt, OsStringExt},
            fs::OpenOptionsExt,
        },
    },
    path::Path,
    ptr,
};

use super::{
    config::{ExecConfig, OutputCallback},
    redirect::{StdinSource, Stream},
};
use crate::{
    common::{Environment, Error, ErrorKind},
    cutils::{set_nonblocking, to_cstring},
    defaults::{EXEC_ERROR_CODE, FILE_PERMISSIONS, SHELL},
    log::{dev_debug, exec_debug, exec_warn},
    system::{_exit, fork, interface::ProcessId, pipe::Pipe, setpgid, ForkResult},
};

/// An output stream of the child that this process reads from.
pub(crate) struct OutputPipe {
    pub(crate) stream: Stream,
    /// Closed once the child's end reported end-of-file.
    pub(crate) read: Option<File>,
    /// A file every chunk is copied to.
    pub(crate) tee: Option<File>,
    /// Whether chunks are kept in memory.
    pub(crate) capture: bool,
    pub(crate) callback: Option<OutputCallback>,
}

/// A freshly launched child, with the parent's ends of its pipes.
pub(crate) struct Child {
    pub(crate) pid: ProcessId,
    pub(crate) stdin: Option<File>,
    pub(crate) outputs: Vec<OutputPipe>,
}

enum InputPlan {
    Pipe(Pipe),
    File(CString),
}

enum OutputPlan {
    Inherit,
    Pipe(Pipe, Option<File>),
    File(CString),
}

/// Everything the child touches between `fork` and `execve`, prepared in advance so the child
/// does not have to allocate.
struct Plan {
    shell: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    working_directory: Option<CString>,
    stdin: InputPlan,
    stdout: OutputPlan,
    stderr: OutputPlan,
}

/// Start `command` under the shell with the redirections of `config`.
pub(crate) fn launch(command: &str, config: &ExecConfig) -> Result<Child, Error> {
    let plan = prepare(command, config)?;

    let argv = null_terminated(&plan.argv);
    let envp = null_terminated(&plan.envp);

    // SAFETY: the child branch only calls `exec_child`, which sticks to async-signal-safe calls
    // on the memory prepared above and never returns.
    let pid = match unsafe { fork() }.map_err(Error::with(ErrorKind::ForkFailed))? {
        ForkResult::Child => exec_child(&plan, &argv, &envp),
        ForkResult::Parent(pid) => pid,
    };

    // The child does the same, whichever of us runs first wins. Once the child has called
    // `execve` this fails with EACCES, which is harmless.
    if let Err(err) = setpgid(pid, pid) {
        dev_debug!("cannot move {pid} to its own process group: {err}");
    }

    exec_debug!("launched {pid}: {command}");

    let stdin = match plan.stdin {
        InputPlan::Pipe(mut pipe) => {
            pipe.close_read();
            pipe.take_write().map(File::from)
        }
        InputPlan::File(_) => None,
    };
    if let Some(stdin) = &stdin {
        nonblocking(stdin.as_raw_fd(), "stdin");
    }

    let mut outputs = Vec::new();
    for (stream, plan) in [(Stream::Stdout, plan.stdout), (Stream::Stderr, plan.stderr)] {
        let OutputPlan::Pipe(mut pipe, tee) = plan else {
            continue;
        };

        pipe.close_write();
        let Some(read) = pipe.take_read() else {
            continue;
        };
        nonblocking(read.as_raw_fd(), stream.name());

        outputs.push(OutputPipe {
            stream,
            read: Some(File::from(read)),
            tee,
            capture: config.capture_output && config.redirect(stream).captures(),
            callback: config.callback(stream).cloned(),
        });
    }

    Ok(Child {
        pid,
        stdin,
        outputs,
    })
}

fn nonblocking(fd: RawFd, name: &str) {
    if let Err(err) = set_nonblocking(fd) {
        exec_warn!("cannot make {name} pipe non-blocking: {err}");
    }
}

fn prepare(command: &str, config: &ExecConfig) -> Result<Plan, Error> {
    let shell = to_cstring(SHELL).map_err(Error::with(ErrorKind::ExecFailed))?;
    let argv = vec![
        shell.clone(),
        to_cstring("-c").map_err(Error::with(ErrorKind::ExecFailed))?,
        to_cstring(command).map_err(Error::with(ErrorKind::ExecFailed))?,
    ];

    let envp = environment_block(&config.environment)
        .map_err(Error::with(ErrorKind::EnvSetupFailed))?;

    let working_directory = config
        .working_directory
        .as_ref()
        .map(to_cstring)
        .transpose()
        .map_err(Error::with(ErrorKind::WorkingDirFailed))?;

    let stdin = match &config.stdin {
        StdinSource::Buffer(_) => {
            InputPlan::Pipe(Pipe::acquire().map_err(Error::with(ErrorKind::PipeCreationFailed))?)
        }
        StdinSource::File(path) => {
            InputPlan::File(to_cstring(path).map_err(Error::with(ErrorKind::SystemError))?)
        }
    };

    Ok(Plan {
        shell,
        argv,
        envp,
        working_directory,
        stdin,
        stdout: plan_output(Stream::Stdout, config)?,
        stderr: plan_output(Stream::Stderr, config)?,
    })
}

fn plan_output(stream: Stream, config: &ExecConfig) -> Result<OutputPlan, Error> {
    let redirect = config.redirect(stream);

    if redirect.needs_pipe(config.callback(stream).is_some()) {
        let pipe = Pipe::acquire().map_err(Error::with(ErrorKind::PipeCreationFailed))?;
        let tee = redirect
            .file()
            .map(|path| create_output_file(path))
            .transpose()
            .map_err(Error::with(ErrorKind::SystemError))?;

        Ok(OutputPlan::Pipe(pipe, tee))
    } else if let Some(path) = redirect.file() {
        Ok(OutputPlan::File(
            to_cstring(path).map_err(Error::with(ErrorKind::SystemError))?,
        ))
    } else {
        Ok(OutputPlan::Inherit)
    }
}

fn create_output_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_PERMISSIONS as u32)
        .open(path)
}

/// The environment of this process with `overlay` laid over it, as `KEY=VALUE` strings.
fn environment_block(overlay: &Environment) -> io::Result<Vec<CString>> {
    let mut merged: HashMap<OsString, OsString> = std::env::vars_os().collect();

    for (key, value) in overlay {
        if key.is_empty() || key.as_bytes().contains(&b'=') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid environment variable name {key:?}"),
            ));
        }
        merged.insert(key.clone(), value.clone());
    }

    merged
        .into_iter()
        .map(|(key, value)| {
            let mut entry = key.into_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            CString::new(entry).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "environment variable contains a nul byte",
                )
            })
        })
        .collect()
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

/// Wire up the standard streams of a forked child and replace it with the shell.
fn exec_child(plan: &Plan, argv: &[*const c_char], envp: &[*const c_char]) -> ! {
    // SAFETY: everything below is async-signal-safe and works on memory allocated before the
    // fork. The strings and pointer arrays in `plan`, `argv` and `envp` outlive this call.
    unsafe {
        libc::setpgid(0, 0);

        // Signal dispositions and masks survive `execve`; the shell expects the defaults.
        let mut empty = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigemptyset(empty.as_mut_ptr());
        libc::sigprocmask(libc::SIG_SETMASK, empty.as_ptr(), ptr::null_mut());
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);

        let stdin = match &plan.stdin {
            InputPlan::Pipe(pipe) => pipe
                .read_fd()
                .is_some_and(|fd| redirect_fd(fd, libc::STDIN_FILENO)),
            InputPlan::File(path) => redirect_file(path, libc::O_RDONLY, libc::STDIN_FILENO),
        };
        if !stdin {
            _exit(EXEC_ERROR_CODE);
        }

        for (output, target) in [
            (&plan.stdout, libc::STDOUT_FILENO),
            (&plan.stderr, libc::STDERR_FILENO),
        ] {
            let redirected = match output {
                OutputPlan::Inherit => true,
                OutputPlan::Pipe(pipe, _) => pipe.write_fd().is_some_and(|fd| redirect_fd(fd, target)),
                OutputPlan::File(path) => redirect_file(
                    path,
                    libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
                    target,
                ),
            };
            if !redirected {
                _exit(EXEC_ERROR_CODE);
            }
        }

        if let Some(dir) = &plan.working_directory {
            if libc::chdir(dir.as_ptr()) != 0 {
                _exit(EXEC_ERROR_CODE);
            }
        }

        libc::execve(plan.shell.as_ptr(), argv.as_ptr(), envp.as_ptr());
    }

    _exit(EXEC_ERROR_CODE)
}

/// Make `fd` available as `target` across `execve`.
///
/// # Safety
///
/// Only async-signal-safe calls are made, so this may run in a forked child.
unsafe fn redirect_fd(fd: RawFd, target: RawFd) -> bool {
    if fd == target {
        // dup2 would be a no-op, clear close-on-exec by hand
        let flags = libc::fcntl(fd, libc::F_GETFD);
        flags != -1 && libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) != -1
    } else {
        libc::dup2(fd, target) != -1
    }
}

/// # Safety
///
/// See [`redirect_fd`].
unsafe fn redirect_file(path: &CString, flags: libc::c_int, target: RawFd) -> bool {
    let fd = libc::open(
        path.as_ptr(),
        flags | libc::O_CLOEXEC,
        FILE_PERMISSIONS as libc::c_uint,
    );
    if fd == -1 {
        return false;
    }

    let redirected = redirect_fd(fd, target);
    if fd != target {
        libc::close(fd);
    }

    redirected
}
