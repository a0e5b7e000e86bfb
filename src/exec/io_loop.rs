//! The loop that babysits a running child: feeding its stdin, collecting its output and
//! noticing when it exits, times out or has to be stopped.
use std::{
    fs::{self, File},
    io::{Read, Write},
    panic::{self, AssertUnwindSafe},
    thread,
    time::{Duration, Instant},
};

use super::{
    buffer_pool::BufferPool,
    config::ExecConfig,
    launch::{launch, Child, OutputPipe},
    redirect::{RedirectMode, StdinSource, Stream},
    state::Shared,
    status::Status,
    terminate::{escalate, OsProcess, ProcessControl},
};
use crate::{
    common::ErrorKind,
    cutils::{is_broken_pipe, was_interrupted, would_block},
    defaults::{
        IDLE_SLEEP, MAX_DRAIN_ATTEMPTS, MAX_IDLE_CYCLES, POLL_TIMEOUT, STDIN_WRITE_RETRY,
        TERMINATION_CHECK_INTERVAL,
    },
    log::{dev_debug, exec_debug, exec_error, exec_info, exec_warn},
    system::{
        interface::ProcessId,
        poll::{PollEvent, PollSet},
        signal::consts::SIGKILL,
        wait::{Wait, WaitError, WaitOptions},
    },
};

/// Run `command` to completion and publish the results in `shared`.
///
/// `shared` must have been prepared with [`Shared::begin`]. Returns once the execution reached a
/// terminal state, after opening the `done` latch. A panicking output callback ends the execution
/// with an error and the child is killed.
pub(crate) fn run(shared: &Shared, config: &ExecConfig, command: &str) {
    let child = match launch(command, config) {
        Ok(child) => child,
        Err(err) => {
            exec_warn!("cannot run '{command}': {err}");
            shared.fail_launch(err.kind());
            shared.termination.complete();
            shared.done.open();
            return;
        }
    };

    let pid = child.pid;
    shared.publish_pid(pid);

    let supervised = panic::catch_unwind(AssertUnwindSafe(|| supervise(shared, config, child)));
    let ending = match supervised {
        Ok(ending) => ending,
        Err(_) => {
            exec_error!("supervising {pid} panicked, killing it");
            abandon(pid)
        }
    };

    exec_info!("{pid} ended: {} (return code {:?})", ending.status, ending.return_code);

    if let Some(code) = ending.return_code {
        shared.set_return_code(code);
    }
    if let Some(kind) = ending.error {
        shared.last_error.store(kind);
    }
    shared.status.finish(ending.status);
    shared.termination.complete();
    shared.done.open();
}

fn supervise(shared: &Shared, config: &ExecConfig, child: Child) -> Ending {
    let Child {
        pid,
        stdin,
        outputs,
    } = child;

    let mut supervisor = Supervisor {
        shared,
        config,
        pid,
        outputs,
        pool: BufferPool::global(),
        started: Instant::now(),
    };

    if let (Some(pipe), StdinSource::Buffer(data)) = (stdin, &config.stdin) {
        supervisor.write_stdin(pipe, data);
    }

    let ending = supervisor.run();
    supervisor.finish_output();
    ending
}

/// Kill and reap a child whose supervision was cut short. Its pipes are closed already.
fn abandon(pid: ProcessId) -> Ending {
    if let Err(err) = OsProcess::new(pid).signal(SIGKILL) {
        exec_warn!("cannot kill {pid}: {err}");
    }

    let return_code = match pid.wait(WaitOptions::new()) {
        Ok((_, status)) => Some(status.return_code()),
        Err(WaitError::NotReady | WaitError::NoChild) => None,
        Err(WaitError::Io(err)) => {
            exec_warn!("cannot wait for {pid}: {err}");
            None
        }
    };

    Ending {
        status: Status::Error,
        return_code,
        error: Some(ErrorKind::SystemError),
    }
}

/// How the main loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ending {
    status: Status,
    return_code: Option<i32>,
    error: Option<ErrorKind>,
}

struct Supervisor<'a> {
    shared: &'a Shared,
    config: &'a ExecConfig,
    pid: ProcessId,
    outputs: Vec<OutputPipe>,
    pool: &'a BufferPool,
    started: Instant,
}

impl Supervisor<'_> {
    fn timed_out(&self) -> bool {
        self.config
            .timeout
            .is_some_and(|timeout| self.started.elapsed() >= timeout)
    }

    /// Write all of `data` to the child, then close the pipe so the child sees end-of-file.
    ///
    /// Output is collected while the pipe is full, a child that writes before it reads would
    /// otherwise never drain its stdin.
    fn write_stdin(&mut self, pipe: File, data: &[u8]) {
        let mut written = 0;

        while written < data.len() {
            match (&pipe).write(&data[written..]) {
                Ok(n) => written += n,
                Err(err) if was_interrupted(&err) => {}
                Err(err) if would_block(&err) => {
                    if self.timed_out() || self.shared.termination.is_requested() {
                        dev_debug!("giving up on stdin after {written} bytes");
                        break;
                    }
                    self.pump(STDIN_WRITE_RETRY, Some(&pipe));
                }
                Err(err) if is_broken_pipe(&err) => {
                    dev_debug!("{} closed its stdin after {written} bytes", self.pid);
                    break;
                }
                Err(err) => {
                    exec_warn!("cannot write to stdin of {}: {err}", self.pid);
                    self.shared.last_error.store(ErrorKind::StdinWriteFailed);
                    break;
                }
            }
        }

        drop(pipe);
    }

    fn run(&mut self) -> Ending {
        let mut last_termination_check: Option<Instant> = None;
        let mut idle_cycles = 0;

        loop {
            if last_termination_check
                .map_or(true, |at| at.elapsed() >= TERMINATION_CHECK_INTERVAL)
            {
                last_termination_check = Some(Instant::now());
                if self.shared.termination.is_requested() {
                    return self.stop(Status::Terminated, None);
                }
            }

            if self.timed_out() {
                exec_info!("{} exceeded its timeout", self.pid);
                self.shared.termination.request(true);
                return self.stop(Status::Timeout, Some(ErrorKind::TimeoutExceeded));
            }

            if self.pump(POLL_TIMEOUT, None) {
                idle_cycles = 0;
                continue;
            }

            match self.pid.wait(WaitOptions::new().no_hang()) {
                Ok((_, status)) => {
                    dev_debug!("{} exited with {status:?}", self.pid);
                    self.drain();
                    return Ending {
                        status: Status::Finished,
                        return_code: Some(status.return_code()),
                        error: None,
                    };
                }
                Err(WaitError::NotReady) => {}
                Err(WaitError::NoChild) => {
                    exec_warn!("{} was reaped by someone else", self.pid);
                    return self.failed();
                }
                Err(WaitError::Io(err)) => {
                    exec_warn!("cannot wait for {}: {err}", self.pid);
                    return self.failed();
                }
            }

            idle_cycles += 1;
            if idle_cycles >= MAX_IDLE_CYCLES {
                thread::sleep(IDLE_SLEEP);
            }
        }
    }

    fn failed(&mut self) -> Ending {
        self.drain();
        Ending {
            status: Status::Error,
            return_code: None,
            error: Some(ErrorKind::SystemError),
        }
    }

    /// Run the termination escalation against the child and end with `status`.
    fn stop(&mut self, status: Status, error: Option<ErrorKind>) -> Ending {
        match self.shared.termination.requested_at() {
            Some(at) => exec_debug!("stopping {}, requested {:?} ago", self.pid, at.elapsed()),
            None => exec_debug!("stopping {}", self.pid),
        }
        let shared = self.shared;
        let policy = self.config.termination;
        // keep reading, a child that writes while it shuts down must not block on a full pipe
        let outcome = escalate(
            &mut OsProcess::new(self.pid),
            &policy,
            &shared.termination,
            |interval| {
                self.pump(interval, None);
            },
        );
        self.drain();

        Ending {
            status,
            return_code: outcome.return_code,
            error: outcome.failure.or(error),
        }
    }

    /// Wait up to `timeout` for output and handle whatever arrived. Returns whether any bytes
    /// were read.
    ///
    /// With `stdin` the wait also ends as soon as the child's stdin can take more data.
    fn pump(&mut self, timeout: Duration, stdin: Option<&File>) -> bool {
        let mut set = PollSet::new();
        for (idx, output) in self.outputs.iter().enumerate() {
            if let Some(read) = &output.read {
                set.add_fd(idx, read, PollEvent::Readable);
            }
        }
        if let Some(stdin) = stdin {
            // past the last output, `read_chunk` ignores it
            set.add_fd(self.outputs.len(), stdin, PollEvent::Writable);
        }

        if set.is_empty() {
            if !timeout.is_zero() {
                thread::sleep(timeout);
            }
            return false;
        }

        let ready = match set.poll(timeout) {
            Ok(ready) => ready,
            Err(err) => {
                exec_warn!("cannot poll output pipes: {err}");
                return false;
            }
        };

        let mut got_data = false;
        for idx in ready {
            got_data |= self.read_chunk(idx);
        }
        got_data
    }

    /// One non-blocking read from an output pipe.
    fn read_chunk(&mut self, idx: usize) -> bool {
        let Some(output) = self.outputs.get_mut(idx) else {
            return false;
        };
        let Some(mut read) = output.read.as_ref() else {
            return false;
        };

        let mut buf = self.pool.acquire();
        match read.read(&mut buf) {
            Ok(0) => {
                dev_debug!("{} reached end-of-file", output.stream.name());
                output.read = None;
                false
            }
            Ok(n) => {
                deliver(self.shared, output, &buf[..n]);
                true
            }
            Err(err) if was_interrupted(&err) || would_block(&err) => false,
            Err(err) => {
                exec_warn!("cannot read {}: {err}", output.stream.name());
                output.read = None;
                false
            }
        }
    }

    /// Pick up what the child wrote right before it went away.
    fn drain(&mut self) {
        for _ in 0..MAX_DRAIN_ATTEMPTS {
            if !self.pump(Duration::ZERO, None) {
                break;
            }
        }
    }

    /// Close the pipes and files, then settle the captured output.
    fn finish_output(&mut self) {
        self.outputs.clear();

        let mut output = self.shared.output();
        for stream in [Stream::Stdout, Stream::Stderr] {
            let redirect = self.config.redirect(stream);
            let buffer = output.stream_mut(stream);

            // the file is what the caller asked for, prefer it over what passed through the pipe
            if self.config.capture_output && redirect.mode == RedirectMode::Both {
                if let Some(path) = redirect.file() {
                    match fs::read(path) {
                        Ok(contents) => *buffer = contents,
                        Err(err) => {
                            exec_warn!("cannot read back {}: {err}", path.display())
                        }
                    }
                }
            }

            trim_trailing_newline(buffer);
        }
    }
}

fn deliver(shared: &Shared, output: &mut OutputPipe, chunk: &[u8]) {
    if output.capture {
        shared
            .output()
            .stream_mut(output.stream)
            .extend_from_slice(chunk);
    }

    if let Some(callback) = &output.callback {
        callback(chunk);
    }

    if let Some(tee) = &mut output.tee {
        if let Err(err) = tee.write_all(chunk) {
            exec_warn!("cannot write {} to file: {err}", output.stream.name());
            output.tee = None;
        }
    }
}

fn trim_trailing_newline(buffer: &mut Vec<u8>) {
    if buffer.last() == Some(&b'\n') {
        buffer.pop();
    }
}
