//! Stopping a child: a graceful signal first, a forced one if the child does not comply in time.
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, PoisonError,
    },
    time::{Duration, Instant},
};

use super::state::Latch;
use crate::{
    common::ErrorKind,
    defaults::{GRACEFUL_TERMINATION_TIMEOUT, TERMINATION_POLL_INTERVAL, TERMINATION_TIMEOUT},
    log::{dev_debug, exec_warn},
    system::{
        interface::ProcessId,
        kill, killpg,
        signal::{consts::*, signal_fmt, SignalNumber},
        wait::{Wait, WaitError, WaitOptions},
    },
};

/// The signals used to stop a child and how long each one is given to take effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationPolicy {
    /// Sent first, unless the termination is forced from the start.
    pub graceful_signal: SignalNumber,
    /// Sent when the graceful signal did not stop the child within `graceful_timeout`.
    pub forced_signal: SignalNumber,
    pub graceful_timeout: Duration,
    /// How long the child may take to die after the forced signal before we give up on it.
    pub forced_timeout: Duration,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            graceful_signal: SIGTERM,
            forced_signal: SIGKILL,
            graceful_timeout: GRACEFUL_TERMINATION_TIMEOUT,
            forced_timeout: TERMINATION_TIMEOUT,
        }
    }
}

/// A request to stop the running child, shared between the main loop and any other thread.
///
/// Within one execution the flags only ever go from unset to set.
#[derive(Debug, Default)]
pub(crate) struct TerminationRequest {
    requested: AtomicBool,
    force: AtomicBool,
    completed: Latch,
    requested_at: Mutex<Option<Instant>>,
}

impl TerminationRequest {
    pub(crate) fn reset(&self) {
        self.requested.store(false, Ordering::Release);
        self.force.store(false, Ordering::Release);
        self.completed.reset();
        *self.requested_at.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Ask for the child to be stopped. A forced request skips the graceful signal; a later
    /// forced request upgrades a graceful one that is still in progress.
    pub(crate) fn request(&self, force: bool) {
        if !self.requested.swap(true, Ordering::AcqRel) {
            *self.requested_at.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(Instant::now());
        }

        if force {
            self.force.store(true, Ordering::Release);
        }
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub(crate) fn is_forced(&self) -> bool {
        self.force.load(Ordering::Acquire)
    }

    pub(crate) fn requested_at(&self) -> Option<Instant> {
        *self.requested_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn complete(&self) {
        self.completed.open();
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.is_open()
    }

    /// Block until the request was carried out, for at most `timeout`.
    pub(crate) fn wait_completed(&self, timeout: Duration) -> bool {
        self.completed.wait_timeout(timeout)
    }
}

/// Whether a child is still around, as seen by a non-blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Liveness {
    Alive,
    /// The child exited and was reaped just now, with this return code.
    Exited(i32),
    /// The child is not ours to wait for anymore, someone reaped it already.
    Gone,
}

/// The operations the escalation needs from a child process.
pub(crate) trait ProcessControl {
    fn signal(&mut self, signal: SignalNumber) -> io::Result<()>;
    fn check(&mut self) -> Liveness;
}

/// A real child process, leader of its own process group.
pub(crate) struct OsProcess {
    pid: ProcessId,
}

impl OsProcess {
    pub(crate) fn new(pid: ProcessId) -> Self {
        Self { pid }
    }
}

impl ProcessControl for OsProcess {
    /// Signal the whole process group so shell grandchildren are reached too, falling back to
    /// the child alone.
    fn signal(&mut self, signal: SignalNumber) -> io::Result<()> {
        killpg(self.pid, signal)
            .or_else(|_| kill(ProcessId::new(-self.pid.get()), signal))
            .or_else(|_| kill(self.pid, signal))
    }

    fn check(&mut self) -> Liveness {
        match self.pid.wait(WaitOptions::new().no_hang()) {
            Ok((_, status)) => {
                dev_debug!("{} was reaped with status {status:?}", self.pid);
                Liveness::Exited(status.return_code())
            }
            Err(WaitError::NotReady) => Liveness::Alive,
            Err(WaitError::NoChild) => Liveness::Gone,
            Err(WaitError::Io(err)) => {
                exec_warn!("cannot wait for {}: {err}", self.pid);
                Liveness::Gone
            }
        }
    }
}

/// How a termination ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Outcome {
    /// Set if the child was reaped while terminating it.
    pub(crate) return_code: Option<i32>,
    /// Set if the child could not be signaled, or outlived the forced signal.
    pub(crate) failure: Option<ErrorKind>,
}

/// The state of one termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Escalation {
    Requested {
        force: bool,
    },
    /// The graceful signal was sent at `since`.
    Graceful {
        since: Instant,
    },
    /// The forced signal was sent at `since`, or could not be sent if `failure` is set.
    Forced {
        since: Instant,
        failure: Option<ErrorKind>,
    },
    Completed(Outcome),
}

impl Escalation {
    pub(crate) fn new(force: bool) -> Self {
        Escalation::Requested { force }
    }

    /// Advance the termination by one step, as of `now`.
    pub(crate) fn step(
        self,
        child: &mut impl ProcessControl,
        policy: &TerminationPolicy,
        now: Instant,
    ) -> Self {
        match self {
            Escalation::Requested { force: true } => Self::send_forced(child, policy, now),
            Escalation::Requested { force: false } => {
                match child.signal(policy.graceful_signal) {
                    Ok(()) => Escalation::Graceful { since: now },
                    Err(err) => {
                        exec_warn!(
                            "cannot send {}: {err}",
                            signal_fmt(policy.graceful_signal)
                        );
                        Self::send_forced(child, policy, now)
                    }
                }
            }
            Escalation::Graceful { since } => match child.check() {
                Liveness::Alive if now.duration_since(since) >= policy.graceful_timeout => {
                    dev_debug!("graceful termination timed out, escalating");
                    Self::send_forced(child, policy, now)
                }
                Liveness::Alive => self,
                gone => Self::completed(gone, None),
            },
            Escalation::Forced { since, failure } => match child.check() {
                Liveness::Alive if now.duration_since(since) >= policy.forced_timeout => {
                    Escalation::Completed(Outcome {
                        return_code: None,
                        failure: Some(failure.unwrap_or(ErrorKind::TerminationFailed)),
                    })
                }
                Liveness::Alive => self,
                gone => Self::completed(gone, None),
            },
            Escalation::Completed(_) => self,
        }
    }

    /// Skip the rest of a graceful termination in favour of the forced signal.
    pub(crate) fn upgrade(self) -> Self {
        match self {
            Escalation::Requested { .. } | Escalation::Graceful { .. } => {
                Escalation::Requested { force: true }
            }
            other => other,
        }
    }

    fn send_forced(
        child: &mut impl ProcessControl,
        policy: &TerminationPolicy,
        now: Instant,
    ) -> Self {
        let failure = match child.signal(policy.forced_signal) {
            Ok(()) => None,
            Err(err) => {
                exec_warn!("cannot send {}: {err}", signal_fmt(policy.forced_signal));
                Some(classify_signal_error(&err))
            }
        };

        Escalation::Forced { since: now, failure }
    }

    fn completed(liveness: Liveness, failure: Option<ErrorKind>) -> Self {
        let return_code = match liveness {
            Liveness::Exited(code) => Some(code),
            Liveness::Alive | Liveness::Gone => None,
        };

        Escalation::Completed(Outcome {
            return_code,
            failure,
        })
    }
}

fn classify_signal_error(err: &io::Error) -> ErrorKind {
    match err.raw_os_error() {
        Some(libc::EPERM) => ErrorKind::InsufficientPrivileges,
        _ => ErrorKind::TerminationFailed,
    }
}

/// Run a termination to completion, checking on the child every few milliseconds.
///
/// `pause` is called between checks with the time to wait. It is where the caller keeps reading
/// the child's output, a child blocked on a full pipe would never get to exit.
///
/// Always returns within roughly `graceful_timeout + forced_timeout`.
pub(crate) fn escalate(
    child: &mut impl ProcessControl,
    policy: &TerminationPolicy,
    request: &TerminationRequest,
    mut pause: impl FnMut(Duration),
) -> Outcome {
    let mut state = Escalation::new(request.is_forced());

    loop {
        if request.is_forced() {
            state = state.upgrade();
        }

        state = state.step(child, policy, Instant::now());

        if let Escalation::Completed(outcome) = state {
            return outcome;
        }

        pause(TERMINATION_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io, thread,
        time::{Duration, Instant},
    };

    use super::{
        escalate, Escalation, Liveness, Outcome, ProcessControl, TerminationPolicy,
        TerminationRequest,
    };
    use crate::{common::ErrorKind, system::signal::consts::*};

    /// A child that dies when it receives one of `fatal` signals.
    #[derive(Default)]
    struct FakeChild {
        fatal: Vec<i32>,
        signals: Vec<i32>,
        refuse_signals: Option<i32>,
        dead: bool,
        reaped: bool,
    }

    impl ProcessControl for FakeChild {
        fn signal(&mut self, signal: i32) -> io::Result<()> {
            if let Some(errno) = self.refuse_signals {
                return Err(io::Error::from_raw_os_error(errno));
            }
            self.signals.push(signal);
            if self.fatal.contains(&signal) {
                self.dead = true;
            }
            Ok(())
        }

        fn check(&mut self) -> Liveness {
            match (self.dead, self.reaped) {
                (false, _) => Liveness::Alive,
                (true, false) => {
                    self.reaped = true;
                    Liveness::Exited(128 + self.signals.last().copied().unwrap_or(0))
                }
                (true, true) => Liveness::Gone,
            }
        }
    }

    fn policy() -> TerminationPolicy {
        TerminationPolicy {
            graceful_timeout: Duration::from_millis(100),
            forced_timeout: Duration::from_millis(300),
            ..Default::default()
        }
    }

    #[test]
    fn graceful_signal_is_enough() {
        let mut child = FakeChild {
            fatal: vec![SIGTERM, SIGKILL],
            ..Default::default()
        };
        let t0 = Instant::now();

        let state = Escalation::new(false).step(&mut child, &policy(), t0);
        assert_eq!(state, Escalation::Graceful { since: t0 });

        let state = state.step(&mut child, &policy(), t0 + Duration::from_millis(10));
        assert_eq!(
            state,
            Escalation::Completed(Outcome {
                return_code: Some(128 + SIGTERM),
                failure: None,
            })
        );
        assert_eq!(child.signals, vec![SIGTERM]);
    }

    #[test]
    fn escalates_after_graceful_timeout() {
        let mut child = FakeChild {
            fatal: vec![SIGKILL],
            ..Default::default()
        };
        let t0 = Instant::now();

        let state = Escalation::new(false).step(&mut child, &policy(), t0);
        let state = state.step(&mut child, &policy(), t0 + Duration::from_millis(50));
        assert_eq!(state, Escalation::Graceful { since: t0 });

        let t1 = t0 + Duration::from_millis(100);
        let state = state.step(&mut child, &policy(), t1);
        assert_eq!(
            state,
            Escalation::Forced {
                since: t1,
                failure: None
            }
        );

        let state = state.step(&mut child, &policy(), t1 + Duration::from_millis(10));
        assert!(matches!(
            state,
            Escalation::Completed(Outcome {
                return_code: Some(_),
                failure: None
            })
        ));
        assert_eq!(child.signals, vec![SIGTERM, SIGKILL]);
    }

    #[test]
    fn forced_request_skips_graceful_signal() {
        let mut child = FakeChild {
            fatal: vec![SIGKILL],
            ..Default::default()
        };
        let t0 = Instant::now();

        let state = Escalation::new(true).step(&mut child, &policy(), t0);
        assert!(matches!(state, Escalation::Forced { .. }));
        assert_eq!(child.signals, vec![SIGKILL]);
    }

    #[test]
    fn configurable_first_signal() {
        let mut child = FakeChild {
            fatal: vec![SIGINT],
            ..Default::default()
        };
        let policy = TerminationPolicy {
            graceful_signal: SIGINT,
            ..policy()
        };

        let t0 = Instant::now();
        let state = Escalation::new(false)
            .step(&mut child, &policy, t0)
            .step(&mut child, &policy, t0);
        assert!(matches!(state, Escalation::Completed(_)));
        assert_eq!(child.signals, vec![SIGINT]);
    }

    #[test]
    fn undeliverable_signals_still_complete() {
        let mut child = FakeChild {
            refuse_signals: Some(libc::EPERM),
            ..Default::default()
        };
        let t0 = Instant::now();

        let state = Escalation::new(false).step(&mut child, &policy(), t0);
        assert_eq!(
            state,
            Escalation::Forced {
                since: t0,
                failure: Some(ErrorKind::InsufficientPrivileges)
            }
        );

        let state = state.step(&mut child, &policy(), t0 + Duration::from_millis(300));
        assert_eq!(
            state,
            Escalation::Completed(Outcome {
                return_code: None,
                failure: Some(ErrorKind::InsufficientPrivileges),
            })
        );
    }

    #[test]
    fn child_outliving_forced_signal_is_a_failure() {
        let mut child = FakeChild::default();
        let t0 = Instant::now();

        let state = Escalation::new(true).step(&mut child, &policy(), t0);
        let state = state.step(&mut child, &policy(), t0 + Duration::from_millis(299));
        assert!(matches!(state, Escalation::Forced { .. }));

        let state = state.step(&mut child, &policy(), t0 + Duration::from_millis(300));
        assert_eq!(
            state,
            Escalation::Completed(Outcome {
                return_code: None,
                failure: Some(ErrorKind::TerminationFailed),
            })
        );
    }

    #[test]
    fn already_gone_child() {
        let mut child = FakeChild {
            dead: true,
            reaped: true,
            ..Default::default()
        };
        let t0 = Instant::now();

        let state = Escalation::new(false)
            .step(&mut child, &policy(), t0)
            .step(&mut child, &policy(), t0);
        assert_eq!(
            state,
            Escalation::Completed(Outcome {
                return_code: None,
                failure: None,
            })
        );
    }

    #[test]
    fn forced_request_upgrades_graceful_phase() {
        let t0 = Instant::now();
        assert_eq!(
            Escalation::Graceful { since: t0 }.upgrade(),
            Escalation::Requested { force: true }
        );
        let forced = Escalation::Forced {
            since: t0,
            failure: None,
        };
        assert_eq!(forced.upgrade(), forced);
    }

    #[test]
    fn escalate_drives_to_completion() {
        let mut child = FakeChild {
            fatal: vec![SIGKILL],
            ..Default::default()
        };
        let request = TerminationRequest::default();
        request.request(false);
        assert!(request.requested_at().is_some());

        let start = Instant::now();
        let mut pauses = 0;
        let outcome = escalate(&mut child, &policy(), &request, |interval| {
            pauses += 1;
            thread::sleep(interval);
        });
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(pauses >= 1);
        assert_eq!(outcome.failure, None);
        assert_eq!(child.signals, vec![SIGTERM, SIGKILL]);
    }

    #[test]
    fn completion_wakes_waiter() {
        let request = std::sync::Arc::new(TerminationRequest::default());
        request.request(false);

        let completer = {
            let request = request.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                request.complete();
            })
        };

        let start = Instant::now();
        assert!(request.wait_completed(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        completer.join().unwrap();
    }

    #[test]
    fn request_flags() {
        let request = TerminationRequest::default();
        assert!(!request.is_requested());
        assert!(!request.wait_completed(Duration::from_millis(20)));

        request.request(false);
        assert!(request.is_requested());
        assert!(!request.is_forced());
        let first = request.requested_at();

        request.request(true);
        assert!(request.is_forced());
        assert_eq!(request.requested_at(), first);

        request.complete();
        assert!(request.wait_completed(Duration::ZERO));

        request.reset();
        assert!(!request.is_requested());
        assert!(!request.is_completed());
        assert!(request.requested_at().is_none());
    }
}
