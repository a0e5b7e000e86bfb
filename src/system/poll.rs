use std::{
    collections::BTreeMap,
    io,
    os::fd::{AsRawFd, RawFd},
    time::Duration,
};

use crate::cutils::{cerr, was_interrupted};
use libc::{c_short, pollfd, POLLERR, POLLHUP, POLLIN, POLLOUT};

/// The kind of event that will be monitored for a file descriptor.
#[derive(Copy, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// Data may be read without blocking, or the write end was closed.
    Readable,
    /// Data may be written without blocking.
    Writable,
}

/// A set of indexed file descriptors to be polled using the [`poll`](https://manpage.me/?q=poll) system call.
pub struct PollSet<K> {
    fds: BTreeMap<K, (RawFd, c_short)>,
}

impl<K: Eq + PartialEq + Ord + PartialOrd + Clone> PollSet<K> {
    /// Create an empty set of file descriptors.
    pub const fn new() -> Self {
        Self {
            fds: BTreeMap::new(),
        }
    }

    /// Add a file descriptor under the provided key. This descriptor will be checked for the given
    /// poll event.
    ///
    /// If the provided key is already in the set, calling this function will overwrite the file
    /// descriptor for that key.
    pub fn add_fd<F: AsRawFd>(&mut self, key: K, fd: &F, event: PollEvent) {
        let event = match event {
            PollEvent::Readable => POLLIN,
            PollEvent::Writable => POLLOUT,
        };
        self.fds.insert(key, (fd.as_raw_fd(), event));
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Poll the set of file descriptors and return the keys of the descriptors that are ready.
    ///
    /// Blocks for at most `timeout`. Hang-ups and errors are reported as ready so the caller
    /// observes them on its next read or write. An interrupted wait reports nothing ready.
    pub fn poll(&self, timeout: Duration) -> io::Result<Vec<K>> {
        let mut fds: Vec<pollfd> = self
            .fds
            .values()
            .map(|&(fd, events)| pollfd {
                fd,
                events,
                revents: 0,
            })
            .collect();

        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        // SAFETY: `fds` is a valid buffer of `fds.len()` initialized `pollfd` structures.
        let n = match cerr(unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as _, timeout_ms) }) {
            Ok(n) => n,
            Err(err) if was_interrupted(&err) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut keys = Vec::with_capacity(n as usize);

        for (key, fd) in self.fds.keys().zip(fds) {
            let ready = fd.revents & (fd.events | POLLHUP | POLLERR);

            if ready != 0 {
                keys.push(key.clone());
            }
        }

        Ok(keys)
    }
}
