use std::{
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
};

use crate::cutils::cerr;

/// An anonymous pipe whose ends can be closed independently.
///
/// Both ends are created with `O_CLOEXEC`, so they only survive an `exec` if they are duplicated
/// onto another descriptor first. Dropping the pipe closes whatever ends are still open.
#[derive(Debug)]
pub struct Pipe {
    read: Option<OwnedFd>,
    write: Option<OwnedFd>,
}

impl Pipe {
    /// Create a connected pair. Either both ends are open or an error is returned.
    pub fn acquire() -> io::Result<Self> {
        let mut fds: [RawFd; 2] = [-1; 2];
        // SAFETY: `fds` has room for the two descriptors `pipe2` writes.
        cerr(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) })?;

        // SAFETY: `pipe2` succeeded, so both descriptors are open and owned by nobody else.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        Ok(Self {
            read: Some(read),
            write: Some(write),
        })
    }

    pub fn read_fd(&self) -> Option<RawFd> {
        self.read.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn write_fd(&self) -> Option<RawFd> {
        self.write.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn is_read_open(&self) -> bool {
        self.read.is_some()
    }

    pub fn is_write_open(&self) -> bool {
        self.write.is_some()
    }

    /// Close the read end. Does nothing if it is already closed.
    pub fn close_read(&mut self) {
        self.read.take();
    }

    /// Close the write end. Does nothing if it is already closed.
    pub fn close_write(&mut self) {
        self.write.take();
    }

    /// Take ownership of the read end, leaving it closed in the pipe.
    pub fn take_read(&mut self) -> Option<OwnedFd> {
        self.read.take()
    }

    /// Take ownership of the write end, leaving it closed in the pipe.
    pub fn take_write(&mut self) -> Option<OwnedFd> {
        self.write.take()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs::File,
        io::{Read, Write},
    };

    use super::Pipe;

    #[test]
    fn transfers_bytes() {
        let mut pipe = Pipe::acquire().unwrap();
        let mut tx = File::from(pipe.take_write().unwrap());
        let mut rx = File::from(pipe.take_read().unwrap());

        tx.write_all(b"ping").unwrap();
        drop(tx);

        let mut received = String::new();
        rx.read_to_string(&mut received).unwrap();
        assert_eq!(received, "ping");
    }

    #[test]
    fn close_is_idempotent() {
        let mut pipe = Pipe::acquire().unwrap();

        pipe.close_read();
        pipe.close_read();
        assert!(!pipe.is_read_open());
        assert!(pipe.is_write_open());
        assert!(pipe.read_fd().is_none());
        assert!(pipe.take_read().is_none());

        pipe.close_write();
        pipe.close_write();
        assert!(!pipe.is_write_open());
        assert!(pipe.write_fd().is_none());
    }

    #[test]
    fn closing_write_end_delivers_eof() {
        let mut pipe = Pipe::acquire().unwrap();
        let mut rx = File::from(pipe.take_read().unwrap());
        pipe.close_write();

        let mut buf = [0u8; 8];
        assert_eq!(rx.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn ends_are_close_on_exec() {
        let pipe = Pipe::acquire().unwrap();
        for fd in [pipe.read_fd().unwrap(), pipe.write_fd().unwrap()] {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
            assert_ne!(flags & libc::FD_CLOEXEC, 0);
        }
    }
}
