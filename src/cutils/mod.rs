use std::{
    ffi::{CString, OsStr},
    io,
    os::{fd::RawFd, unix::prelude::OsStrExt},
};

pub fn cerr<Int: Copy + TryInto<libc::c_long>>(res: Int) -> std::io::Result<Int> {
    match res.try_into() {
        Ok(-1) => Err(std::io::Error::last_os_error()),
        _ => Ok(res),
    }
}

/// Returns `true` if the error was caused by a signal interrupting a system call.
pub fn was_interrupted(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Interrupted
}

/// Returns `true` if the operation would have blocked on a non-blocking descriptor.
pub fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

/// Returns `true` if the error reports that the other end of a pipe was closed.
pub fn is_broken_pipe(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::BrokenPipe
}

/// Put a file descriptor in non-blocking mode.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: `fcntl` with `F_GETFL`/`F_SETFL` cannot cause UB even on an invalid descriptor.
    let flags = cerr(unsafe { libc::fcntl(fd, libc::F_GETFL, 0) })?;
    cerr(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;

    Ok(())
}

/// Create a C string from an OS string, failing with `InvalidInput` if it contains a NUL byte.
pub fn to_cstring(s: impl AsRef<OsStr>) -> io::Result<CString> {
    CString::new(s.as_ref().as_bytes()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{:?} contains a nul byte", s.as_ref()),
        )
    })
}

#[cfg(test)]
mod test {
    use std::io;

    use super::{cerr, is_broken_pipe, set_nonblocking, to_cstring, would_block};

    #[test]
    fn cerr_maps_minus_one_to_os_error() {
        assert_eq!(cerr(5).unwrap(), 5);
        assert_eq!(cerr(0i64).unwrap(), 0);
        let err = cerr(unsafe { libc::close(-1) }).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn error_classification() {
        assert!(would_block(&io::Error::from_raw_os_error(libc::EAGAIN)));
        assert!(is_broken_pipe(&io::Error::from_raw_os_error(libc::EPIPE)));
        assert!(!is_broken_pipe(&io::Error::from_raw_os_error(libc::EIO)));
    }

    #[test]
    fn nonblocking_read_on_empty_pipe() {
        let mut fds = [0; 2];
        cerr(unsafe { libc::pipe(fds.as_mut_ptr()) }).unwrap();
        set_nonblocking(fds[0]).unwrap();

        let mut buf = [0u8; 4];
        let res = cerr(unsafe { libc::read(fds[0], buf.as_mut_ptr().cast(), buf.len()) });
        assert!(would_block(&res.unwrap_err()));

        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }

    #[test]
    fn cstring_rejects_nul() {
        assert_eq!(to_cstring("echo").unwrap().as_bytes(), b"echo");
        let err = to_cstring("ec\0ho").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
