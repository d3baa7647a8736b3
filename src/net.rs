//! Socket plumbing
//!
//! Helpers for the descriptor-level state a secure session has to juggle:
//! blocking mode, `TCP_NODELAY`, socket timeouts, readiness polling, and the
//! non-owning I/O adaptor the TLS engine is bound to.
//!
//! None of these helpers take ownership of the socket. They operate on any
//! `AsFd` handle so the event loop keeps owning the descriptor.

use socket2::SockRef;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::time::Duration;
use tracing::warn;

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// Wait until the descriptor is ready for `events`.
///
/// Returns `true` if the descriptor became ready, `false` if the timeout
/// elapsed first. `None` waits forever.
pub fn poll_fd<F: AsFd>(fd: &F, events: PollEvents, timeout: Option<Duration>) -> io::Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd: fd.as_fd().as_raw_fd(),
        events: match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
            PollEvents::Both => POLLIN | POLLOUT,
        },
        revents: 0,
    };

    let timeout_ms = timeout.map(timeout_millis).unwrap_or(-1);

    loop {
        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };
        if result >= 0 {
            return Ok(result > 0);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Round up to whole milliseconds so a 100us timeout does not become a
/// zero-length poll.
fn timeout_millis(timeout: Duration) -> i32 {
    let millis = timeout.as_nanos().div_ceil(1_000_000);
    i32::try_from(millis).unwrap_or(i32::MAX)
}

/// Check whether `O_NONBLOCK` is set on the descriptor
pub fn is_nonblocking<F: AsFd>(fd: &F) -> io::Result<bool> {
    let flags = unsafe { libc::fcntl(fd.as_fd().as_raw_fd(), libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(flags & libc::O_NONBLOCK != 0)
}

/// Switch the descriptor between blocking and non-blocking mode
pub fn set_nonblocking<F: AsFd>(fd: &F, nonblocking: bool) -> io::Result<()> {
    SockRef::from(fd).set_nonblocking(nonblocking)
}

/// Read `TCP_NODELAY`
pub fn nodelay<F: AsFd>(fd: &F) -> io::Result<bool> {
    SockRef::from(fd).nodelay()
}

/// Set `TCP_NODELAY` (true disables segment coalescing)
pub fn set_nodelay<F: AsFd>(fd: &F, nodelay: bool) -> io::Result<()> {
    SockRef::from(fd).set_nodelay(nodelay)
}

/// Descriptor state captured before a secure session touches the socket.
///
/// Restoring a snapshot puts the socket back the way the event loop left it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketMode {
    /// `O_NONBLOCK` at capture time
    pub nonblocking: bool,
    /// `TCP_NODELAY` at capture time, `None` if the socket is not TCP
    pub nodelay: Option<bool>,
    /// `SO_RCVTIMEO` at capture time
    pub read_timeout: Option<Duration>,
    /// `SO_SNDTIMEO` at capture time
    pub write_timeout: Option<Duration>,
}

impl SocketMode {
    /// Snapshot the current descriptor state
    pub fn capture<F: AsFd>(fd: &F) -> io::Result<Self> {
        let sock = SockRef::from(fd);
        Ok(SocketMode {
            nonblocking: is_nonblocking(fd)?,
            nodelay: sock.nodelay().ok(),
            read_timeout: sock.read_timeout()?,
            write_timeout: sock.write_timeout()?,
        })
    }

    /// Put only the blocking mode back
    pub fn restore_blocking<F: AsFd>(&self, fd: &F) -> io::Result<()> {
        set_nonblocking(fd, self.nonblocking)
    }

    /// Put the socket timeouts back
    pub fn restore_timeouts<F: AsFd>(&self, fd: &F) -> io::Result<()> {
        let sock = SockRef::from(fd);
        sock.set_read_timeout(self.read_timeout)?;
        sock.set_write_timeout(self.write_timeout)
    }

    /// Put everything back.
    ///
    /// Keeps going after a failure so one bad option does not leave the rest
    /// of the descriptor modified; the first error is returned.
    pub fn restore<F: AsFd>(&self, fd: &F) -> io::Result<()> {
        let mut first_err = None;

        if let Err(e) = self.restore_timeouts(fd) {
            first_err.get_or_insert(e);
        }
        if let Some(nodelay) = self.nodelay {
            if let Err(e) = set_nodelay(fd, nodelay) {
                first_err.get_or_insert(e);
            }
        }
        if let Err(e) = self.restore_blocking(fd) {
            first_err.get_or_insert(e);
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Restore, logging instead of failing. For error paths that already
    /// carry an error to return.
    pub(crate) fn restore_or_warn<F: AsFd>(&self, fd: &F) {
        if let Err(e) = self.restore(fd) {
            warn!(
                fd = fd.as_fd().as_raw_fd(),
                error = %e,
                "failed to restore socket mode"
            );
        }
    }
}

/// Non-owning I/O adaptor over a socket descriptor.
///
/// The TLS engine is bound to one of these instead of to the caller's
/// socket type, so the caller's handle never moves into the engine and can
/// always be handed back intact. The descriptor must outlive the adaptor.
/// `SecureSession` owns both and drops the engine first, and requires its
/// socket handle to keep the descriptor open and unchanged while wrapped.
#[derive(Debug)]
pub struct FdIo {
    fd: RawFd,
}

impl FdIo {
    pub(crate) fn new<F: AsFd>(fd: &F) -> Self {
        FdIo {
            fd: fd.as_fd().as_raw_fd(),
        }
    }

    /// The descriptor this adaptor performs I/O on
    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    fn borrowed(&self) -> BorrowedFd<'_> {
        // SAFETY: the owner of the descriptor keeps it open for as long as
        // this adaptor exists (see type-level docs).
        unsafe { BorrowedFd::borrow_raw(self.fd) }
    }
}

impl Read for FdIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let fd = self.borrowed();
        let sock = SockRef::from(&fd);
        (&*sock).read(buf)
    }
}

impl Write for FdIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let fd = self.borrowed();
        let sock = SockRef::from(&fd);
        (&*sock).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
