//! TLS handshake support
//!
//! Socket preparation around the synchronous client handshake, peer name
//! setup, and the error type returned by a failed `wrap`.
//!
//! The handshake runs on a blocking descriptor. OpenSSL's connect routine
//! performs its reads and writes back to back and reports `EAGAIN` from a
//! non-blocking socket as a failure, so the socket is switched to blocking
//! mode for the duration and the calling thread stalls until the handshake
//! completes or fails.

use super::config::TlsError;
use crate::net::{self, SocketMode};
use openssl::ssl::{ErrorCode, SslRef};
use socket2::SockRef;
use std::fmt;
use std::net::IpAddr;
use std::os::fd::{AsFd, AsRawFd};
use std::time::Duration;
use tracing::{debug, warn};

/// Handshake result helper
pub type HandshakeResult = std::result::Result<(), TlsError>;

/// A failed `wrap`.
///
/// Carries the socket back to the caller so a failed upgrade never costs the
/// connection. The socket has been returned to the blocking mode, timeouts
/// and `TCP_NODELAY` setting it had before `wrap` was called.
pub struct WrapError<S> {
    error: TlsError,
    socket: S,
}

impl<S> WrapError<S> {
    pub(crate) fn new(error: TlsError, socket: S) -> Self {
        WrapError { error, socket }
    }

    /// The reason the upgrade failed
    pub fn error(&self) -> &TlsError {
        &self.error
    }

    /// Borrow the socket that was handed back
    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// Take the socket back, discarding the error
    pub fn into_socket(self) -> S {
        self.socket
    }

    /// Take the error, dropping the socket
    pub fn into_error(self) -> TlsError {
        self.error
    }

    pub fn into_parts(self) -> (TlsError, S) {
        (self.error, self.socket)
    }
}

impl<S> fmt::Debug for WrapError<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<S> fmt::Display for WrapError<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TLS wrap failed: {}", self.error)
    }
}

impl<S> std::error::Error for WrapError<S> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<S> From<WrapError<S>> for TlsError {
    fn from(e: WrapError<S>) -> Self {
        e.error
    }
}

/// Split an engine error into its diagnostic code and a readable reason
pub(crate) fn diagnostic(err: &openssl::ssl::Error) -> (i32, String) {
    let code = err.code().as_raw();
    let reason = match (err.io_error(), err.ssl_error()) {
        (Some(io), _) => format!("{}: {}", describe_code(err.code()), io),
        (None, Some(stack)) => format!("{}: {}", describe_code(err.code()), stack),
        (None, None) => describe_code(err.code()).to_string(),
    };
    (code, reason)
}

fn describe_code(code: ErrorCode) -> &'static str {
    if code == ErrorCode::ZERO_RETURN {
        "peer closed the TLS session"
    } else if code == ErrorCode::WANT_READ {
        "engine wants to read"
    } else if code == ErrorCode::WANT_WRITE {
        "engine wants to write"
    } else if code == ErrorCode::SYSCALL {
        "socket error"
    } else if code == ErrorCode::SSL {
        "protocol error"
    } else {
        "engine error"
    }
}

/// Install the hostname on the engine.
///
/// SNI is best effort: a failure is logged and the handshake goes ahead.
/// IP literals are not valid SNI names and are only used for verification.
/// When `verify` is set the peer certificate must match `hostname`.
pub(crate) fn set_peer_name(ssl: &mut SslRef, hostname: &str, verify: bool) -> HandshakeResult {
    let ip = hostname.parse::<IpAddr>().ok();

    if ip.is_none() {
        if let Err(e) = ssl.set_hostname(hostname) {
            warn!(hostname, error = %e, "failed to set SNI hostname, continuing without it");
        }
    }

    if verify {
        let param = ssl.param_mut();
        match ip {
            Some(ip) => param.set_ip(ip)?,
            None => param.set_host(hostname)?,
        }
    }

    Ok(())
}

/// Take blocking ownership of the socket for the handshake.
///
/// Enables `TCP_NODELAY` so the small handshake flights are not held back,
/// forces blocking mode, and installs the optional handshake timeout.
/// A socket that is not TCP cannot take `TCP_NODELAY`; that is logged and
/// ignored.
pub(crate) fn prepare_socket<F: AsFd>(fd: &F, timeout: Option<Duration>) -> HandshakeResult {
    if let Err(e) = net::set_nodelay(fd, true) {
        warn!(fd = fd.as_fd().as_raw_fd(), error = %e, "failed to enable TCP_NODELAY");
    }

    net::set_nonblocking(fd, false)?;

    if let Some(timeout) = timeout {
        let sock = SockRef::from(fd);
        sock.set_read_timeout(Some(timeout))?;
        sock.set_write_timeout(Some(timeout))?;
    }

    Ok(())
}

/// Settle the socket after a successful handshake.
///
/// The socket stays blocking. `TCP_NODELAY` is cleared for the steady-state
/// data stream and the handshake timeout is replaced by whatever timeouts
/// the socket had before.
pub(crate) fn finish_socket<F: AsFd>(fd: &F, mode: &SocketMode) {
    let raw = fd.as_fd().as_raw_fd();

    if let Err(e) = net::set_nodelay(fd, false) {
        if mode.nodelay.is_some() {
            warn!(fd = raw, error = %e, "failed to clear TCP_NODELAY");
        }
    }

    if let Err(e) = mode.restore_timeouts(fd) {
        warn!(fd = raw, error = %e, "failed to restore socket timeouts");
    }

    debug!(fd = raw, "socket left in blocking mode for the TLS session");
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::ssl::{Ssl, SslContext, SslMethod};
    use std::net::{TcpListener, TcpStream};

    fn engine() -> Ssl {
        let ctx = SslContext::builder(SslMethod::tls_client()).unwrap().build();
        Ssl::new(&ctx).unwrap()
    }

    #[test]
    fn test_wrap_error_returns_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let fd = stream.as_raw_fd();

        let err = WrapError::new(TlsError::NotInitialized, stream);
        assert!(matches!(err.error(), TlsError::NotInitialized));
        assert!(err.to_string().contains("not initialized"));
        assert_eq!(err.socket().as_raw_fd(), fd);

        let (error, stream) = err.into_parts();
        assert!(error.is_configuration());
        assert_eq!(stream.as_raw_fd(), fd);
    }

    #[test]
    fn test_set_peer_name_hostname() {
        let mut ssl = engine();
        set_peer_name(&mut ssl, "example.test", true).unwrap();
        assert_eq!(
            ssl.servername(openssl::ssl::NameType::HOST_NAME),
            Some("example.test")
        );
    }

    #[test]
    fn test_set_peer_name_ip_skips_sni() {
        let mut ssl = engine();
        set_peer_name(&mut ssl, "127.0.0.1", true).unwrap();
        assert_eq!(ssl.servername(openssl::ssl::NameType::HOST_NAME), None);
    }

    #[test]
    fn test_prepare_and_finish_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        stream.set_nonblocking(true).unwrap();

        let mode = SocketMode::capture(&stream).unwrap();
        prepare_socket(&stream, Some(Duration::from_secs(2))).unwrap();

        assert!(!net::is_nonblocking(&stream).unwrap());
        assert!(stream.nodelay().unwrap());
        assert_eq!(stream.read_timeout().unwrap(), Some(Duration::from_secs(2)));

        finish_socket(&stream, &mode);

        assert!(!net::is_nonblocking(&stream).unwrap());
        assert!(!stream.nodelay().unwrap());
        assert_eq!(stream.read_timeout().unwrap(), None);
        assert_eq!(stream.write_timeout().unwrap(), None);
    }
}
