//! Secure session
//!
//! A `SecureSession` upgrades a connected socket owned by an event loop to a
//! TLS byte stream and hands it back on close.
//!
//! Lifecycle: a plain socket goes into [`SecureSession::wrap`], which runs
//! the handshake to completion before returning. A returned session is
//! always established. [`SecureSession::close`] consumes the session, so a
//! closed session cannot be used again. A failed `wrap` returns the socket
//! inside [`WrapError`] with the engine already released.
//!
//! A session is exclusive-owner: reads and writes take `&mut self`, one
//! reader and one writer at a time, from the thread that owns it.

use super::config::{EngineToken, SessionConfig, TlsError};
use super::handshake::{self, diagnostic, WrapError};
use super::info::SessionInfo;
use crate::net::{self, FdIo, PollEvents, SocketMode};
use bytes::{Bytes, BytesMut};
use openssl::ssl::{ErrorCode, SslStream};
use std::io;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Largest plaintext a single TLS record carries, and so the most one engine
/// read can return
const MAX_RECORD_PLAINTEXT: usize = 16 * 1024;

/// TLS session over a borrowed socket
///
/// `S` is whatever handle the event loop uses for the connection:
/// `TcpStream`, `&TcpStream`, `socket2::Socket`, ... The session keeps the
/// handle untouched and returns it from [`close`](Self::close).
///
/// The engine is bound to the descriptor `S::as_fd()` returns at `wrap`
/// time. `S` must keep that descriptor open and keep returning it until the
/// session is closed or dropped; a handle that swaps or closes its
/// descriptor through interior mutability while wrapped breaks this.
pub struct SecureSession<S: AsFd> {
    // Field order is drop order: the engine goes before the socket it is
    // bound to.
    stream: SslStream<FdIo>,
    _engine: EngineToken,
    config: SessionConfig,
    mode: SocketMode,
    info: SessionInfo,
    failed: bool,
    socket: S,
}

impl<S: AsFd> SecureSession<S> {
    /// Upgrade a connected socket to TLS (client-side handshake).
    ///
    /// On success the socket is in blocking mode with `TCP_NODELAY` cleared.
    /// On failure the engine has been released and the socket is returned in
    /// the mode it was passed in.
    pub fn wrap(config: &SessionConfig, socket: S, hostname: &str) -> Result<Self, WrapError<S>> {
        if hostname.is_empty() {
            return Err(WrapError::new(
                TlsError::Configuration("hostname must not be empty".to_string()),
                socket,
            ));
        }

        let fd = socket.as_fd().as_raw_fd();

        let mode = match SocketMode::capture(&socket) {
            Ok(mode) => mode,
            Err(e) => return Err(WrapError::new(e.into(), socket)),
        };

        let (mut ssl, engine) = match config.new_engine() {
            Ok(engine) => engine,
            Err(e) => return Err(WrapError::new(e, socket)),
        };
        debug!(fd, hostname, "TLS engine created");

        if let Err(e) = handshake::set_peer_name(&mut ssl, hostname, config.verify_hostname()) {
            return Err(WrapError::new(e, socket));
        }

        let mut stream = match SslStream::new(ssl, FdIo::new(&socket)) {
            Ok(stream) => stream,
            Err(e) => {
                return Err(WrapError::new(
                    TlsError::Configuration(format!(
                        "couldn't bind TLS engine to fd {}: {}",
                        fd, e
                    )),
                    socket,
                ));
            }
        };

        if let Err(e) = handshake::prepare_socket(&socket, config.handshake_timeout()) {
            drop(stream);
            mode.restore_or_warn(&socket);
            return Err(WrapError::new(e, socket));
        }

        debug!(fd, hostname, "starting TLS handshake");
        if let Err(e) = stream.connect() {
            let (code, reason) = diagnostic(&e);
            error!(fd, hostname, code, %reason, "TLS handshake failed");
            drop(stream);
            drop(engine);
            mode.restore_or_warn(&socket);
            return Err(WrapError::new(TlsError::Handshake { code, reason }, socket));
        }

        handshake::finish_socket(&socket, &mode);

        let info = SessionInfo::from_ssl(stream.ssl());
        debug!(
            fd,
            hostname,
            version = %info.version,
            cipher = %info.cipher,
            "TLS session established"
        );

        Ok(SecureSession {
            stream,
            _engine: engine,
            config: config.clone(),
            mode,
            info,
            failed: false,
            socket,
        })
    }

    /// Read up to `max_bytes` of decrypted data.
    ///
    /// With a timeout, the socket is first polled for readability for at
    /// most that long; if nothing arrives the result is empty. The timeout
    /// bounds only the wait: once the engine is called it may still block
    /// for the rest of a partially received record.
    ///
    /// Exactly one engine read is issued, so at most one record (16 KiB) is
    /// returned however large `max_bytes` is. An empty result is a normal
    /// outcome (no data, elapsed timeout, or the peer's close-notify).
    pub fn read(&mut self, max_bytes: usize, timeout: Option<Duration>) -> Result<Bytes, TlsError> {
        let mut buf = BytesMut::new();
        self.read_buf(&mut buf, max_bytes, timeout)?;
        Ok(buf.freeze())
    }

    /// Like [`read`](Self::read) but appends into a caller-owned buffer.
    ///
    /// Returns the number of bytes appended. On error the buffer is left as
    /// it was.
    pub fn read_buf(
        &mut self,
        buf: &mut BytesMut,
        max_bytes: usize,
        timeout: Option<Duration>,
    ) -> Result<usize, TlsError> {
        if max_bytes == 0 {
            return Ok(0);
        }

        if let Some(timeout) = timeout {
            if !self.wait_readable(timeout)? {
                debug!(fd = self.raw_fd(), ?timeout, "read timed out waiting for data");
                return Ok(0);
            }
        }

        let want = max_bytes.min(MAX_RECORD_PLAINTEXT);
        let start = buf.len();
        let end = start.checked_add(want).ok_or_else(|| {
            TlsError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "read buffer length overflow",
            ))
        })?;
        buf.resize(end, 0);

        match self.read_once(&mut buf[start..]) {
            Ok(n) => {
                buf.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                buf.truncate(start);
                Err(e)
            }
        }
    }

    /// Encrypt and send `data` with a single engine write.
    ///
    /// Accepts any contiguous byte view. Returns the number of bytes the
    /// engine accepted; short writes are the caller's to resend.
    pub fn write<B: AsRef<[u8]>>(&mut self, data: B) -> Result<usize, TlsError> {
        let data = data.as_ref();
        if data.is_empty() {
            return Ok(0);
        }

        match self.stream.ssl_write(data) {
            Ok(n) => Ok(n),
            Err(e) => {
                let (code, reason) = diagnostic(&e);
                debug!(fd = self.raw_fd(), code, %reason, "TLS write failed");
                self.failed = true;
                Err(TlsError::Write { code, reason })
            }
        }
    }

    /// The socket this session runs over
    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// Raw descriptor of the socket, for readiness registration
    pub fn raw_fd(&self) -> RawFd {
        self.socket.as_fd().as_raw_fd()
    }

    /// Configuration the session was created from
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Negotiated parameters, captured when the handshake completed
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Decrypted bytes buffered inside the engine
    pub fn pending(&self) -> usize {
        self.stream.ssl().pending()
    }

    /// Whether a read or write on this session has failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Release the engine and return the socket.
    ///
    /// No close-notify is sent; use [`shutdown`](Self::shutdown) for a clean
    /// TLS close. The socket goes back to the blocking mode it had before
    /// `wrap`.
    pub fn close(self) -> S {
        let SecureSession {
            stream,
            _engine,
            mode,
            socket,
            ..
        } = self;

        drop(stream);
        drop(_engine);

        let fd = socket.as_fd().as_raw_fd();
        if let Err(e) = mode.restore_blocking(&socket) {
            warn!(fd, error = %e, "failed to restore blocking mode on close");
        }
        debug!(fd, nonblocking = mode.nonblocking, "TLS session closed");

        socket
    }

    /// Send close-notify, then [`close`](Self::close).
    ///
    /// The notify is best effort and skipped after a failed read or write.
    pub fn shutdown(mut self) -> S {
        if !self.failed {
            if let Err(e) = self.stream.shutdown() {
                warn!(fd = self.raw_fd(), error = %e, "TLS close-notify failed");
            }
        }
        self.close()
    }

    fn wait_readable(&self, timeout: Duration) -> Result<bool, TlsError> {
        if self.pending() > 0 {
            return Ok(true);
        }
        Ok(net::poll_fd(&self.socket, PollEvents::Read, Some(timeout))?)
    }

    fn read_once(&mut self, dst: &mut [u8]) -> Result<usize, TlsError> {
        match self.stream.ssl_read(dst) {
            Ok(n) => Ok(n),
            Err(e) if e.code() == ErrorCode::ZERO_RETURN => {
                debug!(fd = self.raw_fd(), "peer sent close-notify");
                Ok(0)
            }
            Err(e) => {
                let (code, reason) = diagnostic(&e);
                debug!(fd = self.raw_fd(), code, %reason, "TLS read failed");
                self.failed = true;
                Err(TlsError::Read { code, reason })
            }
        }
    }
}

impl<S: AsFd> io::Read for SecureSession<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.read_once(buf).map_err(io::Error::from)
    }
}

impl<S: AsFd> io::Write for SecureSession<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        SecureSession::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: AsFd> AsFd for SecureSession<S> {
    fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

impl<S: AsFd> std::fmt::Debug for SecureSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("fd", &self.raw_fd())
            .field("version", &self.info.version)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestPki, TestServer};
    use std::io::{Read as _, Write as _};

    #[test]
    fn test_tls_client_server_exchange() {
        let pki = TestPki::generate("example.test").unwrap();
        let config = pki.client_config().unwrap();

        let server = TestServer::spawn(&pki, |tls| {
            let mut buf = [0u8; 5];
            tls.read_exact(&mut buf)?;
            assert_eq!(&buf, b"Hello");
            tls.write_all(b"World")?;
            Ok(())
        })
        .unwrap();

        let stream = server.connect().unwrap();
        let mut session = config.wrap(stream, "example.test").unwrap();
        assert!(!session.failed());
        assert!(session.info().version.contains("TLS"));

        assert_eq!(session.write(b"Hello").unwrap(), 5);

        let data = session.read(5, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(&data[..], b"World");

        let _stream = session.shutdown();
        server.join().unwrap();
    }

    #[test]
    fn test_read_zero_bytes_is_immediate() {
        let pki = TestPki::generate("example.test").unwrap();
        let config = pki.client_config().unwrap();

        // Server stays silent until the client is done
        let server = TestServer::spawn(&pki, |tls| {
            let mut buf = [0u8; 1];
            let _ = tls.read(&mut buf);
            Ok(())
        })
        .unwrap();

        let mut session = config.wrap(server.connect().unwrap(), "example.test").unwrap();

        let data = session.read(0, None).unwrap();
        assert!(data.is_empty());

        let mut buf = BytesMut::from(&b"keep"[..]);
        assert_eq!(session.read_buf(&mut buf, 0, None).unwrap(), 0);
        assert_eq!(&buf[..], b"keep");

        session.write(b"x").unwrap();
        drop(session.close());
        server.join().unwrap();
    }

    #[test]
    fn test_read_timeout_returns_empty() {
        let pki = TestPki::generate("example.test").unwrap();
        let config = pki.client_config().unwrap();

        let server = TestServer::spawn(&pki, |tls| {
            let mut buf = [0u8; 1];
            let _ = tls.read(&mut buf);
            Ok(())
        })
        .unwrap();

        let mut session = config.wrap(server.connect().unwrap(), "example.test").unwrap();

        let data = session.read(64, Some(Duration::from_millis(100))).unwrap();
        assert!(data.is_empty());
        assert!(!session.failed());

        session.write(b"x").unwrap();
        drop(session.close());
        server.join().unwrap();
    }

    #[test]
    fn test_oversized_read_is_clamped() {
        let pki = TestPki::generate("example.test").unwrap();
        let config = pki.client_config().unwrap();

        let server = TestServer::spawn(&pki, |tls| {
            tls.write_all(b"first")?;
            tls.write_all(b"second")?;
            let mut buf = [0u8; 1];
            let _ = tls.read(&mut buf);
            Ok(())
        })
        .unwrap();

        let mut session = config.wrap(server.connect().unwrap(), "example.test").unwrap();

        let data = session.read(usize::MAX, Some(Duration::from_secs(5))).unwrap();
        assert!(!data.is_empty());
        assert!(b"firstsecond".starts_with(&data));

        let mut buf = BytesMut::from(&b"x"[..]);
        let mut received = data.to_vec();
        while received.len() < b"firstsecond".len() {
            let before = buf.len();
            let n = session
                .read_buf(&mut buf, usize::MAX, Some(Duration::from_secs(5)))
                .unwrap();
            assert!(n > 0);
            assert_eq!(buf.len(), before + n);
            received.extend_from_slice(&buf[before..]);
        }
        assert_eq!(&buf[..1], b"x");
        assert_eq!(received, b"firstsecond");

        session.write(b"x").unwrap();
        drop(session.close());
        server.join().unwrap();
    }

    #[test]
    fn test_io_traits() {
        let pki = TestPki::generate("example.test").unwrap();
        let config = pki.client_config().unwrap();

        let server = TestServer::spawn(&pki, |tls| {
            let mut buf = [0u8; 11];
            tls.read_exact(&mut buf)?;
            tls.write_all(&buf)?;
            Ok(())
        })
        .unwrap();

        let mut session = config.wrap(server.connect().unwrap(), "example.test").unwrap();

        io::Write::write_all(&mut session, b"hello world").unwrap();
        let mut echoed = [0u8; 11];
        io::Read::read_exact(&mut session, &mut echoed).unwrap();
        assert_eq!(&echoed, b"hello world");

        drop(session.close());
        server.join().unwrap();
    }
}
