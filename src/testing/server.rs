//! Scripted loopback peer
//!
//! A `TestServer` listens on an ephemeral loopback port, accepts exactly one
//! connection, and runs a script against it on its own thread. The listener
//! is bound before `spawn` returns, so clients can connect right away.

use super::pki::TestPki;
use crate::tls::TlsError;
use openssl::ssl::SslStream;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use tracing::debug;

/// One-connection test server
pub struct TestServer {
    addr: SocketAddr,
    handle: JoinHandle<io::Result<()>>,
}

impl TestServer {
    /// Accept one TLS connection presenting `pki`'s leaf certificate and run
    /// `script` on it
    pub fn spawn<F>(pki: &TestPki, script: F) -> Result<Self, TlsError>
    where
        F: FnOnce(&mut SslStream<TcpStream>) -> io::Result<()> + Send + 'static,
    {
        let acceptor = pki.acceptor()?;
        Self::spawn_plain(move |tcp| {
            let mut tls = acceptor
                .accept(tcp)
                .map_err(|e| io::Error::other(format!("TLS accept failed: {}", e)))?;
            debug!(version = tls.ssl().version_str(), "test server handshake done");
            script(&mut tls)
        })
    }

    /// Accept one plain TCP connection and run `script` on it
    pub fn spawn_plain<F>(script: F) -> Result<Self, TlsError>
    where
        F: FnOnce(TcpStream) -> io::Result<()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;

        let handle = thread::spawn(move || {
            let (tcp, peer) = listener.accept()?;
            debug!(%peer, "test server accepted connection");
            script(tcp)
        });

        Ok(TestServer { addr, handle })
    }

    /// Address the server listens on
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connect to the server the way an event loop would: connected, then
    /// switched to non-blocking mode
    pub fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(self.addr)?;
        stream.set_nonblocking(true)?;
        Ok(stream)
    }

    /// Wait for the script to finish. A panic in the script is re-raised
    /// here so assertions inside it fail the test.
    pub fn join(self) -> io::Result<()> {
        match self.handle.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
