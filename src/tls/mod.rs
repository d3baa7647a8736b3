//! TLS upgrade for event-loop sockets
//!
//! This module turns a connected, non-blocking socket into a TLS client
//! session and back.
//!
//! # Architecture
//!
//! 1. `SessionConfig` holds the client settings (protocol bounds, trust
//!    store, verification policy); `SessionManager` initializes it once
//! 2. `SecureSession::wrap` runs the handshake synchronously on the
//!    caller's socket and returns an established session
//! 3. `read` / `write` are single engine calls with no retry loop
//! 4. `close` releases the engine and hands the socket back in the mode the
//!    event loop had it in
//!
//! # Socket modes
//!
//! | Phase | Blocking | `TCP_NODELAY` |
//! |---|---|---|
//! | before `wrap` | caller's choice (usually non-blocking) | caller's choice |
//! | handshake | blocking | on |
//! | established | blocking | off |
//! | after `close` | restored | off |
//! | after failed `wrap` | restored | restored |
//!
//! # Examples
//!
//! ```no_run
//! use tlswrap::tls::SessionManager;
//! use std::net::TcpStream;
//! use std::time::Duration;
//!
//! let manager = SessionManager::new();
//! manager.init().unwrap();
//!
//! let stream = TcpStream::connect("example.com:443").unwrap();
//! stream.set_nonblocking(true).unwrap();
//!
//! let mut session = manager.wrap(stream, "example.com").unwrap();
//! session.write("GET / HTTP/1.0\r\nHost: example.com\r\n\r\n").unwrap();
//! let reply = session.read(4096, Some(Duration::from_secs(5))).unwrap();
//! println!("{}", String::from_utf8_lossy(&reply));
//!
//! // Back to a plain socket for the event loop
//! let stream = session.close();
//! ```

pub mod cert;
pub mod config;
pub mod handshake;
pub mod info;
pub mod manager;
pub mod session;

pub use cert::CertInfo;
pub use config::{ClientConfigBuilder, SessionConfig, TlsError, TlsVersion};
pub use handshake::WrapError;
pub use info::SessionInfo;
pub use manager::SessionManager;
pub use session::SecureSession;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
