//! tlswrap - TLS upgrade/downgrade for event-loop sockets
//!
//! This crate wraps an already-connected socket in an OpenSSL client session
//! and later hands the plain socket back, keeping the socket's blocking mode
//! coherent with whichever side (event loop or TLS engine) drives it.

pub mod net;
pub mod tls;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use tls::{SecureSession, SessionConfig, SessionManager, TlsError, WrapError};
