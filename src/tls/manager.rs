//! Session manager
//!
//! Holds the one client configuration an application spawns its sessions
//! from. The manager is an ordinary value: the application creates it during
//! setup and shares it (by reference, `Arc`, or a `static`) with whatever
//! code wraps sockets.

use super::config::{ClientConfigBuilder, SessionConfig, TlsError};
use super::handshake::WrapError;
use super::session::SecureSession;
use std::os::fd::AsFd;
use std::sync::OnceLock;
use tracing::debug;

/// Lazily initialized holder of the client configuration
#[derive(Debug, Default)]
pub struct SessionManager {
    config: OnceLock<SessionConfig>,
}

impl SessionManager {
    /// Create an uninitialized manager
    pub const fn new() -> Self {
        SessionManager {
            config: OnceLock::new(),
        }
    }

    /// Initialize with the default client configuration.
    ///
    /// Idempotent: once a configuration exists, later calls return it
    /// unchanged.
    pub fn init(&self) -> Result<&SessionConfig, TlsError> {
        self.init_with(SessionConfig::client())
    }

    /// Initialize from a custom builder.
    ///
    /// If the manager is already initialized the builder is discarded and
    /// the existing configuration returned.
    pub fn init_with(&self, builder: ClientConfigBuilder) -> Result<&SessionConfig, TlsError> {
        if let Some(config) = self.config.get() {
            debug!("session manager already initialized");
            return Ok(config);
        }

        openssl::init();
        let config = builder.build()?;
        debug!(?config, "session manager initialized");

        // A concurrent init may have won the race; either way one
        // configuration is kept.
        Ok(self.config.get_or_init(|| config))
    }

    /// The configuration, if initialized
    pub fn config(&self) -> Option<&SessionConfig> {
        self.config.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.config.get().is_some()
    }

    /// Wrap a socket using the managed configuration.
    ///
    /// Fails with [`TlsError::NotInitialized`] (handing the socket back) if
    /// `init` has not been called.
    pub fn wrap<S: AsFd>(&self, socket: S, hostname: &str) -> Result<SecureSession<S>, WrapError<S>> {
        match self.config.get() {
            Some(config) => SecureSession::wrap(config, socket, hostname),
            None => Err(WrapError::new(TlsError::NotInitialized, socket)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::os::fd::AsRawFd;

    #[test]
    fn test_init_is_idempotent() {
        let manager = SessionManager::new();
        assert!(!manager.is_initialized());

        let first = manager.init().unwrap() as *const SessionConfig;
        let second = manager.init().unwrap() as *const SessionConfig;
        assert_eq!(first, second);

        // A different builder does not replace the existing configuration
        let third = manager
            .init_with(SessionConfig::client().verify_peer(false))
            .unwrap();
        assert_eq!(third as *const SessionConfig, first);
        assert!(third.verify_hostname());
    }

    #[test]
    fn test_failed_init_leaves_manager_empty() {
        let manager = SessionManager::new();
        let result = manager.init_with(SessionConfig::client().ca_pem(b"garbage"));
        assert!(result.is_err());
        assert!(manager.config().is_none());

        assert!(manager.init().is_ok());
        assert!(manager.is_initialized());
    }

    #[test]
    fn test_wrap_before_init_returns_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let fd = stream.as_raw_fd();

        let manager = SessionManager::new();
        let err = manager.wrap(stream, "example.test").unwrap_err();

        assert!(matches!(err.error(), TlsError::NotInitialized));
        assert_eq!(err.into_socket().as_raw_fd(), fd);
    }

    #[test]
    fn test_static_manager() {
        static MANAGER: SessionManager = SessionManager::new();
        assert!(MANAGER.init().is_ok());
        assert!(MANAGER.is_initialized());
    }
}
