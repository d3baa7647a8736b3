//! TLS session configuration
//!
//! This module provides the client-side configuration every secure session is
//! spawned from: negotiation method, protocol bounds, trust store and
//! verification policy.

use super::handshake::WrapError;
use super::session::SecureSession;
use openssl::ssl::{Ssl, SslContext, SslContextBuilder, SslMethod, SslVerifyMode};
use openssl::x509::X509;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::os::fd::AsFd;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl FromStr for TlsVersion {
    type Err = TlsError;

    /// Parse TLS version from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TLS errors
///
/// `OpenSsl`, `InvalidVersion`, `Configuration`, `Certificate` and
/// `NotInitialized` are configuration failures: no session is produced.
/// `Handshake` is fatal to `wrap`. `Read` and `Write` are fatal to the call
/// that produced them but leave the session in place.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Session manager is not initialized")]
    NotInitialized,

    #[error("Handshake failed (code {code}): {reason}")]
    Handshake { code: i32, reason: String },

    #[error("TLS read failed (code {code}): {reason}")]
    Read { code: i32, reason: String },

    #[error("TLS write failed (code {code}): {reason}")]
    Write { code: i32, reason: String },
}

impl TlsError {
    /// Engine diagnostic code (`SSL_get_error` value), if the error came
    /// from a handshake, read or write call
    pub fn code(&self) -> Option<i32> {
        match self {
            TlsError::Handshake { code, .. }
            | TlsError::Read { code, .. }
            | TlsError::Write { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True for errors raised while creating or binding the engine
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TlsError::OpenSsl(_)
                | TlsError::InvalidVersion(_)
                | TlsError::Configuration(_)
                | TlsError::Certificate(_)
                | TlsError::NotInitialized
        )
    }

    pub fn is_handshake(&self) -> bool {
        matches!(self, TlsError::Handshake { .. })
    }
}

impl From<TlsError> for std::io::Error {
    fn from(e: TlsError) -> Self {
        match e {
            TlsError::Io(e) => e,
            other => std::io::Error::other(other),
        }
    }
}

/// Releases an engine slot when dropped.
///
/// Every engine created from a configuration holds one of these, so the
/// configuration can report how many engines are alive.
#[derive(Debug)]
pub(crate) struct EngineToken {
    live: Arc<AtomicUsize>,
}

impl Drop for EngineToken {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Client TLS configuration (immutable after building)
///
/// Cloning is cheap: clones share the underlying OpenSSL context and the
/// live-engine counter.
#[derive(Clone)]
pub struct SessionConfig {
    pub(crate) ctx: SslContext,
    pub(crate) verify_hostname: bool,
    pub(crate) handshake_timeout: Option<Duration>,
    live_engines: Arc<AtomicUsize>,
}

impl SessionConfig {
    /// Default client configuration: system trust store, peer and hostname
    /// verification enabled
    pub fn new() -> Result<Self, TlsError> {
        Self::client().build()
    }

    /// Create a new client configuration builder
    pub fn client() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Whether the hostname passed to `wrap` is checked against the peer
    /// certificate
    pub fn verify_hostname(&self) -> bool {
        self.verify_hostname
    }

    /// Upper bound applied to socket reads/writes during the handshake
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout
    }

    /// Number of TLS engines created from this configuration that are still
    /// alive
    pub fn live_engines(&self) -> usize {
        self.live_engines.load(Ordering::Acquire)
    }

    /// Upgrade a connected socket to a secure session (client-side)
    pub fn wrap<S: AsFd>(&self, socket: S, hostname: &str) -> Result<SecureSession<S>, WrapError<S>> {
        SecureSession::wrap(self, socket, hostname)
    }

    /// Create a fresh engine bound to this configuration
    pub(crate) fn new_engine(&self) -> Result<(Ssl, EngineToken), TlsError> {
        let ssl = Ssl::new(&self.ctx)?;
        self.live_engines.fetch_add(1, Ordering::AcqRel);
        Ok((
            ssl,
            EngineToken {
                live: Arc::clone(&self.live_engines),
            },
        ))
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("verify_hostname", &self.verify_hostname)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("live_engines", &self.live_engines())
            .finish_non_exhaustive()
    }
}

/// Client configuration builder
///
/// Setters never panic. The first OpenSSL failure is remembered and reported
/// by `build()`.
pub struct ClientConfigBuilder {
    ctx_builder: Result<SslContextBuilder, TlsError>,
    verify_peer: bool,
    verify_hostname: bool,
    handshake_timeout: Option<Duration>,
}

impl ClientConfigBuilder {
    fn new() -> Self {
        let ctx_builder = SslContextBuilder::new(SslMethod::tls_client())
            .and_then(|mut builder| {
                builder.set_default_verify_paths()?;
                builder.set_verify(SslVerifyMode::PEER);
                Ok(builder)
            })
            .map_err(TlsError::from);

        ClientConfigBuilder {
            ctx_builder,
            verify_peer: true,
            verify_hostname: true,
            handshake_timeout: None,
        }
    }

    fn apply<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut SslContextBuilder) -> Result<(), TlsError>,
    {
        if let Ok(builder) = self.ctx_builder.as_mut() {
            if let Err(e) = f(builder) {
                self.ctx_builder = Err(e);
            }
        }
        self
    }

    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(self, min: TlsVersion, max: TlsVersion) -> Self {
        if min > max {
            return self.apply(move |_| {
                Err(TlsError::Configuration(format!(
                    "minimum version {} is above maximum {}",
                    min, max
                )))
            });
        }
        self.apply(move |builder| {
            builder.set_min_proto_version(Some(min.to_openssl_version()))?;
            builder.set_max_proto_version(Some(max.to_openssl_version()))?;
            Ok(())
        })
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(self, ciphers: &str) -> Self {
        self.apply(|builder| Ok(builder.set_cipher_list(ciphers)?))
    }

    /// Set cipher suites (for TLS 1.3)
    pub fn ciphersuites(self, ciphers: &str) -> Self {
        self.apply(|builder| Ok(builder.set_ciphersuites(ciphers)?))
    }

    /// Enable/disable peer certificate verification
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self.apply(move |builder| {
            if verify {
                builder.set_verify(SslVerifyMode::PEER);
            } else {
                builder.set_verify(SslVerifyMode::NONE);
            }
            Ok(())
        })
    }

    /// Enable/disable matching the wrap hostname against the peer
    /// certificate. Only meaningful while peer verification is on.
    pub fn verify_hostname(mut self, verify: bool) -> Self {
        self.verify_hostname = verify;
        self
    }

    /// Add trusted CA certificates from a PEM file
    pub fn ca_file<P: AsRef<Path>>(self, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        self.apply(move |builder| {
            builder.set_ca_file(&path).map_err(|e| {
                TlsError::Certificate(format!("Failed to load CA file {}: {}", path.display(), e))
            })
        })
    }

    /// Add trusted CA certificates from PEM data (one or more certificates)
    pub fn ca_pem(self, pem: &[u8]) -> Self {
        self.apply(|builder| {
            let certs = X509::stack_from_pem(pem)
                .map_err(|e| TlsError::Certificate(format!("Failed to parse CA PEM: {}", e)))?;
            if certs.is_empty() {
                return Err(TlsError::Certificate("CA PEM contains no certificates".to_string()));
            }
            for cert in certs {
                builder.cert_store_mut().add_cert(cert)?;
            }
            Ok(())
        })
    }

    /// Load client certificate and private key from one PEM file
    pub fn cert_file<P: AsRef<Path>>(self, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        self.apply(move |builder| {
            let mut cert_pem = Vec::new();
            File::open(&path)?.read_to_end(&mut cert_pem)?;

            use openssl::pkey::PKey;

            let cert = X509::from_pem(&cert_pem)
                .map_err(|e| TlsError::Certificate(format!("Failed to load certificate: {}", e)))?;
            builder.set_certificate(&cert)?;

            let key = PKey::private_key_from_pem(&cert_pem)
                .map_err(|e| TlsError::Certificate(format!("Failed to load private key: {}", e)))?;
            builder.set_private_key(&key)?;
            builder.check_private_key()?;

            Ok(())
        })
    }

    /// Bound every socket read/write performed during the handshake.
    ///
    /// Without it the handshake blocks until the peer answers or the
    /// connection fails.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        if timeout.is_zero() {
            return self.apply(|_| {
                Err(TlsError::Configuration("handshake timeout must be non-zero".to_string()))
            });
        }
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<SessionConfig, TlsError> {
        let ctx_builder = self.ctx_builder?;
        Ok(SessionConfig {
            ctx: ctx_builder.build(),
            verify_hostname: self.verify_peer && self.verify_hostname,
            handshake_timeout: self.handshake_timeout,
            live_engines: Arc::new(AtomicUsize::new(0)),
        })
    }
}
