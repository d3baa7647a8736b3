//! Negotiated session parameters
//!
//! Captured once the handshake completes. The values do not change for the
//! lifetime of the session.

use super::cert::{peer_cert_chain, CertInfo};
use openssl::ssl::{NameType, SslRef};

/// What the handshake settled on
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    /// Negotiated TLS version (e.g., "TLSv1.3")
    pub version: String,

    /// Negotiated cipher suite
    pub cipher: String,

    /// SNI name sent to the server
    pub servername: Option<String>,

    /// Certificate chain (index 0 is the peer cert)
    pub cert_chain: Vec<CertInfo>,
}

impl SessionInfo {
    /// Read the negotiated parameters off an established engine
    pub fn from_ssl(ssl: &SslRef) -> Self {
        SessionInfo {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| "<undef>".to_string()),
            servername: ssl.servername(NameType::HOST_NAME).map(|s| s.to_string()),
            cert_chain: peer_cert_chain(ssl),
        }
    }

    /// Peer certificate (chain index 0)
    pub fn peer_cert(&self) -> Option<&CertInfo> {
        self.cert_chain.first()
    }

    /// Certificate by chain index
    pub fn cert(&self, index: usize) -> Option<&CertInfo> {
        self.cert_chain.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestPki;

    #[test]
    fn test_default_info() {
        let info = SessionInfo::default();
        assert!(info.version.is_empty());
        assert!(info.peer_cert().is_none());
    }

    #[test]
    fn test_cert_lookup() {
        let pki = TestPki::generate("example.test").unwrap();
        let info = SessionInfo {
            version: "TLSv1.3".to_string(),
            cipher: "TLS_AES_256_GCM_SHA384".to_string(),
            servername: Some("example.test".to_string()),
            cert_chain: vec![CertInfo::from_x509(&pki.cert), CertInfo::from_x509(&pki.ca)],
        };

        assert_eq!(info.peer_cert().unwrap().subject, "example.test");
        assert_eq!(info.cert(1).unwrap().subject, crate::testing::TEST_CA_NAME);
        assert!(info.cert(2).is_none());
    }
}
