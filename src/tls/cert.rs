//! Peer certificate summaries
//!
//! Extracts the parts of the peer's X.509 chain worth logging or showing to
//! a caller after the handshake.

use openssl::nid::Nid;
use openssl::ssl::SslRef;
use openssl::x509::{X509NameRef, X509Ref};
use std::net::IpAddr;

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Certificate subject (Common Name)
    pub subject: String,
    /// Certificate issuer (Common Name)
    pub issuer: String,
    /// Subject Alternative Names, as `DNS:name` or `IP:addr`
    pub subject_alt_names: Vec<String>,
}

impl CertInfo {
    /// Extract certificate information from an X.509 certificate
    pub fn from_x509(cert: &X509Ref) -> Self {
        CertInfo {
            subject: common_name(cert.subject_name()),
            issuer: common_name(cert.issuer_name()),
            subject_alt_names: subject_alt_names(cert),
        }
    }

    pub fn is_self_signed(&self) -> bool {
        self.subject == self.issuer
    }
}

fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .map(|entry| String::from_utf8_lossy(entry.data().as_slice()).into_owned())
        .unwrap_or_else(|| "<undef>".to_string())
}

fn subject_alt_names(cert: &X509Ref) -> Vec<String> {
    let Some(sans) = cert.subject_alt_names() else {
        return Vec::new();
    };

    sans.iter()
        .filter_map(|name| {
            if let Some(dns) = name.dnsname() {
                return Some(format!("DNS:{}", dns));
            }
            let ip = name.ipaddress()?;
            let addr = match ip.len() {
                4 => IpAddr::from(<[u8; 4]>::try_from(ip).ok()?),
                16 => IpAddr::from(<[u8; 16]>::try_from(ip).ok()?),
                _ => return None,
            };
            Some(format!("IP:{}", addr))
        })
        .collect()
}

/// Peer certificate chain, leaf first
pub fn peer_cert_chain(ssl: &SslRef) -> Vec<CertInfo> {
    let mut chain = Vec::new();

    // On the client side the peer chain already starts with the leaf
    if let Some(certs) = ssl.peer_cert_chain() {
        chain.extend(certs.iter().map(CertInfo::from_x509));
    } else if let Some(peer) = ssl.peer_certificate() {
        chain.push(CertInfo::from_x509(&peer));
    }

    chain
}
