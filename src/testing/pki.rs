//! Throwaway certificate authority for loopback tests
//!
//! Each `TestPki` is a fresh CA plus one leaf certificate for a single
//! hostname (DNS name or IP literal). Keys are P-256 so generation is fast
//! enough to do per test.

use crate::tls::{ClientConfigBuilder, SessionConfig, TlsError};
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{SslAcceptor, SslMethod, SslOptions};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509Name, X509NameBuilder, X509Ref, X509};
use std::net::IpAddr;

/// Common Name of every generated CA
pub const TEST_CA_NAME: &str = "tlswrap test CA";

const VALIDITY_DAYS: u32 = 30;

/// A CA and a leaf certificate signed by it
pub struct TestPki {
    /// Self-signed CA certificate
    pub ca: X509,
    /// Leaf certificate for `hostname`
    pub cert: X509,
    /// Private key of the leaf certificate
    pub key: PKey<Private>,
    /// Name the leaf certificate is valid for
    pub hostname: String,
}

impl TestPki {
    /// Generate a CA and a leaf certificate valid for `hostname`
    pub fn generate(hostname: &str) -> Result<Self, TlsError> {
        let ca_key = new_key()?;
        let ca = build_ca(&ca_key)?;
        let key = new_key()?;
        let cert = build_leaf(hostname, &key, &ca, &ca_key)?;

        Ok(TestPki {
            ca,
            cert,
            key,
            hostname: hostname.to_string(),
        })
    }

    /// CA certificate in PEM form, for a client trust store
    pub fn ca_pem(&self) -> Result<Vec<u8>, TlsError> {
        Ok(self.ca.to_pem()?)
    }

    /// Client builder that trusts this CA
    pub fn client_builder(&self) -> Result<ClientConfigBuilder, TlsError> {
        Ok(SessionConfig::client().ca_pem(&self.ca_pem()?))
    }

    /// Client configuration that trusts this CA, with full verification
    pub fn client_config(&self) -> Result<SessionConfig, TlsError> {
        self.client_builder()?.build()
    }

    /// Server-side acceptor presenting the leaf certificate.
    ///
    /// Session tickets are disabled so the server sends nothing after the
    /// handshake unless a test script writes.
    pub fn acceptor(&self) -> Result<SslAcceptor, TlsError> {
        let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server())?;
        builder.set_private_key(&self.key)?;
        builder.set_certificate(&self.cert)?;
        builder.add_extra_chain_cert(self.ca.clone())?;
        builder.check_private_key()?;
        builder.set_options(SslOptions::NO_TICKET);
        builder.set_num_tickets(0)?;
        Ok(builder.build())
    }
}

fn new_key() -> Result<PKey<Private>, ErrorStack> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let key = EcKey::generate(&group)?;
    PKey::from_ec_key(key)
}

fn name(common_name: &str) -> Result<X509Name, ErrorStack> {
    let mut builder = X509NameBuilder::new()?;
    builder.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    Ok(builder.build())
}

fn serial_number() -> Result<Asn1Integer, ErrorStack> {
    let mut serial = BigNum::new()?;
    serial.rand(64, MsbOption::MAYBE_ZERO, false)?;
    serial.to_asn1_integer()
}

fn base_builder(subject: &X509Name, key: &PKey<Private>) -> Result<X509Builder, ErrorStack> {
    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    let serial = serial_number()?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(subject)?;
    builder.set_pubkey(key)?;
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(VALIDITY_DAYS)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    Ok(builder)
}

fn build_ca(key: &PKey<Private>) -> Result<X509, ErrorStack> {
    let subject = name(TEST_CA_NAME)?;
    let mut builder = base_builder(&subject, key)?;
    builder.set_issuer_name(&subject)?;

    builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    builder.append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build()?)?;
    let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
    builder.append_extension(ski)?;

    builder.sign(key, MessageDigest::sha256())?;
    Ok(builder.build())
}

fn build_leaf(
    hostname: &str,
    key: &PKey<Private>,
    ca: &X509Ref,
    ca_key: &PKey<Private>,
) -> Result<X509, ErrorStack> {
    let subject = name(hostname)?;
    let mut builder = base_builder(&subject, key)?;
    builder.set_issuer_name(ca.subject_name())?;

    builder.append_extension(BasicConstraints::new().build()?)?;
    builder.append_extension(KeyUsage::new().critical().digital_signature().build()?)?;
    builder.append_extension(ExtendedKeyUsage::new().server_auth().build()?)?;

    let mut san = SubjectAlternativeName::new();
    if hostname.parse::<IpAddr>().is_ok() {
        san.ip(hostname);
    } else {
        san.dns(hostname);
    }
    let san = san.build(&builder.x509v3_context(Some(ca), None))?;
    builder.append_extension(san)?;

    let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(Some(ca), None))?;
    builder.append_extension(ski)?;
    let aki = AuthorityKeyIdentifier::new()
        .keyid(false)
        .issuer(false)
        .build(&builder.x509v3_context(Some(ca), None))?;
    builder.append_extension(aki)?;

    builder.sign(ca_key, MessageDigest::sha256())?;
    Ok(builder.build())
}
