//! This crate provides types, traits and functions to work with X.509 CA
//! certificates. It can be used to create self-signed root certificate
//! authorities (CAs) and intermediate CAs signed by them, and to protect the
//! CA private keys at rest.
//!
//! ## References
//!
//! - <https://datatracker.ietf.org/doc/html/rfc5280>
//! - <https://datatracker.ietf.org/doc/html/rfc5208>
use x509_cert::Certificate;

use crate::keys::CertificateKeypair;

pub mod ca;
pub mod certificate;
pub mod envelope;
pub mod keys;

/// Contains the certificate and the signing / embedded key pair.
///
/// A [`CertificateAuthority`](crate::ca::CertificateAuthority) uses this struct
/// internally to store the key pair which is used to sign the CA itself (in
/// case of a root) and all child CAs.
#[derive(Debug)]
pub struct CertificatePair<K>
where
    K: CertificateKeypair,
{
    certificate: Certificate,
    key_pair: K,
}

impl<K> CertificatePair<K>
where
    K: CertificateKeypair,
{
    pub fn new(certificate: Certificate, key_pair: K) -> Self {
        Self {
            certificate,
            key_pair,
        }
    }

    /// Returns a reference to the [`Certificate`].
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Returns a reference to the (signing) key pair.
    pub fn key_pair(&self) -> &K {
        &self.key_pair
    }

    pub fn into_parts(self) -> (Certificate, K) {
        (self.certificate, self.key_pair)
    }
}
