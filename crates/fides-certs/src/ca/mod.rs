//! Contains types and functions to generate and sign root and intermediate
//! certificate authorities (CAs).
use std::fmt::Debug;

use x509_cert::{Certificate, name::Name};

use crate::{
    CertificatePair,
    certificate::{CertificateExt, DistinguishedName},
    keys::{CertificateKeypair, ecdsa, rsa},
};

mod ca_builder;
mod consts;
mod x509;
pub use ca_builder::*;
pub use consts::*;
pub use x509::*;

/// A certificate authority (CA) which is used to sign intermediate CAs.
///
/// Use [`RootCaBuilder`] or [`IntermediateCaBuilder`] to create new CAs, or
/// [`CertificateAuthority::from_parts`] to wrap a previously issued one.
#[derive(Debug)]
pub struct CertificateAuthority<K>
where
    K: CertificateKeypair,
{
    certificate_pair: CertificatePair<K>,
}

impl<K> CertificateAuthority<K>
where
    K: CertificateKeypair,
{
    pub fn new(certificate_pair: CertificatePair<K>) -> Self {
        Self { certificate_pair }
    }

    /// Wraps an existing CA certificate and its (decrypted) key pair.
    pub fn from_parts(certificate: Certificate, key_pair: K) -> Self {
        Self::new(CertificatePair::new(certificate, key_pair))
    }

    /// Use this function in combination with [`RootCaBuilder`] to create new
    /// self-signed root CAs.
    pub fn root_builder<'a>() -> RootCaBuilderBuilder<'a, K> {
        RootCaBuilder::start_builder()
    }

    /// Use this function in combination with [`IntermediateCaBuilder`] to
    /// create new intermediate CAs signed by this CA.
    pub fn intermediate_builder(&self) -> IntermediateCaBuilderBuilder<'_, K> {
        IntermediateCaBuilder::start_builder(self)
    }

    pub fn certificate(&self) -> &Certificate {
        self.certificate_pair.certificate()
    }

    pub fn key_pair(&self) -> &K {
        self.certificate_pair.key_pair()
    }

    pub fn signing_key(&self) -> &K::SigningKey {
        self.certificate_pair.key_pair().signing_key()
    }

    pub fn subject_name(&self) -> &Name {
        &self.certificate().tbs_certificate.subject
    }

    pub fn subject_attributes(&self) -> DistinguishedName {
        self.certificate().subject_attributes()
    }

    pub fn into_certificate_pair(self) -> CertificatePair<K> {
        self.certificate_pair
    }
}

impl CertificateAuthority<rsa::SigningKey> {
    /// Same as [`Self::root_builder`], but enforces the RSA algorithm for key
    /// creation.
    pub fn root_builder_with_rsa<'a>() -> RootCaBuilderBuilder<'a, rsa::SigningKey> {
        Self::root_builder()
    }
}

impl CertificateAuthority<ecdsa::SigningKey> {
    /// Same as [`Self::root_builder`], but enforces the ECDSA algorithm for
    /// key creation.
    pub fn root_builder_with_ecdsa<'a>() -> RootCaBuilderBuilder<'a, ecdsa::SigningKey> {
        Self::root_builder()
    }
}
