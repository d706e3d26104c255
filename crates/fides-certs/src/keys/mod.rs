//! Contains primitives to create private keys, which are used to sign CAs.
//!
//! This module currently provides the following algorithms:
//!
//! ## ECDSA
//!
//! In order to work with ECDSA keys, this crate requires two dependencies:
//! [`ecdsa`], which provides primitives and traits, and [`p256`] which
//! implements the NIST P-256 elliptic curve and supports ECDSA. Only the
//! P-256 curve is supported.
//!
//! ```no_run
//! use fides_certs::keys::{ecdsa::SigningKey, CertificateKeypair};
//! let key = SigningKey::new(256).unwrap();
//! ```
//!
//! ## RSA
//!
//! In order to work with RSA keys, this crate requires the [`rsa`] dependency.
//! Keys are signed using PKCS#1 v1.5 with SHA-256. Moduli below
//! [`rsa::MINIMUM_KEY_SIZE`] bits are rejected.
//!
//! ```no_run
//! use fides_certs::keys::{rsa::SigningKey, CertificateKeypair};
//! let key = SigningKey::new(2048).unwrap();
//! ```
//!
//! It should be noted, that the crate is currently vulnerable to the recently
//! discovered Marvin attack. See:
//!
//! - <https://people.redhat.com/~hkario/marvin/>
//! - <https://rustsec.org/advisories/RUSTSEC-2023-0071.html>
//! - <https://github.com/RustCrypto/RSA/issues/19>
use std::fmt::Debug;

use p256::pkcs8::EncodePrivateKey;
use rand_core::{CryptoRngCore, OsRng};
use signature::{Keypair, Signer};
use x509_cert::spki::{
    EncodePublicKey, SignatureAlgorithmIdentifier, SignatureBitStringEncoding,
    SubjectPublicKeyInfoOwned,
};
use zeroize::Zeroizing;

pub mod ecdsa;
pub mod rsa;

/// An asymmetric key pair which can sign certificates.
///
/// The private half is only ever handed out as PKCS#8 DER wrapped in
/// [`Zeroizing`], so that it is wiped from memory once dropped.
pub trait CertificateKeypair
where
    Self: Debug + Sized + Send + Sync,
{
    type SigningKey: SignatureAlgorithmIdentifier
        + Keypair<VerifyingKey = Self::VerifyingKey>
        + Signer<Self::Signature>
        + EncodePrivateKey;
    type Signature: SignatureBitStringEncoding;
    type VerifyingKey: EncodePublicKey;

    type Error: std::error::Error + Send + Sync + 'static;

    /// The key size in bits used when the caller doesn't specify one.
    const DEFAULT_KEY_SIZE: usize;

    /// Generates a new key of `key_size` bits with the default random-number
    /// generator [`OsRng`].
    fn new(key_size: usize) -> Result<Self, Self::Error> {
        Self::new_with_rng(&mut OsRng, key_size)
    }

    /// Generates a new key of `key_size` bits with a custom random-number
    /// generator.
    fn new_with_rng<Rng>(rng: &mut Rng, key_size: usize) -> Result<Self, Self::Error>
    where
        Rng: CryptoRngCore + ?Sized;

    /// Returns the signing (private) key half of the keypair.
    fn signing_key(&self) -> &Self::SigningKey;

    /// Returns the verifying (public) half of the keypair.
    fn verifying_key(&self) -> Self::VerifyingKey;

    /// Creates a signing key pair from the DER-encoded PKCS#8 private key.
    fn from_pkcs8_der(input: &[u8]) -> Result<Self, Self::Error>;

    /// Creates a signing key pair from the PEM-encoded PKCS#8 private key.
    fn from_pkcs8_pem(input: &str) -> Result<Self, Self::Error>;

    /// Serializes the private key as PKCS#8 DER.
    fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>, Self::Error>;

    /// Serializes the private key as PKCS#8 PEM.
    fn to_pkcs8_pem(&self) -> Result<Zeroizing<String>, Self::Error>;

    /// Verifies `signature` over `message` using the public key contained in
    /// `public_key`.
    fn verify(
        public_key: &SubjectPublicKeyInfoOwned,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), Self::Error>;

    /// The name of the algorithm such as `rsa` or `ecdsa`.
    fn algorithm_name() -> &'static str;

    /// The key length in bits.
    fn key_size(&self) -> usize;
}
