//! Abstraction layer around the [`rsa`] crate. This module provides types
//! which abstract away the generation of RSA keys used for signing of CAs.
use rand_core::CryptoRngCore;
use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding},
    traits::PublicKeyParts,
};
use sha2::Sha256;
use signature::{Keypair, Verifier};
use snafu::{ResultExt, Snafu, ensure};
use tracing::instrument;
use x509_cert::{der::referenced::OwnedToRef, spki::SubjectPublicKeyInfoOwned};
use zeroize::Zeroizing;

use crate::keys::CertificateKeypair;

/// The smallest modulus (in bits) accepted for newly generated keys.
pub const MINIMUM_KEY_SIZE: usize = 2048;

pub const ALGORITHM_NAME: &str = "rsa";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "refusing to create RSA key with {key_size} bits, at least {minimum} bits are required"
    ))]
    WeakKey { key_size: usize, minimum: usize },

    #[snafu(display("failed to create RSA key"))]
    CreateKey { source: rsa::Error },

    #[snafu(display("failed to deserialize the signing (private) key from PKCS8"))]
    DeserializeSigningKey { source: rsa::pkcs8::Error },

    #[snafu(display("failed to serialize the signing (private) key as PKCS8"))]
    SerializeSigningKey { source: rsa::pkcs8::Error },

    #[snafu(display("failed to decode RSA public key from SPKI"))]
    DecodePublicKey { source: rsa::pkcs8::spki::Error },

    #[snafu(display("failed to decode RSA signature"))]
    DecodeSignature { source: signature::Error },

    #[snafu(display("RSA signature verification failed"))]
    VerifySignature { source: signature::Error },
}

#[derive(Debug)]
pub struct SigningKey {
    inner: rsa::pkcs1v15::SigningKey<Sha256>,
    key_size: usize,
}

impl SigningKey {
    fn from_private_key(private_key: RsaPrivateKey) -> Self {
        let key_size = private_key.size() * 8;
        let inner = rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key);

        Self { inner, key_size }
    }
}

impl CertificateKeypair for SigningKey {
    type Error = Error;
    type Signature = rsa::pkcs1v15::Signature;
    type SigningKey = rsa::pkcs1v15::SigningKey<Sha256>;
    type VerifyingKey = rsa::pkcs1v15::VerifyingKey<Sha256>;

    const DEFAULT_KEY_SIZE: usize = MINIMUM_KEY_SIZE;

    /// Generates a new RSA key with a custom random-number generator.
    ///
    /// It should be noted that the generation of the key takes longer for
    /// larger key sizes. The generation of an RSA key with a key size of
    /// `4096` can take up to multiple seconds.
    #[instrument(name = "create_rsa_signing_key", skip(rng))]
    fn new_with_rng<Rng>(rng: &mut Rng, key_size: usize) -> Result<Self>
    where
        Rng: CryptoRngCore + ?Sized,
    {
        ensure!(key_size >= MINIMUM_KEY_SIZE, WeakKeySnafu {
            key_size,
            minimum: MINIMUM_KEY_SIZE
        });

        let private_key = RsaPrivateKey::new(rng, key_size).context(CreateKeySnafu)?;
        Ok(Self::from_private_key(private_key))
    }

    fn signing_key(&self) -> &Self::SigningKey {
        &self.inner
    }

    fn verifying_key(&self) -> Self::VerifyingKey {
        self.inner.verifying_key()
    }

    #[instrument(name = "create_rsa_signing_key_from_pkcs8_der", skip_all)]
    fn from_pkcs8_der(input: &[u8]) -> Result<Self> {
        let private_key =
            RsaPrivateKey::from_pkcs8_der(input).context(DeserializeSigningKeySnafu)?;
        Ok(Self::from_private_key(private_key))
    }

    #[instrument(name = "create_rsa_signing_key_from_pkcs8_pem", skip_all)]
    fn from_pkcs8_pem(input: &str) -> Result<Self> {
        let private_key =
            RsaPrivateKey::from_pkcs8_pem(input).context(DeserializeSigningKeySnafu)?;
        Ok(Self::from_private_key(private_key))
    }

    fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        let document = self
            .inner
            .to_pkcs8_der()
            .context(SerializeSigningKeySnafu)?;

        Ok(Zeroizing::new(document.as_bytes().to_vec()))
    }

    fn to_pkcs8_pem(&self) -> Result<Zeroizing<String>> {
        self.inner
            .to_pkcs8_pem(LineEnding::LF)
            .context(SerializeSigningKeySnafu)
    }

    fn verify(
        public_key: &SubjectPublicKeyInfoOwned,
        message: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let public_key =
            RsaPublicKey::try_from(public_key.owned_to_ref()).context(DecodePublicKeySnafu)?;
        let signature =
            rsa::pkcs1v15::Signature::try_from(signature).context(DecodeSignatureSnafu)?;

        rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public_key)
            .verify(message, &signature)
            .context(VerifySignatureSnafu)
    }

    fn algorithm_name() -> &'static str {
        ALGORITHM_NAME
    }

    fn key_size(&self) -> usize {
        self.key_size
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(512)]
    #[case(1024)]
    #[case(2047)]
    fn reject_weak_keys(#[case] key_size: usize) {
        let err = SigningKey::new(key_size).expect_err("weak key must be rejected");
        assert!(matches!(err, Error::WeakKey { minimum: 2048, .. }));
    }

    #[test]
    fn pkcs8_der_roundtrip() {
        let key = SigningKey::new(2048).expect("failed to create RSA key");
        assert_eq!(key.key_size(), 2048);

        let der = key.to_pkcs8_der().expect("failed to serialize key");
        let parsed = SigningKey::from_pkcs8_der(&der).expect("failed to parse key");

        assert_eq!(parsed.key_size(), 2048);
        assert_eq!(
            *parsed.to_pkcs8_der().expect("failed to serialize key"),
            *der
        );
    }
}
