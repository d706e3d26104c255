//! Abstraction layer around the [`ecdsa`] crate. This module provides types
//! which abstract away the generation of ECDSA keys on the NIST P-256 curve.
use p256::{
    NistP256,
    pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding},
};
use rand_core::CryptoRngCore;
use signature::Verifier;
use snafu::{ResultExt, Snafu, ensure};
use tracing::instrument;
use x509_cert::{der::referenced::OwnedToRef, spki::SubjectPublicKeyInfoOwned};
use zeroize::Zeroizing;

use crate::keys::CertificateKeypair;

/// The only supported curve size in bits (P-256).
pub const KEY_SIZE: usize = 256;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "refusing to create ECDSA key with {key_size} bits, at least {minimum} bits are required"
    ))]
    WeakKey { key_size: usize, minimum: usize },

    #[snafu(display("ECDSA keys with {key_size} bits are not supported, only P-256 is"))]
    UnsupportedKeySize { key_size: usize },

    #[snafu(display("failed to deserialize the signing (private) key from PKCS8"))]
    DeserializeSigningKey { source: p256::pkcs8::Error },

    #[snafu(display("failed to serialize the signing (private) key as PKCS8"))]
    SerializeSigningKey { source: p256::pkcs8::Error },

    #[snafu(display("failed to decode ECDSA public key from SPKI"))]
    DecodePublicKey { source: p256::pkcs8::spki::Error },

    #[snafu(display("failed to decode ECDSA signature"))]
    DecodeSignature { source: ecdsa::Error },

    #[snafu(display("ECDSA signature verification failed"))]
    VerifySignature { source: ecdsa::Error },
}

#[derive(Debug)]
pub struct SigningKey(p256::ecdsa::SigningKey);

impl CertificateKeypair for SigningKey {
    type Error = Error;
    type Signature = ecdsa::der::Signature<NistP256>;
    type SigningKey = p256::ecdsa::SigningKey;
    type VerifyingKey = p256::ecdsa::VerifyingKey;

    const DEFAULT_KEY_SIZE: usize = KEY_SIZE;

    #[instrument(name = "create_ecdsa_signing_key", skip(rng))]
    fn new_with_rng<Rng>(rng: &mut Rng, key_size: usize) -> Result<Self>
    where
        Rng: CryptoRngCore + ?Sized,
    {
        ensure!(key_size >= KEY_SIZE, WeakKeySnafu {
            key_size,
            minimum: KEY_SIZE
        });
        ensure!(key_size == KEY_SIZE, UnsupportedKeySizeSnafu { key_size });

        let mut rng = rng;
        let signing_key = p256::ecdsa::SigningKey::random(&mut rng);

        Ok(Self(signing_key))
    }

    fn signing_key(&self) -> &Self::SigningKey {
        &self.0
    }

    fn verifying_key(&self) -> Self::VerifyingKey {
        *self.0.verifying_key()
    }

    #[instrument(name = "create_ecdsa_signing_key_from_pkcs8_der", skip_all)]
    fn from_pkcs8_der(input: &[u8]) -> Result<Self> {
        let signing_key =
            p256::ecdsa::SigningKey::from_pkcs8_der(input).context(DeserializeSigningKeySnafu)?;

        Ok(Self(signing_key))
    }

    #[instrument(name = "create_ecdsa_signing_key_from_pkcs8_pem", skip_all)]
    fn from_pkcs8_pem(input: &str) -> Result<Self> {
        let signing_key =
            p256::ecdsa::SigningKey::from_pkcs8_pem(input).context(DeserializeSigningKeySnafu)?;

        Ok(Self(signing_key))
    }

    fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        let document = self.0.to_pkcs8_der().context(SerializeSigningKeySnafu)?;
        Ok(Zeroizing::new(document.as_bytes().to_vec()))
    }

    fn to_pkcs8_pem(&self) -> Result<Zeroizing<String>> {
        self.0
            .to_pkcs8_pem(LineEnding::LF)
            .context(SerializeSigningKeySnafu)
    }

    fn verify(
        public_key: &SubjectPublicKeyInfoOwned,
        message: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let verifying_key = p256::ecdsa::VerifyingKey::try_from(public_key.owned_to_ref())
            .context(DecodePublicKeySnafu)?;
        let signature = p256::ecdsa::DerSignature::from_bytes(signature)
            .context(DecodeSignatureSnafu)?;

        verifying_key
            .verify(message, &signature)
            .context(VerifySignatureSnafu)
    }

    fn algorithm_name() -> &'static str {
        "ecdsa"
    }

    fn key_size(&self) -> usize {
        KEY_SIZE
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use signature::Signer;
    use x509_cert::der::Decode;

    use super::*;

    #[test]
    fn reject_small_curve() {
        let err = SigningKey::new(192).expect_err("small curve must be rejected");
        assert!(matches!(err, Error::WeakKey { minimum: 256, .. }));
    }

    #[rstest]
    #[case(384)]
    #[case(521)]
    fn reject_unsupported_curve(#[case] key_size: usize) {
        let err = SigningKey::new(key_size).expect_err("curve must be rejected");
        assert!(matches!(err, Error::UnsupportedKeySize { .. }));
    }

    #[test]
    fn sign_and_verify() {
        use x509_cert::spki::EncodePublicKey;

        let key = SigningKey::new(256).expect("failed to create ECDSA key");
        let spki_der = key
            .verifying_key()
            .to_public_key_der()
            .expect("failed to encode public key");
        let spki = SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes())
            .expect("failed to decode SPKI");

        let signature: ecdsa::der::Signature<NistP256> = key.signing_key().sign(b"message");
        let signature = signature.as_bytes().to_vec();

        SigningKey::verify(&spki, b"message", &signature).expect("signature must verify");
        assert!(SigningKey::verify(&spki, b"tampered", &signature).is_err());
    }
}
