//! Ephemeral elliptic-curve Diffie-Hellman key exchange.
use p256::{PublicKey, SecretKey, elliptic_curve::sec1::ToEncodedPoint};
use rand_core::OsRng;
use snafu::{ResultExt, Snafu};
use zeroize::Zeroizing;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to decode public key, expected a SEC1 encoded point"))]
    DecodePublicKey { source: p256::elliptic_curve::Error },
}

/// Narrow interface around the elliptic-curve library used for the key
/// exchange.
pub trait KeyExchange: Send + Sync + 'static {
    type PrivateKey: Send + Sync + 'static;
    type PublicKey: Send + Sync + 'static;

    /// The name of the curve, such as `P-256`.
    fn curve_name(&self) -> &'static str;

    /// Generates a fresh ephemeral key pair.
    fn generate_key_pair(&self) -> (Self::PrivateKey, Self::PublicKey);

    /// Encodes the public key as compressed point.
    fn encode_public_key(&self, public_key: &Self::PublicKey) -> Vec<u8>;

    /// Decodes a public key from either a compressed or uncompressed point.
    fn decode_public_key(&self, input: &[u8]) -> Result<Self::PublicKey, Error>;

    /// Computes the raw ECDH shared secret.
    fn compute_shared_secret(
        &self,
        private_key: &Self::PrivateKey,
        public_key: &Self::PublicKey,
    ) -> Zeroizing<Vec<u8>>;
}

/// ECDH on the NIST P-256 curve.
#[derive(Clone, Copy, Debug, Default)]
pub struct P256KeyExchange;

impl KeyExchange for P256KeyExchange {
    type PrivateKey = SecretKey;
    type PublicKey = PublicKey;

    fn curve_name(&self) -> &'static str {
        "P-256"
    }

    fn generate_key_pair(&self) -> (SecretKey, PublicKey) {
        let private_key = SecretKey::random(&mut OsRng);
        let public_key = private_key.public_key();

        (private_key, public_key)
    }

    fn encode_public_key(&self, public_key: &PublicKey) -> Vec<u8> {
        public_key.to_encoded_point(true).as_bytes().to_vec()
    }

    fn decode_public_key(&self, input: &[u8]) -> Result<PublicKey, Error> {
        PublicKey::from_sec1_bytes(input).context(DecodePublicKeySnafu)
    }

    fn compute_shared_secret(
        &self,
        private_key: &SecretKey,
        public_key: &PublicKey,
    ) -> Zeroizing<Vec<u8>> {
        let shared_secret =
            p256::ecdh::diffie_hellman(private_key.to_nonzero_scalar(), public_key.as_affine());

        Zeroizing::new(shared_secret.raw_secret_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use p256::elliptic_curve::sec1::ToEncodedPoint;

    use super::*;

    #[test]
    fn shared_secret_symmetry() {
        let exchange = P256KeyExchange;
        let (a_private, a_public) = exchange.generate_key_pair();
        let (b_private, b_public) = exchange.generate_key_pair();

        let ab = exchange.compute_shared_secret(&a_private, &b_public);
        let ba = exchange.compute_shared_secret(&b_private, &a_public);

        assert_eq!(ab.len(), 32);
        assert_eq!(*ab, *ba);
    }

    #[test]
    fn public_key_encodings() {
        let exchange = P256KeyExchange;
        let (_, public_key) = exchange.generate_key_pair();

        let compressed = exchange.encode_public_key(&public_key);
        assert_eq!(compressed.len(), 33);

        let uncompressed = public_key.to_encoded_point(false);
        assert_eq!(
            exchange
                .decode_public_key(uncompressed.as_bytes())
                .expect("uncompressed point must decode"),
            public_key
        );
        assert_eq!(
            exchange
                .decode_public_key(&compressed)
                .expect("compressed point must decode"),
            public_key
        );
    }

    #[test]
    fn reject_invalid_point() {
        assert!(P256KeyExchange.decode_public_key(&[4u8; 65]).is_err());
    }
}
