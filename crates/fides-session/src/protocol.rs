//! Constants and key derivation shared by both sides of the encryption
//! session protocol.
//!
//! Every value in this module is part of the wire protocol. Changing any of
//! them requires bumping [`PROTOCOL_VERSION`].
use hkdf::Hkdf;
use sha2::Sha256;
use snafu::Snafu;
use zeroize::Zeroizing;

pub const PROTOCOL_VERSION: u8 = 1;

/// The curve used for the ephemeral key exchange.
pub const PROTOCOL_CURVE: &str = "P-256";

/// The derived key is stretched with `2^STRETCH_ROUNDS` PBKDF2 rounds.
pub const STRETCH_ROUNDS: u32 = 10;

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

/// Client-generated passphrases must be at least this many bytes long.
pub const MIN_PASSPHRASE_LEN: usize = 32;

/// The shortest valid ciphertext: IV and tag with an empty payload.
pub const MIN_CIPHERTEXT_LEN: usize = IV_LEN + TAG_LEN;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("failed to derive encryption key from shared secret"))]
    DeriveKey,
}

/// Derives the 32-byte session key from the raw ECDH shared secret using
/// HKDF-SHA256 without salt and info.
pub fn derive_encryption_key(shared_secret: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, Error> {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);

    hkdf.expand(&[], key.as_mut_slice())
        .map_err(|_| DeriveKeySnafu.build())?;

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let first = derive_encryption_key(&[5u8; 32]).expect("failed to derive key");
        let second = derive_encryption_key(&[5u8; 32]).expect("failed to derive key");
        let other = derive_encryption_key(&[6u8; 32]).expect("failed to derive key");

        assert_eq!(*first, *second);
        assert_ne!(*first, *other);
    }
}
