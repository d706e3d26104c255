//! Key stretching shared by the private key envelope and the encryption
//! session protocol.
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

/// The length of every key produced by [`grind_key`].
pub const GROUND_KEY_LEN: usize = 32;

/// The default difficulty passed to [`grind_key`], resulting in `2^10`
/// PBKDF2 rounds.
pub const DEFAULT_DIFFICULTY: u32 = 10;

/// Stretches `key` into a 32-byte key using PBKDF2-HMAC-SHA256 with
/// `2^difficulty` rounds.
///
/// The salt is the key concatenated with itself. Both sides of the
/// encryption session protocol depend on this exact derivation, so changing
/// any parameter here is a protocol change.
pub fn grind_key(key: &[u8], difficulty: u32) -> Zeroizing<[u8; GROUND_KEY_LEN]> {
    let salt = Zeroizing::new([key, key].concat());
    let rounds = 1u32 << difficulty.min(31);

    let mut output = Zeroizing::new([0u8; GROUND_KEY_LEN]);
    pbkdf2_hmac::<Sha256>(key, &salt, rounds, output.as_mut_slice());

    output
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(b"short".as_slice())]
    #[case(&[7u8; 32])]
    #[case(&[0u8; 100])]
    fn grinding_is_deterministic(#[case] key: &[u8]) {
        let first = grind_key(key, 2);
        let second = grind_key(key, 2);

        assert_eq!(first.as_slice(), second.as_slice());
        assert_ne!(first.as_slice(), key);
    }

    #[test]
    fn difficulty_changes_output() {
        let low = grind_key(b"passphrase", 1);
        let high = grind_key(b"passphrase", 2);

        assert_ne!(low.as_slice(), high.as_slice());
    }
}
