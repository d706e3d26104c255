//! Authenticated encryption used to protect the submitted secret.
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use snafu::Snafu;
use zeroize::Zeroizing;

use crate::protocol::{IV_LEN, KEY_LEN, TAG_LEN};

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("failed to encrypt"))]
    Encrypt,

    #[snafu(display("failed to decrypt, the ciphertext is malformed or was tampered with"))]
    Decrypt,
}

/// Narrow interface around the AEAD library. Ciphertexts are always returned
/// and accepted with the authentication tag appended.
pub trait AeadCipher: Send + Sync + 'static {
    fn encrypt(
        &self,
        key: &[u8; KEY_LEN],
        iv: &[u8; IV_LEN],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error>;

    fn decrypt(
        &self,
        key: &[u8; KEY_LEN],
        iv: &[u8; IV_LEN],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, Error>;
}

/// AES-256-GCM with a 96-bit nonce and a 128-bit tag.
#[derive(Clone, Copy, Debug, Default)]
pub struct Aes256GcmCipher;

impl AeadCipher for Aes256GcmCipher {
    fn encrypt(
        &self,
        key: &[u8; KEY_LEN],
        iv: &[u8; IV_LEN],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

        cipher
            .encrypt(Nonce::from_slice(iv), plaintext)
            .map_err(|_| EncryptSnafu.build())
    }

    fn decrypt(
        &self,
        key: &[u8; KEY_LEN],
        iv: &[u8; IV_LEN],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        snafu::ensure!(ciphertext.len() >= TAG_LEN, DecryptSnafu);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

        cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| DecryptSnafu.build())
    }
}
