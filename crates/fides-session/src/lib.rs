//! The encryption session protocol, which lets a client transmit a short
//! secret (such as the passphrase of a root CA) to the server without ever
//! putting it on the wire unencrypted.
//!
//! The server side is implemented by [`EncryptionSessionService`], the client
//! side by [`client::ClientSession`] and the functions in [`client`]. Both
//! sides rely on the primitives in [`exchange`], [`aead`] and [`protocol`].
//!
//! 1. The client generates an ephemeral P-256 key pair and sends its public
//!    key to the server ([`EncryptionSessionService::start_session`]).
//! 2. The server generates its own ephemeral key pair, computes the shared
//!    secret and stores it in a [`SessionCache`] for a short time.
//! 3. Both sides derive the same AES-256-GCM key from the shared secret, the
//!    client encrypts the secret and submits it.
//! 4. The server decrypts it exactly once
//!    ([`EncryptionSessionService::decrypt_secret`]).
pub mod aead;
pub mod cache;
pub mod client;
pub mod exchange;
pub mod protocol;
mod server;

pub use cache::{InMemorySessionCache, SessionCache};
pub use server::*;
