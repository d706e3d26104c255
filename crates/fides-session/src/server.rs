use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use fides_shared::{kdf::grind_key, time::Duration};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use time::OffsetDateTime;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{
    aead::{AeadCipher, Aes256GcmCipher},
    cache::{InMemorySessionCache, SessionCache},
    exchange::{self, KeyExchange, P256KeyExchange},
    protocol::{self, IV_LEN, MIN_CIPHERTEXT_LEN, STRETCH_ROUNDS},
};

/// The default time after which an unused session expires.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30);

const SESSION_KEY_PREFIX: &str = "encryptionSession";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to decode base64 encoded client public key"))]
    DecodeClientPublicKey { source: base64::DecodeError },

    #[snafu(display("invalid client public key"))]
    InvalidClientPublicKey { source: exchange::Error },

    #[snafu(display("the request does not reference an encryption session"))]
    MissingSession,

    #[snafu(display("no such encryption session {session_id:?}"))]
    UnknownSession { session_id: String },

    #[snafu(display("failed to derive the session key"))]
    DeriveSessionKey { source: protocol::Error },

    #[snafu(display("failed to decrypt the submitted secret"))]
    DecryptionFailed,
}

/// Configuration of the [`EncryptionSessionService`].
#[derive(clap::Args, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    /// Time after which an unused encryption session expires.
    #[arg(long, env, value_name = "DURATION", default_value_t = DEFAULT_SESSION_TTL)]
    pub encryption_session_ttl: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            encryption_session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

/// The server-side state of one key exchange. It is exclusively owned by the
/// [`SessionCache`] until it is taken for decryption.
pub struct EncryptionSession<X>
where
    X: KeyExchange,
{
    pub server_private_key: X::PrivateKey,
    pub client_public_key: X::PublicKey,
    pub shared_secret: Zeroizing<Vec<u8>>,
    pub created_at: OffsetDateTime,
}

impl<X> std::fmt::Debug for EncryptionSession<X>
where
    X: KeyExchange,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionSession")
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Returned to the client after a successful handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartedSession {
    /// The base64 encoded, compressed server public key.
    pub server_public_key: String,
    pub session_id: String,
}

/// Receives secrets from clients through an ephemeral ECDH key exchange.
///
/// Each session can be used for exactly one [`decrypt_secret`] call and
/// expires after the configured TTL.
///
/// [`decrypt_secret`]: Self::decrypt_secret
pub struct EncryptionSessionService<X = P256KeyExchange, A = Aes256GcmCipher>
where
    X: KeyExchange,
    A: AeadCipher,
{
    cache: Arc<dyn SessionCache<EncryptionSession<X>>>,
    exchange: X,
    cipher: A,
    ttl: Duration,
}

impl EncryptionSessionService {
    /// Creates a service with the default primitives and an
    /// [`InMemorySessionCache`].
    pub fn in_memory(options: &SessionOptions) -> Self {
        Self::new(
            Arc::new(InMemorySessionCache::<EncryptionSession<P256KeyExchange>>::new()),
            P256KeyExchange,
            Aes256GcmCipher,
            options.encryption_session_ttl,
        )
    }
}

impl<X, A> EncryptionSessionService<X, A>
where
    X: KeyExchange,
    A: AeadCipher,
{
    pub fn new(
        cache: Arc<dyn SessionCache<EncryptionSession<X>>>,
        exchange: X,
        cipher: A,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            exchange,
            cipher,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Performs the server half of the key exchange and stores the resulting
    /// session.
    #[instrument(skip_all, fields(session.id))]
    pub async fn start_session(&self, client_public_key: &str) -> Result<StartedSession> {
        let client_public_key = STANDARD
            .decode(client_public_key.trim())
            .context(DecodeClientPublicKeySnafu)?;
        let client_public_key = self
            .exchange
            .decode_public_key(&client_public_key)
            .context(InvalidClientPublicKeySnafu)?;

        let (server_private_key, server_public_key) = self.exchange.generate_key_pair();
        let shared_secret = self
            .exchange
            .compute_shared_secret(&server_private_key, &client_public_key);
        let server_public_key = STANDARD.encode(self.exchange.encode_public_key(&server_public_key));

        let session_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("session.id", session_id.as_str());

        let session = EncryptionSession::<X> {
            server_private_key,
            client_public_key,
            shared_secret,
            created_at: OffsetDateTime::now_utc(),
        };
        self.cache
            .insert(cache_key(&session_id), session, *self.ttl)
            .await;

        info!(
            session.ttl = %self.ttl,
            session.curve = self.exchange.curve_name(),
            "started encryption session"
        );

        Ok(StartedSession {
            server_public_key,
            session_id,
        })
    }

    /// Returns whether the session exists and has not expired. Doesn't
    /// consume the session.
    pub async fn has_session(&self, session_id: &str) -> bool {
        self.cache.contains(&cache_key(session_id)).await
    }

    /// Ensures a request references an existing session.
    pub async fn require_session<'a>(&self, session_id: Option<&'a str>) -> Result<&'a str> {
        let session_id = session_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .context(MissingSessionSnafu)?;

        ensure!(
            self.has_session(session_id).await,
            UnknownSessionSnafu { session_id }
        );

        Ok(session_id)
    }

    /// Consumes the session and decrypts the base64 encoded `iv || ciphertext
    /// || tag` submitted by the client.
    ///
    /// The session is removed before decryption is attempted, so it is gone
    /// even if decryption fails.
    #[instrument(skip_all, fields(session.id = session_id))]
    pub async fn decrypt_secret(
        &self,
        session_id: &str,
        ciphertext: &str,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let session = self
            .cache
            .take(&cache_key(session_id))
            .await
            .context(UnknownSessionSnafu { session_id })?;

        let ciphertext = STANDARD
            .decode(ciphertext.trim())
            .map_err(|_| DecryptionFailedSnafu.build())?;
        ensure!(ciphertext.len() >= MIN_CIPHERTEXT_LEN, DecryptionFailedSnafu);

        let key = protocol::derive_encryption_key(&session.shared_secret)
            .context(DeriveSessionKeySnafu)?;
        let key = grind_key(key.as_slice(), STRETCH_ROUNDS);

        let (iv, payload) = ciphertext.split_at(IV_LEN);
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| DecryptionFailedSnafu.build())?;

        let plaintext = self
            .cipher
            .decrypt(&key, &iv, payload)
            .map_err(|_| DecryptionFailedSnafu.build())?;

        debug!(
            session.age = %(OffsetDateTime::now_utc() - session.created_at),
            "decrypted secret"
        );
        Ok(plaintext)
    }
}

fn cache_key(session_id: &str) -> String {
    format!("{SESSION_KEY_PREFIX}:{session_id}")
}
