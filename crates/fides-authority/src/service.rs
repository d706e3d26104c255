use std::{collections::BTreeMap, future::Future, marker::PhantomData, sync::Arc};

use bon::Builder;
use fides_certs::{
    ca::{
        CertificateAuthority, CreateCertificateAuthorityError, ParentNotUsableReason,
        SignCertificateError, X509Builder, X509CertBuilder,
    },
    certificate::{self, CertificateExt},
    envelope::{self, EncryptedPrivateKey, KeyEnvelopeError},
    keys::{CertificateKeypair, rsa},
};
use fides_session::{EncryptionSessionService, aead::AeadCipher, exchange::KeyExchange};
use fides_shared::time::Duration;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use x509_cert::Certificate;

use crate::{
    PkiOptions,
    authority::{
        Authority, AuthorityKind, DecodeRecordError, EncodeRecordError, TransitionError,
    },
    options::WeakKeySizeError,
    store::{AuthorityStore, Mutation, Snapshot, StoreError, TableVersion},
};

pub type Result<T, E> = std::result::Result<T, Error<E>>;

#[derive(Debug, Snafu)]
pub enum Error<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("authority {id} not found"))]
    AuthorityNotFound { id: Uuid },

    #[snafu(display("authority {id} cannot be used to sign, because {reason}"))]
    ParentNotUsable {
        id: Uuid,
        reason: ParentNotUsableReason,
    },

    #[snafu(display("invalid state transition of authority {id}"))]
    InvalidTransition { source: TransitionError, id: Uuid },

    #[snafu(display("the configured CA key size is too weak"))]
    WeakKey { source: WeakKeySizeError },

    #[snafu(display("no secret key configured to encrypt intermediate private keys"))]
    MissingSecretKey,

    #[snafu(display("a {kind} authority with serial number {serial_number} already exists"))]
    DuplicateSerial {
        kind: AuthorityKind,
        serial_number: u64,
    },

    #[snafu(display("failed to create certificate authority"))]
    CreateCertificateAuthority {
        source: CreateCertificateAuthorityError<E>,
    },

    #[snafu(display("failed to verify the new intermediate CA against its parent {parent_id}"))]
    VerifyIntermediate {
        source: SignCertificateError<E>,
        parent_id: Uuid,
    },

    #[snafu(display("failed to read the issued certificate"))]
    InspectCertificate { source: certificate::Error },

    #[snafu(display("failed to encrypt private key"))]
    SealPrivateKey { source: KeyEnvelopeError<E> },

    #[snafu(display("failed to decrypt private key of authority {id}"))]
    UnlockPrivateKey {
        source: KeyEnvelopeError<E>,
        id: Uuid,
    },

    #[snafu(display("failed to decrypt the passphrase submitted through the encryption session"))]
    DecryptPassphrase { source: fides_session::Error },

    #[snafu(display("failed to access the authority store"))]
    Store { source: StoreError },

    #[snafu(display("failed to decode stored authority"))]
    DecodeRecord { source: DecodeRecordError },

    #[snafu(display("failed to encode authority"))]
    EncodeRecord { source: EncodeRecordError },
}

/// Describes a CA to be issued. Unset fields fall back to [`PkiOptions`].
#[derive(Builder, Clone, Debug, Default, PartialEq, Eq)]
pub struct IssueRequest {
    /// The common name of the CA subject.
    #[builder(into)]
    pub common_name: Option<String>,

    /// Start of the validity period, defaults to now.
    pub valid_from: Option<OffsetDateTime>,

    pub validity: Option<Duration>,

    #[builder(into)]
    pub description: Option<String>,

    #[builder(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
enum Transition {
    Activate,
    Deactivate,
    Revoke,
}

/// Issues root and intermediate CAs and manages their lifecycle.
///
/// Every operation is a unit of work against the [`AuthorityStore`]: it reads
/// a snapshot, computes the changes and commits them atomically. Units of
/// work failing with [`StoreError::Conflict`] are retried once.
///
/// All CA keys are generated as `K`. Private keys of roots are encrypted
/// with the passphrase supplied at issuance, private keys of intermediates
/// with the configured [`PkiOptions::secret_key`].
#[derive(Debug)]
pub struct AuthorityService<K = rsa::SigningKey>
where
    K: CertificateKeypair,
{
    store: Arc<dyn AuthorityStore>,
    options: PkiOptions,
    key_type: PhantomData<fn() -> K>,
}

impl<K> AuthorityService<K>
where
    K: CertificateKeypair,
{
    pub fn new(store: Arc<dyn AuthorityStore>, options: PkiOptions) -> Self {
        Self {
            store,
            options,
            key_type: PhantomData,
        }
    }

    pub fn options(&self) -> &PkiOptions {
        &self.options
    }

    /// Issues a new, inactive root CA. Its private key is encrypted with
    /// `passphrase`.
    #[instrument(skip_all, fields(ca.common_name = request.common_name.as_deref()))]
    pub async fn issue_root(
        &self,
        request: &IssueRequest,
        passphrase: &[u8],
    ) -> Result<Authority, K::Error> {
        retry_on_conflict("issue_root", || self.try_issue_root(request, passphrase)).await
    }

    /// Decrypts the passphrase submitted through the encryption session
    /// `session_id` and issues a new root CA with it. The session is consumed
    /// even if issuance fails.
    #[instrument(skip(self, sessions, ciphertext, request))]
    pub async fn issue_root_with_session<X, A>(
        &self,
        sessions: &EncryptionSessionService<X, A>,
        session_id: &str,
        ciphertext: &str,
        request: &IssueRequest,
    ) -> Result<Authority, K::Error>
    where
        X: KeyExchange,
        A: AeadCipher,
    {
        let passphrase = sessions
            .decrypt_secret(session_id, ciphertext)
            .await
            .context(DecryptPassphraseSnafu)?;

        self.issue_root(request, &passphrase).await
    }

    /// Issues a new, inactive intermediate CA signed by the root `parent_id`.
    ///
    /// The parent must be active, not revoked and not expired. `passphrase`
    /// unlocks the private key of the parent.
    #[instrument(skip(self, passphrase, request), fields(ca.common_name = request.common_name.as_deref()))]
    pub async fn issue_intermediate(
        &self,
        parent_id: Uuid,
        passphrase: &[u8],
        request: &IssueRequest,
    ) -> Result<Authority, K::Error> {
        retry_on_conflict("issue_intermediate", || {
            self.try_issue_intermediate(parent_id, passphrase, request)
        })
        .await
    }

    /// Activates the authority. Activating a root deactivates the previously
    /// active root in the same unit of work.
    #[instrument(skip(self))]
    pub async fn activate(&self, id: Uuid) -> Result<Authority, K::Error> {
        retry_on_conflict("activate", || self.try_transition(id, Transition::Activate)).await
    }

    #[instrument(skip(self))]
    pub async fn deactivate(&self, id: Uuid) -> Result<Authority, K::Error> {
        retry_on_conflict("deactivate", || {
            self.try_transition(id, Transition::Deactivate)
        })
        .await
    }

    /// Revokes the authority. Active authorities have to be deactivated
    /// first.
    #[instrument(skip(self))]
    pub async fn revoke(&self, id: Uuid) -> Result<Authority, K::Error> {
        retry_on_conflict("revoke", || self.try_transition(id, Transition::Revoke)).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Authority, K::Error> {
        let (_, authority) = self.locate(id).await?;
        Ok(authority)
    }

    pub async fn list(&self, kind: AuthorityKind) -> Result<Vec<Authority>, K::Error> {
        let snapshot = self.snapshot(kind).await?;
        decode_all(snapshot)
    }

    /// Lists all intermediate CAs signed by the root `root_id`.
    pub async fn intermediates_of(&self, root_id: Uuid) -> Result<Vec<Authority>, K::Error> {
        let roots = self.snapshot(AuthorityKind::Root).await?;
        ensure!(
            roots.find(root_id).is_some(),
            AuthorityNotFoundSnafu { id: root_id }
        );

        let mut intermediates = self.snapshot(AuthorityKind::Intermediate).await?;
        intermediates
            .records
            .retain(|record| record.parent_id == Some(root_id));

        decode_all(intermediates)
    }

    pub async fn active_root(&self) -> Result<Option<Authority>, K::Error> {
        let snapshot = self.snapshot(AuthorityKind::Root).await?;

        snapshot
            .records
            .into_iter()
            .find(|record| record.active)
            .map(|record| Authority::try_from(record).context(DecodeRecordSnafu))
            .transpose()
    }

    /// Decrypts the private key of the authority with `secret`. That is the
    /// passphrase for roots and the configured secret key for intermediates.
    #[instrument(skip(self, secret))]
    pub async fn unlock_private_key(&self, id: Uuid, secret: &[u8]) -> Result<K, K::Error> {
        let authority = self.get(id).await?;
        envelope::open_key_pair(&authority.encrypted_private_key, secret)
            .context(UnlockPrivateKeySnafu { id })
    }

    async fn try_issue_root(
        &self,
        request: &IssueRequest,
        passphrase: &[u8],
    ) -> Result<Authority, K::Error> {
        let key_size = self.key_size()?;
        let snapshot = self.snapshot(AuthorityKind::Root).await?;
        let serial_number = snapshot.next_serial();

        let common_name = request
            .common_name
            .as_deref()
            .unwrap_or(&self.options.certificate_issuer_name);

        let ca = CertificateAuthority::<K>::root_builder()
            .common_name(common_name)
            .subject_attributes(self.options.subject_attributes())
            .serial_number(serial_number)
            .maybe_valid_from(request.valid_from)
            .validity(request.validity.unwrap_or(self.options.default_validity))
            .key_size(key_size)
            .build()
            .context(CreateCertificateAuthoritySnafu)?;

        let encrypted_private_key =
            envelope::seal_key_pair(ca.key_pair(), passphrase).context(SealPrivateKeySnafu)?;
        let authority = new_authority(
            AuthorityKind::Root,
            ca.certificate(),
            encrypted_private_key,
            None,
            request,
        )?;

        self.commit(AuthorityKind::Root, snapshot.version, &[], vec![
            Mutation::Insert(authority.to_record().context(EncodeRecordSnafu)?),
        ])
        .await?;

        info!(
            ca.id = %authority.id,
            ca.subject = authority.subject,
            ca.serial = authority.serial_number,
            "issued root certificate authority"
        );
        Ok(authority)
    }

    async fn try_issue_intermediate(
        &self,
        parent_id: Uuid,
        passphrase: &[u8],
        request: &IssueRequest,
    ) -> Result<Authority, K::Error> {
        let secret_key = self
            .options
            .secret_key
            .as_ref()
            .context(MissingSecretKeySnafu)?;
        let key_size = self.key_size()?;
        let now = OffsetDateTime::now_utc();

        let roots = self.snapshot(AuthorityKind::Root).await?;
        let parent = roots
            .find(parent_id)
            .cloned()
            .context(AuthorityNotFoundSnafu { id: parent_id })?;
        let parent = Authority::try_from(parent).context(DecodeRecordSnafu)?;

        if let Some(reason) = unusable_parent_reason(&parent, now) {
            warn!(ca.parent.id = %parent_id, %reason, "refusing to sign with parent");
            return ParentNotUsableSnafu {
                id: parent_id,
                reason,
            }
            .fail();
        }

        let key_pair: K = envelope::open_key_pair(&parent.encrypted_private_key, passphrase)
            .context(UnlockPrivateKeySnafu { id: parent_id })?;
        let parent_ca = CertificateAuthority::from_parts(parent.certificate, key_pair);

        let intermediates = self.snapshot(AuthorityKind::Intermediate).await?;
        let serial_number = intermediates.next_serial();

        let common_name = request.common_name.clone().unwrap_or_else(|| {
            format!("{} Intermediate CA", self.options.certificate_issuer_name)
        });

        let ca = parent_ca
            .intermediate_builder()
            .common_name(&common_name)
            .subject_attributes(self.options.subject_attributes())
            .serial_number(serial_number)
            .maybe_valid_from(request.valid_from)
            .validity(request.validity.unwrap_or(self.options.default_validity))
            .key_size(key_size)
            .build()
            .map_err(|source| match source {
                CreateCertificateAuthorityError::ParentNotUsable { reason } => {
                    Error::ParentNotUsable {
                        id: parent_id,
                        reason,
                    }
                }
                source => Error::CreateCertificateAuthority { source },
            })?;

        <X509CertBuilder as X509Builder<K>>::verify_issued_by(
            &X509CertBuilder,
            ca.certificate(),
            parent_ca.certificate(),
        )
        .context(VerifyIntermediateSnafu { parent_id })?;

        let encrypted_private_key = envelope::seal_key_pair(ca.key_pair(), secret_key.as_bytes())
            .context(SealPrivateKeySnafu)?;
        let authority = new_authority(
            AuthorityKind::Intermediate,
            ca.certificate(),
            encrypted_private_key,
            Some(parent_id),
            request,
        )?;

        // A parent revoked since the roots were read fails the commit.
        let parent_guard = TableVersion {
            kind: AuthorityKind::Root,
            version: roots.version,
        };
        self.commit(
            AuthorityKind::Intermediate,
            intermediates.version,
            &[parent_guard],
            vec![Mutation::Insert(
                authority.to_record().context(EncodeRecordSnafu)?,
            )],
        )
        .await?;

        info!(
            ca.id = %authority.id,
            ca.parent.id = %parent_id,
            ca.subject = authority.subject,
            ca.serial = authority.serial_number,
            "issued intermediate certificate authority"
        );
        Ok(authority)
    }

    async fn try_transition(
        &self,
        id: Uuid,
        transition: Transition,
    ) -> Result<Authority, K::Error> {
        let now = OffsetDateTime::now_utc();
        let (snapshot, mut authority) = self.locate(id).await?;

        let transitioned = match transition {
            Transition::Activate => authority.activate(now),
            Transition::Deactivate => authority.deactivate(now),
            Transition::Revoke => authority.revoke(now),
        };
        transitioned.context(InvalidTransitionSnafu { id })?;

        let mut mutations = vec![Mutation::Update(
            authority.to_record().context(EncodeRecordSnafu)?,
        )];

        if transition == Transition::Activate && authority.kind == AuthorityKind::Root {
            for record in snapshot.records.iter().filter(|r| r.active && r.id != id) {
                info!(ca.id = %record.id, "deactivating previously active root");

                let mut record = record.clone();
                record.active = false;
                record.updated_at = now;
                mutations.push(Mutation::Update(record));
            }
        }

        self.commit(authority.kind, snapshot.version, &[], mutations)
            .await?;

        info!(
            ca.id = %id,
            ca.kind = %authority.kind,
            ca.state = %authority.state(),
            %transition,
            "changed authority state"
        );
        Ok(authority)
    }

    /// Finds the authority in either table, returning it with the snapshot
    /// of its table.
    async fn locate(&self, id: Uuid) -> Result<(Snapshot, Authority), K::Error> {
        for kind in [AuthorityKind::Root, AuthorityKind::Intermediate] {
            let snapshot = self.snapshot(kind).await?;
            if let Some(record) = snapshot.find(id).cloned() {
                let authority = Authority::try_from(record).context(DecodeRecordSnafu)?;
                return Ok((snapshot, authority));
            }
        }

        AuthorityNotFoundSnafu { id }.fail()
    }

    async fn snapshot(&self, kind: AuthorityKind) -> Result<Snapshot, K::Error> {
        self.store.snapshot(kind).await.context(StoreSnafu)
    }

    async fn commit(
        &self,
        kind: AuthorityKind,
        expected_version: u64,
        guards: &[TableVersion],
        mutations: Vec<Mutation>,
    ) -> Result<u64, K::Error> {
        self.store
            .commit_guarded(kind, expected_version, guards, mutations)
            .await
            .map_err(|source| match source {
                StoreError::DuplicateSerial {
                    kind,
                    serial_number,
                } => Error::DuplicateSerial {
                    kind,
                    serial_number,
                },
                source => Error::Store { source },
            })
    }

    fn key_size(&self) -> Result<usize, K::Error> {
        self.options.key_size_for::<K>().context(WeakKeySnafu)
    }
}

async fn retry_on_conflict<T, E, F, Fut>(operation: &'static str, mut unit_of_work: F) -> Result<T, E>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match unit_of_work().await {
        Err(Error::Store {
            source:
                StoreError::Conflict {
                    kind,
                    expected,
                    actual,
                },
        }) => {
            warn!(
                operation,
                %kind,
                expected,
                actual,
                "retrying after concurrent modification"
            );
            unit_of_work().await
        }
        result => result,
    }
}

fn unusable_parent_reason(
    parent: &Authority,
    now: OffsetDateTime,
) -> Option<ParentNotUsableReason> {
    if parent.revoked {
        Some(ParentNotUsableReason::Revoked)
    } else if parent.is_expired_at(now) {
        Some(ParentNotUsableReason::Expired)
    } else if !parent.active {
        Some(ParentNotUsableReason::Inactive)
    } else {
        None
    }
}

fn new_authority<E>(
    kind: AuthorityKind,
    certificate: &Certificate,
    encrypted_private_key: EncryptedPrivateKey,
    parent_id: Option<Uuid>,
    request: &IssueRequest,
) -> Result<Authority, E>
where
    E: std::error::Error + 'static,
{
    let now = OffsetDateTime::now_utc();

    Ok(Authority {
        id: Uuid::new_v4(),
        kind,
        subject: certificate.common_name().unwrap_or_default(),
        serial_number: certificate
            .serial_number_u64()
            .context(InspectCertificateSnafu)?,
        encrypted_private_key,
        certificate: certificate.clone(),
        valid_from: certificate.not_before(),
        valid_until: certificate.not_after(),
        active: false,
        revoked: false,
        parent_id,
        description: request.description.clone(),
        tags: request.tags.clone(),
        created_at: now,
        updated_at: now,
    })
}

fn decode_all<E>(snapshot: Snapshot) -> Result<Vec<Authority>, E>
where
    E: std::error::Error + 'static,
{
    snapshot
        .records
        .into_iter()
        .map(|record| Authority::try_from(record).context(DecodeRecordSnafu))
        .collect()
}
