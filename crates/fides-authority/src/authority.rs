//! The authority domain model, its persisted record form and the lifecycle
//! state machine.
//!
//! ```text
//! created ──> inactive <──> active
//!                │
//!                └──> revoked (terminal)
//! ```
use std::collections::BTreeMap;

use fides_certs::{
    certificate::{self, CertificateExt},
    envelope::{self, EncryptedPrivateKey},
};
use snafu::{ResultExt, Snafu, ensure};
use time::OffsetDateTime;
use uuid::Uuid;
use x509_cert::Certificate;

#[derive(Debug, Snafu)]
pub enum DecodeRecordError {
    #[snafu(display("failed to decode certificate of authority {id}"))]
    DecodeCertificate { source: certificate::Error, id: Uuid },

    #[snafu(display("invalid encrypted private key of authority {id}"))]
    DecodePrivateKey { source: envelope::Error, id: Uuid },
}

#[derive(Debug, Snafu)]
#[snafu(display("failed to encode certificate of authority {id}"))]
pub struct EncodeRecordError {
    source: certificate::Error,
    id: Uuid,
}

/// A rejected lifecycle transition.
#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum TransitionError {
    #[snafu(display("the authority is already active"))]
    AlreadyActive,

    #[snafu(display("the authority is not active"))]
    NotActive,

    #[snafu(display("the authority has been revoked"))]
    Revoked,

    #[snafu(display("the authority has already been revoked"))]
    AlreadyRevoked,

    #[snafu(display("the authority is still active and must be deactivated first"))]
    StillActive,

    #[snafu(display("the authority expired at {valid_until}"))]
    Expired { valid_until: OffsetDateTime },
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum AuthorityKind {
    Root,
    Intermediate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum AuthorityState {
    Active,
    Inactive,
    Revoked,
}

/// The storage representation of an authority. Certificates and private
/// keys are kept as opaque bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorityRecord {
    pub id: Uuid,
    pub kind: AuthorityKind,
    pub subject: String,
    pub serial_number: u64,
    pub encrypted_private_key: Vec<u8>,
    pub certificate: Vec<u8>,
    pub valid_from: OffsetDateTime,
    pub valid_until: OffsetDateTime,
    pub active: bool,
    pub revoked: bool,
    pub parent_id: Option<Uuid>,
    pub description: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A root or intermediate certificate authority.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authority {
    pub id: Uuid,
    pub kind: AuthorityKind,
    pub subject: String,
    pub serial_number: u64,
    pub encrypted_private_key: EncryptedPrivateKey,
    pub certificate: Certificate,
    pub valid_from: OffsetDateTime,
    pub valid_until: OffsetDateTime,
    pub active: bool,
    pub revoked: bool,
    pub parent_id: Option<Uuid>,
    pub description: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Authority {
    pub fn state(&self) -> AuthorityState {
        if self.revoked {
            AuthorityState::Revoked
        } else if self.active {
            AuthorityState::Active
        } else {
            AuthorityState::Inactive
        }
    }

    /// The last second of the validity period still counts as valid.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.certificate.is_expired_at(now)
    }

    pub fn common_name(&self) -> Option<String> {
        self.certificate.common_name()
    }

    pub fn activate(&mut self, now: OffsetDateTime) -> Result<(), TransitionError> {
        ensure!(!self.revoked, RevokedSnafu);
        ensure!(!self.is_expired_at(now), ExpiredSnafu {
            valid_until: self.valid_until
        });
        ensure!(!self.active, AlreadyActiveSnafu);

        self.active = true;
        self.updated_at = now;
        Ok(())
    }

    pub fn deactivate(&mut self, now: OffsetDateTime) -> Result<(), TransitionError> {
        ensure!(self.active, NotActiveSnafu);

        self.active = false;
        self.updated_at = now;
        Ok(())
    }

    pub fn revoke(&mut self, now: OffsetDateTime) -> Result<(), TransitionError> {
        ensure!(!self.revoked, AlreadyRevokedSnafu);
        ensure!(!self.active, StillActiveSnafu);

        self.revoked = true;
        self.updated_at = now;
        Ok(())
    }

    pub fn to_record(&self) -> Result<AuthorityRecord, EncodeRecordError> {
        let certificate = self
            .certificate
            .to_der_bytes()
            .context(EncodeRecordSnafu { id: self.id })?;

        Ok(AuthorityRecord {
            id: self.id,
            kind: self.kind,
            subject: self.subject.clone(),
            serial_number: self.serial_number,
            encrypted_private_key: self.encrypted_private_key.as_bytes().to_vec(),
            certificate,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            active: self.active,
            revoked: self.revoked,
            parent_id: self.parent_id,
            description: self.description.clone(),
            tags: self.tags.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl TryFrom<AuthorityRecord> for Authority {
    type Error = DecodeRecordError;

    fn try_from(record: AuthorityRecord) -> Result<Self, Self::Error> {
        let id = record.id;
        let certificate =
            Certificate::from_der_bytes(&record.certificate).context(DecodeCertificateSnafu { id })?;
        let encrypted_private_key = EncryptedPrivateKey::from_bytes(record.encrypted_private_key)
            .context(DecodePrivateKeySnafu { id })?;

        Ok(Self {
            id,
            kind: record.kind,
            subject: record.subject,
            serial_number: record.serial_number,
            encrypted_private_key,
            certificate,
            valid_from: record.valid_from,
            valid_until: record.valid_until,
            active: record.active,
            revoked: record.revoked,
            parent_id: record.parent_id,
            description: record.description,
            tags: record.tags,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use fides_certs::{ca::CertificateAuthority, envelope, keys::ecdsa};
    use fides_shared::time::Duration;

    use super::*;

    pub(crate) fn authority(kind: AuthorityKind) -> Authority {
        let ca = CertificateAuthority::<ecdsa::SigningKey>::root_builder()
            .common_name("Test Authority")
            .serial_number(1)
            .validity(Duration::from_days_unchecked(1))
            .build()
            .expect("failed to build CA");
        let now = OffsetDateTime::now_utc();

        Authority {
            id: Uuid::new_v4(),
            kind,
            subject: "Test Authority".to_owned(),
            serial_number: 1,
            encrypted_private_key: envelope::seal_key_pair(ca.key_pair(), b"secret")
                .expect("failed to seal key"),
            valid_from: ca.certificate().not_before(),
            valid_until: ca.certificate().not_after(),
            certificate: ca.certificate().clone(),
            active: false,
            revoked: false,
            parent_id: None,
            description: None,
            tags: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn lifecycle() {
        let now = OffsetDateTime::now_utc();
        let mut authority = authority(AuthorityKind::Root);
        assert_eq!(authority.state(), AuthorityState::Inactive);

        assert_eq!(authority.deactivate(now), Err(TransitionError::NotActive));
        authority.activate(now).expect("inactive authority must activate");
        assert_eq!(authority.state(), AuthorityState::Active);
        assert_eq!(authority.activate(now), Err(TransitionError::AlreadyActive));

        assert_eq!(authority.revoke(now), Err(TransitionError::StillActive));
        authority.deactivate(now).expect("active authority must deactivate");
        authority.revoke(now).expect("inactive authority must revoke");
        assert_eq!(authority.state(), AuthorityState::Revoked);

        assert_eq!(authority.revoke(now), Err(TransitionError::AlreadyRevoked));
        assert_eq!(authority.activate(now), Err(TransitionError::Revoked));
    }

    #[test]
    fn expired_authority_cannot_activate() {
        let mut authority = authority(AuthorityKind::Root);
        let later = authority.valid_until + time::Duration::seconds(1);

        assert_eq!(authority.activate(later), Err(TransitionError::Expired {
            valid_until: authority.valid_until
        }));
    }

    #[test]
    fn valid_until_is_inclusive() {
        let mut authority = authority(AuthorityKind::Root);
        let valid_until = authority.valid_until;

        assert!(!authority.is_expired_at(valid_until));
        assert!(!authority.certificate.is_expired_at(valid_until));
        assert!(authority.is_expired_at(valid_until + time::Duration::seconds(1)));

        authority
            .activate(valid_until)
            .expect("authority must activate in its last valid second");
    }

    #[test]
    fn record_roundtrip() {
        let authority = authority(AuthorityKind::Intermediate);
        let record = authority.to_record().expect("failed to encode record");

        assert_eq!(
            Authority::try_from(record).expect("failed to decode record"),
            authority
        );
    }
}
