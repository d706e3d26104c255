//! API projection of authorities. The encrypted private key never leaves the
//! service.
use std::collections::BTreeMap;

use fides_certs::certificate::{self, CertificateJson};
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::authority::{Authority, AuthorityKind};

#[derive(Debug, Snafu)]
#[snafu(display("failed to project certificate of authority {id}"))]
pub struct ProjectionError {
    source: certificate::Error,
    id: Uuid,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityResource {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub subject: String,
    /// Upper-case hexadecimal, as shown by most certificate tooling.
    pub serial_number: String,
    pub state: String,
    pub active: bool,
    pub revoked: bool,
    pub description: Option<String>,
    pub tags: BTreeMap<String, String>,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_from: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_until: OffsetDateTime,
    pub certificate: CertificateJson,
    pub parent: Option<ParentLink>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentLink {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl TryFrom<&Authority> for AuthorityResource {
    type Error = ProjectionError;

    fn try_from(authority: &Authority) -> Result<Self, Self::Error> {
        let certificate = CertificateJson::try_from(&authority.certificate)
            .context(ProjectionSnafu { id: authority.id })?;

        Ok(Self {
            id: authority.id,
            kind: resource_type(authority.kind),
            subject: authority.subject.clone(),
            serial_number: format!("{:02X}", authority.serial_number),
            state: authority.state().to_string(),
            active: authority.active,
            revoked: authority.revoked,
            description: authority.description.clone(),
            tags: authority.tags.clone(),
            valid_from: authority.valid_from,
            valid_until: authority.valid_until,
            certificate,
            parent: authority.parent_id.map(|id| ParentLink {
                id,
                kind: resource_type(AuthorityKind::Root),
            }),
            created_at: authority.created_at,
            updated_at: authority.updated_at,
        })
    }
}

fn resource_type(kind: AuthorityKind) -> &'static str {
    match kind {
        AuthorityKind::Root => "rootCertificateAuthority",
        AuthorityKind::Intermediate => "certificateAuthority",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::tests::authority;

    #[test]
    fn projection_hides_private_key() {
        let mut authority = authority(AuthorityKind::Intermediate);
        let parent_id = Uuid::new_v4();
        authority.parent_id = Some(parent_id);
        authority.serial_number = 255;

        let resource = AuthorityResource::try_from(&authority).expect("failed to project");
        assert_eq!(resource.serial_number, "FF");
        assert_eq!(resource.state, "inactive");
        assert_eq!(
            resource.parent,
            Some(ParentLink {
                id: parent_id,
                kind: "rootCertificateAuthority"
            })
        );

        let json = serde_json::to_value(&resource).expect("failed to serialize");
        assert_eq!(json["type"], "certificateAuthority");
        assert_eq!(json["certificate"]["subject"]["commonName"], "Test Authority");
        assert!(json.get("encryptedPrivateKey").is_none());
    }
}
