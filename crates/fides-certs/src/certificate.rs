//! Accessors, encodings and the JSON projection of X.509 certificates.
//!
//! Certificates are represented by [`x509_cert::Certificate`]. This module
//! adds the [`CertificateExt`] trait on top of it, which provides the
//! accessors used across the workspace, and [`DistinguishedName`], an ordered
//! attribute map used to build subject and issuer names.
use std::{str::FromStr, time::SystemTime};

use const_oid::{AssociatedOid, ObjectIdentifier};
use indexmap::IndexMap;
use serde::Serialize;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use time::OffsetDateTime;
use x509_cert::{
    Certificate,
    attr::AttributeTypeAndValue,
    der::{
        Any, Decode, DecodeOwned, DecodePem, Encode, EncodePem, Tag, asn1::SetOfVec,
        pem::LineEnding,
    },
    ext::pkix::{BasicConstraints, KeyUsage},
    name::{Name, RdnSequence, RelativeDistinguishedName},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to decode certificate from DER"))]
    DecodeDer { source: x509_cert::der::Error },

    #[snafu(display("failed to decode certificate from PEM"))]
    DecodePem { source: x509_cert::der::Error },

    #[snafu(display("failed to encode certificate as DER"))]
    EncodeDer { source: x509_cert::der::Error },

    #[snafu(display("failed to encode certificate as PEM"))]
    EncodePem { source: x509_cert::der::Error },

    #[snafu(display("failed to encode public key as PEM"))]
    EncodePublicKey { source: x509_cert::der::Error },

    #[snafu(display("failed to decode certificate extension {oid}"))]
    DecodeExtension {
        source: x509_cert::der::Error,
        oid: ObjectIdentifier,
    },

    #[snafu(display("serial number with {len} significant bytes does not fit into 64 bits"))]
    SerialNumberTooLarge { len: usize },

    #[snafu(display("unknown distinguished name attribute {name:?}"))]
    UnknownAttribute { name: String },

    #[snafu(display("failed to encode distinguished name attribute {name:?}"))]
    EncodeAttribute {
        source: x509_cert::der::Error,
        name: String,
    },
}

/// Well-known distinguished name attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum AttributeName {
    CommonName,
    CountryName,
    LocalityName,
    StateOrProvinceName,
    OrganizationName,
    OrganizationalUnitName,
}

impl AttributeName {
    const ALL: [Self; 6] = [
        Self::CommonName,
        Self::CountryName,
        Self::LocalityName,
        Self::StateOrProvinceName,
        Self::OrganizationName,
        Self::OrganizationalUnitName,
    ];

    pub const fn oid(&self) -> ObjectIdentifier {
        match self {
            Self::CommonName => ObjectIdentifier::new_unwrap("2.5.4.3"),
            Self::CountryName => ObjectIdentifier::new_unwrap("2.5.4.6"),
            Self::LocalityName => ObjectIdentifier::new_unwrap("2.5.4.7"),
            Self::StateOrProvinceName => ObjectIdentifier::new_unwrap("2.5.4.8"),
            Self::OrganizationName => ObjectIdentifier::new_unwrap("2.5.4.10"),
            Self::OrganizationalUnitName => ObjectIdentifier::new_unwrap("2.5.4.11"),
        }
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.oid() == *oid)
    }

    /// Country codes are encoded as `PrintableString`, everything else as
    /// `UTF8String`.
    fn value_tag(&self) -> Tag {
        match self {
            Self::CountryName => Tag::PrintableString,
            _ => Tag::Utf8String,
        }
    }
}

/// An ordered mapping of attribute names to values, used as the subject or
/// issuer of a certificate.
///
/// Keys are the camelCase attribute names (see [`AttributeName`]). Attributes
/// without a well-known name use their dotted OID as key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DistinguishedName(IndexMap<String, String>);

impl DistinguishedName {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends (or replaces) the attribute and returns self.
    pub fn with(mut self, name: AttributeName, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: AttributeName, value: impl Into<String>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: AttributeName) -> Option<&str> {
        self.0.get(&name.to_string()).map(String::as_str)
    }

    pub fn common_name(&self) -> Option<&str> {
        self.get(AttributeName::CommonName)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merges `other` into self. Attributes of `other` replace existing ones
    /// but keep their original position.
    pub fn extend(&mut self, other: &Self) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }

    /// Returns the attributes as an ordered map.
    pub fn to_map(&self) -> IndexMap<String, String> {
        self.0.clone()
    }

    /// Encodes the attributes as an X.509 [`Name`], one relative
    /// distinguished name per attribute, in insertion order.
    pub fn to_name(&self) -> Result<Name> {
        let mut rdns = Vec::with_capacity(self.0.len());

        for (name, value) in &self.0 {
            let (oid, tag) = match AttributeName::from_str(name) {
                Ok(attribute) => (attribute.oid(), attribute.value_tag()),
                Err(_) => (
                    ObjectIdentifier::new(name)
                        .ok()
                        .context(UnknownAttributeSnafu { name })?,
                    Tag::Utf8String,
                ),
            };

            let value = Any::new(tag, value.as_bytes()).context(EncodeAttributeSnafu { name })?;
            let set = SetOfVec::try_from(vec![AttributeTypeAndValue { oid, value }])
                .context(EncodeAttributeSnafu { name })?;

            rdns.push(RelativeDistinguishedName(set));
        }

        Ok(RdnSequence(rdns))
    }

    /// Decodes the attributes of an X.509 [`Name`]. Values are read as
    /// (lossy) UTF-8.
    pub fn from_name(name: &Name) -> Self {
        let attributes = name
            .0
            .iter()
            .flat_map(|rdn| rdn.0.iter())
            .map(|atv| {
                let key = AttributeName::from_oid(&atv.oid)
                    .map_or_else(|| atv.oid.to_string(), |name| name.to_string());
                let value = String::from_utf8_lossy(atv.value.value()).into_owned();
                (key, value)
            })
            .collect();

        Self(attributes)
    }
}

impl<K, V> FromIterator<(K, V)> for DistinguishedName
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Extension methods on [`Certificate`] used to load, export and inspect
/// certificates.
pub trait CertificateExt: Sized {
    fn from_der_bytes(input: &[u8]) -> Result<Self>;
    fn from_pem_str(input: &str) -> Result<Self>;

    fn to_der_bytes(&self) -> Result<Vec<u8>>;
    fn to_pem_string(&self) -> Result<String>;
    fn to_json(&self) -> Result<CertificateJson>;

    fn serial_number_u64(&self) -> Result<u64>;
    fn subject_attributes(&self) -> DistinguishedName;
    fn issuer_attributes(&self) -> DistinguishedName;
    fn common_name(&self) -> Option<String>;
    fn not_before(&self) -> OffsetDateTime;
    fn not_after(&self) -> OffsetDateTime;
    fn public_key_pem(&self) -> Result<String>;
    fn basic_constraints(&self) -> Result<Option<BasicConstraints>>;
    fn key_usage(&self) -> Result<Option<KeyUsage>>;

    /// Returns `true` if the certificate is not valid anymore at `now`.
    fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.not_after() < now
    }

    fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }
}

impl CertificateExt for Certificate {
    fn from_der_bytes(input: &[u8]) -> Result<Self> {
        <Self as Decode>::from_der(input).context(DecodeDerSnafu)
    }

    fn from_pem_str(input: &str) -> Result<Self> {
        Self::from_pem(input.as_bytes()).context(DecodePemSnafu)
    }

    fn to_der_bytes(&self) -> Result<Vec<u8>> {
        self.to_der().context(EncodeDerSnafu)
    }

    fn to_pem_string(&self) -> Result<String> {
        self.to_pem(LineEnding::LF).context(EncodePemSnafu)
    }

    fn to_json(&self) -> Result<CertificateJson> {
        CertificateJson::try_from(self)
    }

    fn serial_number_u64(&self) -> Result<u64> {
        let bytes = self.tbs_certificate.serial_number.as_bytes();
        let significant: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
        ensure!(significant.len() <= 8, SerialNumberTooLargeSnafu {
            len: significant.len()
        });

        Ok(significant
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)))
    }

    fn subject_attributes(&self) -> DistinguishedName {
        DistinguishedName::from_name(&self.tbs_certificate.subject)
    }

    fn issuer_attributes(&self) -> DistinguishedName {
        DistinguishedName::from_name(&self.tbs_certificate.issuer)
    }

    fn common_name(&self) -> Option<String> {
        self.subject_attributes().common_name().map(ToOwned::to_owned)
    }

    fn not_before(&self) -> OffsetDateTime {
        to_offset_date_time(self.tbs_certificate.validity.not_before.to_system_time())
    }

    fn not_after(&self) -> OffsetDateTime {
        to_offset_date_time(self.tbs_certificate.validity.not_after.to_system_time())
    }

    fn public_key_pem(&self) -> Result<String> {
        self.tbs_certificate
            .subject_public_key_info
            .to_pem(LineEnding::LF)
            .context(EncodePublicKeySnafu)
    }

    fn basic_constraints(&self) -> Result<Option<BasicConstraints>> {
        find_extension(self)
    }

    fn key_usage(&self) -> Result<Option<KeyUsage>> {
        find_extension(self)
    }
}

fn to_offset_date_time(time: SystemTime) -> OffsetDateTime {
    OffsetDateTime::from(time)
}

fn find_extension<E>(certificate: &Certificate) -> Result<Option<E>>
where
    E: AssociatedOid + DecodeOwned,
{
    let Some(extensions) = &certificate.tbs_certificate.extensions else {
        return Ok(None);
    };

    extensions
        .iter()
        .find(|extension| extension.extn_id == E::OID)
        .map(|extension| {
            E::from_der(extension.extn_value.as_bytes())
                .context(DecodeExtensionSnafu { oid: E::OID })
        })
        .transpose()
}

/// The structured JSON export of a certificate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateJson {
    pub version: u8,
    pub serial_number: u64,
    pub subject: IndexMap<String, String>,
    pub issuer: IndexMap<String, String>,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_from: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_until: OffsetDateTime,
    pub public_key: String,
    pub signature_algorithm: String,
    pub basic_constraints: Option<BasicConstraintsJson>,
    pub key_usage: Option<KeyUsageJson>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicConstraintsJson {
    pub ca: bool,
    pub path_len_constraint: Option<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyUsageJson {
    pub digital_signature: bool,
    pub key_cert_sign: bool,
    #[serde(rename = "cRLSign")]
    pub crl_sign: bool,
}

impl TryFrom<&Certificate> for CertificateJson {
    type Error = Error;

    fn try_from(certificate: &Certificate) -> Result<Self> {
        let basic_constraints =
            certificate
                .basic_constraints()?
                .map(|constraints| BasicConstraintsJson {
                    ca: constraints.ca,
                    path_len_constraint: constraints.path_len_constraint,
                });

        let key_usage = certificate.key_usage()?.map(|usage| KeyUsageJson {
            digital_signature: usage.digital_signature(),
            key_cert_sign: usage.key_cert_sign(),
            crl_sign: usage.crl_sign(),
        });

        Ok(Self {
            version: certificate.tbs_certificate.version as u8 + 1,
            serial_number: certificate.serial_number_u64()?,
            subject: certificate.subject_attributes().to_map(),
            issuer: certificate.issuer_attributes().to_map(),
            valid_from: certificate.not_before(),
            valid_until: certificate.not_after(),
            public_key: certificate.public_key_pem()?,
            signature_algorithm: certificate.signature_algorithm.oid.to_string(),
            basic_constraints,
            key_usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn name_roundtrip_keeps_order() {
        let dn = DistinguishedName::new()
            .with(AttributeName::CountryName, "DE")
            .with(AttributeName::OrganizationName, "zen-trust.net")
            .with(AttributeName::CommonName, "Example Root");

        let name = dn.to_name().expect("failed to encode name");
        assert_eq!(name.0.len(), 3);
        assert_eq!(
            name.0[2].0.iter().next().map(|atv| atv.oid),
            Some(AttributeName::CommonName.oid())
        );

        let decoded = DistinguishedName::from_name(&name);
        assert_eq!(decoded, dn);
        assert_eq!(
            decoded.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            ["countryName", "organizationName", "commonName"]
        );
    }

    #[test]
    fn unknown_oid_attribute() {
        let dn: DistinguishedName = [("0.9.2342.19200300.100.1.25", "example")]
            .into_iter()
            .collect();

        let name = dn.to_name().expect("failed to encode name");
        assert_eq!(DistinguishedName::from_name(&name), dn);
    }

    #[rstest]
    #[case("cn")]
    #[case("not an oid")]
    fn reject_unknown_attribute(#[case] key: &str) {
        let dn: DistinguishedName = [(key, "value")].into_iter().collect();
        assert!(matches!(
            dn.to_name(),
            Err(Error::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn extend_replaces_in_place() {
        let mut dn = DistinguishedName::new()
            .with(AttributeName::OrganizationName, "Fides.io")
            .with(AttributeName::CommonName, "first");
        dn.extend(&DistinguishedName::new().with(AttributeName::OrganizationName, "other"));

        assert_eq!(dn.get(AttributeName::OrganizationName), Some("other"));
        assert_eq!(dn.iter().next(), Some(("organizationName", "other")));
    }
}
