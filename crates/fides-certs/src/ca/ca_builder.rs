use std::time::SystemTime;

use bon::Builder;
use fides_shared::time::Duration;
use snafu::{ResultExt, Snafu, ensure};
use time::OffsetDateTime;
use tracing::{debug, instrument};
use x509_cert::{
    serial_number::SerialNumber,
    time::{Time, Validity},
};

use super::CertificateAuthority;
use crate::{
    ca::{
        CaProfile, CertificateRequest, DEFAULT_CA_COMMON_NAME, DEFAULT_CA_VALIDITY,
        SignCertificateError, X509Builder, X509CertBuilder,
    },
    certificate::{AttributeName, CertificateExt, DistinguishedName},
    keys::CertificateKeypair,
};

/// The reason why a CA cannot be used to sign other CAs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum ParentNotUsableReason {
    #[strum(to_string = "it has expired")]
    Expired,

    #[strum(to_string = "it has been revoked")]
    Revoked,

    #[strum(to_string = "it is not active")]
    Inactive,

    #[strum(to_string = "its certificate is not a CA certificate")]
    NotCertificateAuthority,
}

/// Defines all error variants which can occur when creating a CA.
#[derive(Debug, Snafu)]
pub enum CreateCertificateAuthorityError<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("failed to parse validity"))]
    ParseValidity { source: x509_cert::der::Error },

    #[snafu(display("the validity period from {not_before} until {not_after} is empty"))]
    EmptyValidity {
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    },

    #[snafu(display("failed to encode subject"))]
    EncodeSubject {
        source: crate::certificate::Error,
    },

    #[snafu(display("failed to create signing key pair"))]
    CreateSigningKeyPair { source: E },

    #[snafu(display("failed to sign certificate"))]
    SignCertificate { source: SignCertificateError<E> },

    #[snafu(display("failed to inspect the parent certificate"))]
    InspectParent {
        source: crate::certificate::Error,
    },

    #[snafu(display("the parent CA cannot be used to sign, because {reason}"))]
    ParentNotUsable { reason: ParentNotUsableReason },
}

/// This builder builds self-signed root certificate authorities of type
/// [`CertificateAuthority`].
///
/// It has many default values, notably;
///
/// - A default validity of [`DEFAULT_CA_VALIDITY`], starting now
/// - A default common name of [`DEFAULT_CA_COMMON_NAME`]
/// - In case no `key_pair` was provided, a fresh keypair of `key_size` bits
///   (or the algorithm default) will be created. The algorithm (`rsa`/`ecdsa`)
///   is chosen by the generic [`CertificateKeypair`] type of this struct.
///
/// The serial number has to be allocated by the caller.
///
/// ```no_run
/// use fides_certs::{ca::CertificateAuthority, keys::ecdsa};
///
/// let ca = CertificateAuthority::<ecdsa::SigningKey>::root_builder()
///     .common_name("Example Root")
///     .serial_number(1)
///     .build()
///     .expect("failed to build CA");
/// ```
#[derive(Builder)]
#[builder(start_fn = start_builder, finish_fn = finish_builder)]
pub struct RootCaBuilder<'a, K>
where
    K: CertificateKeypair,
{
    /// The common name of the CA subject.
    #[builder(default = DEFAULT_CA_COMMON_NAME)]
    common_name: &'a str,

    /// Additional subject attributes, placed in front of the common name.
    #[builder(default)]
    subject_attributes: DistinguishedName,

    serial_number: u64,

    /// Start of the validity period, defaults to now.
    valid_from: Option<OffsetDateTime>,

    /// Validity/lifetime of the certificate.
    #[builder(default = DEFAULT_CA_VALIDITY)]
    validity: Duration,

    /// Cryptographic keypair of the CA.
    ///
    /// If not specified a random keypair will be generated.
    key_pair: Option<K>,

    /// The size of the generated keypair in bits. Ignored if `key_pair` is
    /// specified.
    key_size: Option<usize>,
}

impl<K, S> RootCaBuilderBuilder<'_, K, S>
where
    K: CertificateKeypair,
    S: root_ca_builder_builder::IsComplete,
{
    /// Convenience function to avoid calling `builder().finish_builder().build()`
    pub fn build(self) -> Result<CertificateAuthority<K>, CreateCertificateAuthorityError<K::Error>> {
        self.finish_builder().build()
    }
}

impl<K> RootCaBuilder<'_, K>
where
    K: CertificateKeypair,
{
    #[instrument(
        name = "build_root_certificate_authority",
        skip(self),
        fields(ca.common_name = self.common_name, ca.serial = self.serial_number),
    )]
    pub fn build(self) -> Result<CertificateAuthority<K>, CreateCertificateAuthorityError<K::Error>> {
        let not_before = self.valid_from.unwrap_or_else(OffsetDateTime::now_utc);
        let validity = validity(not_before, not_before + self.validity)?;
        let subject_attributes = with_common_name(self.subject_attributes, self.common_name);
        let subject = subject_attributes.to_name().context(EncodeSubjectSnafu)?;
        let key_pair = key_pair_or_new(self.key_pair, self.key_size)?;

        debug!(
            ca.subject = %subject,
            ca.not_after = %validity.not_after,
            ca.not_before = %validity.not_before,
            ca.public_key.algorithm = K::algorithm_name(),
            ca.public_key.size = key_pair.key_size(),
            "creating root certificate authority"
        );

        let request = CertificateRequest {
            profile: CaProfile::Root,
            subject,
            serial_number: SerialNumber::from(self.serial_number),
            validity,
        };
        let certificate = X509CertBuilder
            .self_sign(request, &key_pair)
            .context(SignCertificateSnafu)?;

        Ok(CertificateAuthority::from_parts(certificate, key_pair))
    }
}

/// This builder builds intermediate certificate authorities signed by a
/// parent [`CertificateAuthority`].
///
/// The issuer of the new certificate is the subject of the parent. The
/// validity period is capped at the end of the parent's validity period.
/// Building fails with [`CreateCertificateAuthorityError::ParentNotUsable`] if
/// the parent certificate has expired or is not a CA certificate.
///
/// ```no_run
/// use fides_certs::{ca::CertificateAuthority, keys::ecdsa};
///
/// let root = CertificateAuthority::<ecdsa::SigningKey>::root_builder()
///     .serial_number(1)
///     .build()
///     .expect("failed to build root CA");
///
/// let intermediate = root
///     .intermediate_builder()
///     .common_name("Example Intermediate")
///     .serial_number(1)
///     .build()
///     .expect("failed to build intermediate CA");
/// ```
#[derive(Builder)]
#[builder(start_fn = start_builder, finish_fn = finish_builder)]
pub struct IntermediateCaBuilder<'a, K>
where
    K: CertificateKeypair,
{
    /// The CA which signs the new certificate.
    #[builder(start_fn)]
    signed_by: &'a CertificateAuthority<K>,

    /// The common name of the CA subject.
    #[builder(default = DEFAULT_CA_COMMON_NAME)]
    common_name: &'a str,

    /// Additional subject attributes, placed in front of the common name.
    #[builder(default)]
    subject_attributes: DistinguishedName,

    serial_number: u64,

    /// Start of the validity period, defaults to now.
    valid_from: Option<OffsetDateTime>,

    /// Validity/lifetime of the certificate.
    #[builder(default = DEFAULT_CA_VALIDITY)]
    validity: Duration,

    /// Cryptographic keypair of the new CA.
    ///
    /// If not specified a random keypair will be generated.
    key_pair: Option<K>,

    /// The size of the generated keypair in bits. Ignored if `key_pair` is
    /// specified.
    key_size: Option<usize>,
}

impl<K, S> IntermediateCaBuilderBuilder<'_, K, S>
where
    K: CertificateKeypair,
    S: intermediate_ca_builder_builder::IsComplete,
{
    /// Convenience function to avoid calling `builder().finish_builder().build()`
    pub fn build(self) -> Result<CertificateAuthority<K>, CreateCertificateAuthorityError<K::Error>> {
        self.finish_builder().build()
    }
}

impl<K> IntermediateCaBuilder<'_, K>
where
    K: CertificateKeypair,
{
    #[instrument(
        name = "build_intermediate_certificate_authority",
        skip(self),
        fields(ca.common_name = self.common_name, ca.serial = self.serial_number),
    )]
    pub fn build(self) -> Result<CertificateAuthority<K>, CreateCertificateAuthorityError<K::Error>> {
        let parent = self.signed_by;
        let parent_certificate = parent.certificate();

        ensure!(!parent_certificate.is_expired(), ParentNotUsableSnafu {
            reason: ParentNotUsableReason::Expired
        });

        let parent_is_ca = parent_certificate
            .basic_constraints()
            .context(InspectParentSnafu)?
            .is_some_and(|constraints| constraints.ca);
        ensure!(parent_is_ca, ParentNotUsableSnafu {
            reason: ParentNotUsableReason::NotCertificateAuthority
        });

        let not_before = self.valid_from.unwrap_or_else(OffsetDateTime::now_utc);
        let mut not_after = not_before + self.validity;
        let parent_not_after = parent_certificate.not_after();
        if not_after > parent_not_after {
            debug!(
                ca.not_after = %not_after,
                ca.parent.not_after = %parent_not_after,
                "capping validity at the end of the parent validity"
            );
            not_after = parent_not_after;
        }
        let validity = validity(not_before, not_after)?;

        let subject_attributes = with_common_name(self.subject_attributes, self.common_name);
        let subject = subject_attributes.to_name().context(EncodeSubjectSnafu)?;
        let key_pair = key_pair_or_new(self.key_pair, self.key_size)?;

        debug!(
            ca.subject = %subject,
            ca.issuer = %parent.subject_name(),
            ca.not_after = %validity.not_after,
            ca.not_before = %validity.not_before,
            ca.public_key.algorithm = K::algorithm_name(),
            ca.public_key.size = key_pair.key_size(),
            "creating intermediate certificate authority"
        );

        let request = CertificateRequest {
            profile: CaProfile::Intermediate,
            subject,
            serial_number: SerialNumber::from(self.serial_number),
            validity,
        };
        let certificate = X509CertBuilder
            .sign_with_parent(request, &key_pair, parent)
            .context(SignCertificateSnafu)?;

        Ok(CertificateAuthority::from_parts(certificate, key_pair))
    }
}

/// Both ends are truncated to whole seconds, the precision of X.509 times.
fn validity<E>(
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> Result<Validity, CreateCertificateAuthorityError<E>>
where
    E: std::error::Error + 'static,
{
    ensure!(not_before < not_after, EmptyValiditySnafu {
        not_before,
        not_after
    });

    let to_time = |at: OffsetDateTime| Time::try_from(SystemTime::from(at));
    Ok(Validity {
        not_before: to_time(not_before).context(ParseValiditySnafu)?,
        not_after: to_time(not_after).context(ParseValiditySnafu)?,
    })
}

fn with_common_name(mut attributes: DistinguishedName, common_name: &str) -> DistinguishedName {
    attributes.insert(AttributeName::CommonName, common_name);
    attributes
}

fn key_pair_or_new<K>(
    key_pair: Option<K>,
    key_size: Option<usize>,
) -> Result<K, CreateCertificateAuthorityError<K::Error>>
where
    K: CertificateKeypair,
{
    match key_pair {
        Some(key_pair) => Ok(key_pair),
        None => K::new(key_size.unwrap_or(K::DEFAULT_KEY_SIZE)).context(CreateSigningKeyPairSnafu),
    }
}

#[cfg(test)]
mod tests {
    use x509_cert::Certificate;

    use super::*;
    use crate::keys::{ecdsa, rsa};

    fn assert_validity(certificate: &Certificate, validity: Duration) {
        let not_before = certificate.tbs_certificate.validity.not_before.to_system_time();
        let not_after = certificate.tbs_certificate.validity.not_after.to_system_time();
        assert_eq!(
            not_after
                .duration_since(not_before)
                .expect("Failed to calculate duration between notBefore and notAfter"),
            *validity
        );
    }

    #[test]
    fn minimal_root_ca() {
        let ca = CertificateAuthority::root_builder_with_ecdsa()
            .serial_number(7)
            .build()
            .expect("failed to build CA");
        let certificate = ca.certificate();

        assert_eq!(certificate.common_name().as_deref(), Some(DEFAULT_CA_COMMON_NAME));
        assert_eq!(certificate.serial_number_u64().expect("serial"), 7);
        assert_eq!(
            certificate.tbs_certificate.issuer,
            certificate.tbs_certificate.subject
        );
        assert_validity(certificate, DEFAULT_CA_VALIDITY);

        let constraints = certificate
            .basic_constraints()
            .expect("failed to decode basic constraints")
            .expect("basic constraints must be present");
        assert!(constraints.ca);
        assert_eq!(constraints.path_len_constraint, Some(0));

        let key_usage = certificate
            .key_usage()
            .expect("failed to decode key usage")
            .expect("key usage must be present");
        assert!(key_usage.key_cert_sign());
        assert!(!key_usage.crl_sign());

        X509Builder::<ecdsa::SigningKey>::verify_issued_by(&X509CertBuilder, certificate, certificate)
            .expect("root must verify against itself");
    }

    #[test]
    fn rsa_root_ca_pem_roundtrip() {
        let ca = CertificateAuthority::root_builder_with_rsa()
            .common_name("Example Root")
            .serial_number(1)
            .validity(Duration::from_days_unchecked(365))
            .key_size(2048)
            .build()
            .expect("failed to build CA");

        assert_eq!(ca.key_pair().key_size(), 2048);

        let pem = ca.certificate().to_pem_string().expect("failed to encode PEM");
        let parsed = Certificate::from_pem_str(&pem).expect("failed to parse PEM");

        assert_eq!(parsed.common_name().as_deref(), Some("Example Root"));
        assert_eq!(parsed.serial_number_u64().expect("serial"), 1);
        X509Builder::<rsa::SigningKey>::verify_issued_by(&X509CertBuilder, &parsed, &parsed)
            .expect("root must verify against itself");
    }

    #[test]
    fn reject_weak_rsa_key() {
        let err = CertificateAuthority::root_builder_with_rsa()
            .serial_number(1)
            .key_size(1024)
            .build()
            .expect_err("weak key must be rejected");

        assert!(matches!(
            err,
            CreateCertificateAuthorityError::CreateSigningKeyPair {
                source: rsa::Error::WeakKey { .. }
            }
        ));
    }

    #[test]
    fn intermediate_ca() {
        let root = CertificateAuthority::root_builder_with_ecdsa()
            .common_name("Example Root")
            .subject_attributes(
                DistinguishedName::new().with(AttributeName::OrganizationName, "zen-trust.net"),
            )
            .serial_number(1)
            .build()
            .expect("failed to build root CA");

        let intermediate = root
            .intermediate_builder()
            .common_name("Example Intermediate")
            .serial_number(1)
            .validity(Duration::from_days_unchecked(30))
            .build()
            .expect("failed to build intermediate CA");
        let certificate = intermediate.certificate();

        assert_eq!(certificate.issuer_attributes(), root.subject_attributes());
        assert_eq!(
            certificate.common_name().as_deref(),
            Some("Example Intermediate")
        );
        assert_validity(certificate, Duration::from_days_unchecked(30));

        let constraints = certificate
            .basic_constraints()
            .expect("failed to decode basic constraints")
            .expect("basic constraints must be present");
        assert_eq!(constraints.path_len_constraint, Some(1));

        let key_usage = certificate
            .key_usage()
            .expect("failed to decode key usage")
            .expect("key usage must be present");
        assert!(key_usage.key_cert_sign());
        assert!(key_usage.crl_sign());

        X509Builder::<ecdsa::SigningKey>::verify_issued_by(
            &X509CertBuilder,
            certificate,
            root.certificate(),
        )
        .expect("intermediate must verify against its root");

        let other_root = CertificateAuthority::root_builder_with_ecdsa()
            .common_name("Example Root")
            .subject_attributes(
                DistinguishedName::new().with(AttributeName::OrganizationName, "zen-trust.net"),
            )
            .serial_number(2)
            .build()
            .expect("failed to build root CA");
        let err = X509Builder::<ecdsa::SigningKey>::verify_issued_by(
            &X509CertBuilder,
            certificate,
            other_root.certificate(),
        )
        .expect_err("intermediate must not verify against a different key");
        assert!(matches!(err, SignCertificateError::VerifySignature { .. }));
    }

    #[test]
    fn intermediate_validity_is_capped() {
        let root = CertificateAuthority::root_builder_with_ecdsa()
            .serial_number(1)
            .validity(Duration::from_days_unchecked(1))
            .build()
            .expect("failed to build root CA");

        let intermediate = root
            .intermediate_builder()
            .serial_number(1)
            .build()
            .expect("failed to build intermediate CA");

        assert_eq!(
            intermediate.certificate().tbs_certificate.validity.not_after,
            root.certificate().tbs_certificate.validity.not_after
        );
    }

    #[test]
    fn intermediate_starting_after_parent_is_rejected() {
        let root = CertificateAuthority::root_builder_with_ecdsa()
            .serial_number(1)
            .validity(Duration::from_days_unchecked(1))
            .build()
            .expect("failed to build root CA");

        let err = root
            .intermediate_builder()
            .serial_number(1)
            .valid_from(OffsetDateTime::now_utc() + Duration::from_days_unchecked(10))
            .build()
            .expect_err("validity outside of the parent must be rejected");

        // The end is capped at the parent, the start stays after it.
        let parent_not_after = root.certificate().not_after();
        assert!(matches!(
            err,
            CreateCertificateAuthorityError::EmptyValidity { not_before, not_after }
                if not_after == parent_not_after && not_before > not_after
        ));
    }

    #[test]
    fn zero_validity_is_rejected() {
        let err = CertificateAuthority::root_builder_with_ecdsa()
            .serial_number(1)
            .validity(Duration::from_secs(0))
            .build()
            .expect_err("empty validity must be rejected");

        assert!(matches!(
            err,
            CreateCertificateAuthorityError::EmptyValidity { .. }
        ));
    }

    #[test]
    fn expired_parent_is_not_usable() {
        let root = CertificateAuthority::root_builder_with_ecdsa()
            .serial_number(1)
            .valid_from(OffsetDateTime::now_utc() - time::Duration::days(3))
            .validity(Duration::from_days_unchecked(1))
            .build()
            .expect("failed to build root CA");
        assert!(root.certificate().is_expired());

        let err = root
            .intermediate_builder()
            .serial_number(1)
            .build()
            .expect_err("expired parent must be rejected");

        assert!(matches!(err, CreateCertificateAuthorityError::ParentNotUsable {
            reason: ParentNotUsableReason::Expired
        }));
    }
}
