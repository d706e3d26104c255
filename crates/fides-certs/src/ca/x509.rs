use signature::Keypair;
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, instrument};
use x509_cert::{
    Certificate,
    builder::{Builder, CertificateBuilder, Profile},
    der::{Decode, Encode, referenced::OwnedToRef},
    ext::pkix::{
        AuthorityKeyIdentifier, BasicConstraints, KeyUsage, KeyUsages, SubjectKeyIdentifier,
    },
    name::Name,
    serial_number::SerialNumber,
    spki::{DynSignatureAlgorithmIdentifier, EncodePublicKey, SubjectPublicKeyInfoOwned},
    time::Validity,
};

use crate::{ca::CertificateAuthority, keys::CertificateKeypair};

#[derive(Debug, Snafu)]
pub enum SignCertificateError<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("failed to encode subject public key"))]
    EncodePublicKey { source: x509_cert::spki::Error },

    #[snafu(display("failed to decode SPKI"))]
    DecodeSpki { source: x509_cert::der::Error },

    #[snafu(display("failed to derive key identifier"))]
    DeriveKeyIdentifier { source: x509_cert::der::Error },

    #[snafu(display("failed to create certificate builder"))]
    CreateCertificateBuilder { source: x509_cert::builder::Error },

    #[snafu(display("failed to add certificate extension"))]
    AddCertificateExtension { source: x509_cert::builder::Error },

    #[snafu(display("failed to build certificate"))]
    BuildCertificate { source: x509_cert::builder::Error },

    #[snafu(display("failed to encode TBS certificate"))]
    EncodeTbsCertificate { source: x509_cert::der::Error },

    #[snafu(display("certificate issuer {issuer} does not match subject {expected} of the CA"))]
    IssuerMismatch { issuer: Name, expected: Name },

    #[snafu(display("certificate signature does not verify against the CA public key"))]
    VerifySignature { source: E },
}

/// The CA profiles this crate can issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CaProfile {
    /// Self-signed, `pathLen = 0`, `keyCertSign`.
    Root,

    /// Signed by a parent CA, `pathLen = 1`, `keyCertSign` and `cRLSign`.
    Intermediate,
}

impl CaProfile {
    pub fn path_len_constraint(&self) -> u8 {
        match self {
            Self::Root => 0,
            Self::Intermediate => 1,
        }
    }

    pub fn key_usage(&self) -> KeyUsage {
        match self {
            Self::Root => KeyUsage(KeyUsages::KeyCertSign.into()),
            Self::Intermediate => KeyUsage(KeyUsages::KeyCertSign | KeyUsages::CRLSign),
        }
    }
}

/// Everything needed to issue a certificate, apart from the keys.
#[derive(Clone, Debug)]
pub struct CertificateRequest {
    pub profile: CaProfile,
    pub subject: Name,
    pub serial_number: SerialNumber,
    pub validity: Validity,
}

/// Narrow interface around the X.509 library used to assemble, sign and
/// verify CA certificates.
pub trait X509Builder<K>
where
    K: CertificateKeypair,
{
    type Error: std::error::Error + 'static;

    /// Issues a certificate whose issuer is its own subject, signed with
    /// `key_pair`.
    fn self_sign(&self, request: CertificateRequest, key_pair: &K)
    -> Result<Certificate, Self::Error>;

    /// Issues a certificate for `subject_key_pair`, with the subject of
    /// `parent` as issuer, signed with the key of `parent`.
    fn sign_with_parent(
        &self,
        request: CertificateRequest,
        subject_key_pair: &K,
        parent: &CertificateAuthority<K>,
    ) -> Result<Certificate, Self::Error>;

    /// Checks that `certificate` names `issuer` as its issuer and that its
    /// signature verifies against the public key of `issuer`.
    fn verify_issued_by(
        &self,
        certificate: &Certificate,
        issuer: &Certificate,
    ) -> Result<(), Self::Error>;
}

/// The [`X509Builder`] backed by the RustCrypto [`x509_cert`] crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct X509CertBuilder;

impl<K> X509Builder<K> for X509CertBuilder
where
    K: CertificateKeypair,
{
    type Error = SignCertificateError<K::Error>;

    #[instrument(
        name = "self_sign_certificate",
        skip_all,
        fields(subject = %request.subject, profile = %request.profile)
    )]
    fn self_sign(
        &self,
        request: CertificateRequest,
        key_pair: &K,
    ) -> Result<Certificate, Self::Error> {
        let spki = subject_public_key_info(key_pair)?;
        let ski = SubjectKeyIdentifier::try_from(spki.owned_to_ref())
            .context(DeriveKeyIdentifierSnafu)?;

        let mut builder = CertificateBuilder::new(
            Profile::Manual { issuer: None },
            request.serial_number,
            request.validity,
            request.subject,
            spki,
            key_pair.signing_key(),
        )
        .context(CreateCertificateBuilderSnafu)?;

        builder
            .add_extension(&ski)
            .context(AddCertificateExtensionSnafu)?;
        add_ca_extensions(&mut builder, request.profile).context(AddCertificateExtensionSnafu)?;

        builder.build().context(BuildCertificateSnafu)
    }

    #[instrument(
        name = "sign_certificate_with_parent",
        skip_all,
        fields(subject = %request.subject, profile = %request.profile)
    )]
    fn sign_with_parent(
        &self,
        request: CertificateRequest,
        subject_key_pair: &K,
        parent: &CertificateAuthority<K>,
    ) -> Result<Certificate, Self::Error> {
        let parent_certificate = parent.certificate();
        let issuer = parent_certificate.tbs_certificate.subject.clone();

        let spki = subject_public_key_info(subject_key_pair)?;
        let ski = SubjectKeyIdentifier::try_from(spki.owned_to_ref())
            .context(DeriveKeyIdentifierSnafu)?;
        let aki = AuthorityKeyIdentifier::try_from(
            parent_certificate
                .tbs_certificate
                .subject_public_key_info
                .owned_to_ref(),
        )
        .context(DeriveKeyIdentifierSnafu)?;

        debug!(
            ca.issuer = %issuer,
            ca.serial = ?request.serial_number,
            "signing certificate with parent CA"
        );

        let mut builder = CertificateBuilder::new(
            Profile::Manual {
                issuer: Some(issuer),
            },
            request.serial_number,
            request.validity,
            request.subject,
            spki,
            parent.signing_key(),
        )
        .context(CreateCertificateBuilderSnafu)?;

        builder
            .add_extension(&ski)
            .context(AddCertificateExtensionSnafu)?;
        builder
            .add_extension(&aki)
            .context(AddCertificateExtensionSnafu)?;
        add_ca_extensions(&mut builder, request.profile).context(AddCertificateExtensionSnafu)?;

        builder.build().context(BuildCertificateSnafu)
    }

    fn verify_issued_by(
        &self,
        certificate: &Certificate,
        issuer: &Certificate,
    ) -> Result<(), Self::Error> {
        let expected = &issuer.tbs_certificate.subject;
        ensure!(
            certificate.tbs_certificate.issuer == *expected,
            IssuerMismatchSnafu {
                issuer: certificate.tbs_certificate.issuer.clone(),
                expected: expected.clone(),
            }
        );

        let message = certificate
            .tbs_certificate
            .to_der()
            .context(EncodeTbsCertificateSnafu)?;

        K::verify(
            &issuer.tbs_certificate.subject_public_key_info,
            &message,
            certificate.signature.raw_bytes(),
        )
        .context(VerifySignatureSnafu)
    }
}

fn subject_public_key_info<K>(
    key_pair: &K,
) -> Result<SubjectPublicKeyInfoOwned, SignCertificateError<K::Error>>
where
    K: CertificateKeypair,
{
    let document = key_pair
        .verifying_key()
        .to_public_key_der()
        .context(EncodePublicKeySnafu)?;

    SubjectPublicKeyInfoOwned::from_der(document.as_bytes()).context(DecodeSpkiSnafu)
}

fn add_ca_extensions<S>(
    builder: &mut CertificateBuilder<'_, S>,
    profile: CaProfile,
) -> Result<(), x509_cert::builder::Error>
where
    S: Keypair + DynSignatureAlgorithmIdentifier,
    S::VerifyingKey: EncodePublicKey,
{
    builder.add_extension(&BasicConstraints {
        ca: true,
        path_len_constraint: Some(profile.path_len_constraint()),
    })?;
    builder.add_extension(&profile.key_usage())
}
