use std::path::PathBuf;

use clap::{Args, Subcommand};
use fides_authority::PkiOptions;
use fides_certs::{
    ca::{CertificateAuthority, X509Builder, X509CertBuilder},
    certificate,
    envelope::{self, EncryptedPrivateKey},
    keys::{CertificateKeypair, ecdsa, rsa},
};
use fides_shared::time::Duration;
use snafu::{OptionExt, ResultExt, Snafu};
use x509_cert::{Certificate, spki::ObjectIdentifier};

use super::{
    CreateCertificateAuthoritySnafu, DecodeParentKeySnafu, FileError, IssueError, KeyAlgorithm,
    MissingSecretKeySnafu, ReadParentKeySnafu, ReadPassphraseSnafu, UnlockParentKeySnafu,
    VerifyIssuedCertificateSnafu, WeakKeySnafu, decode_certificate, read_file, read_passphrase,
    write_authority,
};

pub const FILE_STEM: &str = "intermediate-ca";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read the parent certificate"))]
    ReadParentCertificate { source: FileError },

    #[snafu(display("failed to decode the parent certificate"))]
    DecodeParentCertificate { source: certificate::Error },

    #[snafu(display("the parent certificate uses the unsupported key algorithm {oid}"))]
    UnsupportedAlgorithm { oid: ObjectIdentifier },

    #[snafu(display("failed to issue RSA intermediate CA"))]
    IssueRsa { source: IssueError<rsa::Error> },

    #[snafu(display("failed to issue ECDSA intermediate CA"))]
    IssueEcdsa { source: IssueError<ecdsa::Error> },
}

#[derive(Debug, Subcommand)]
pub enum IntermediateCommand {
    /// Issue an intermediate CA signed by a root CA. The private key is
    /// encrypted with the server secret key.
    Issue(IssueArgs),
}

impl IntermediateCommand {
    pub fn run(self) -> Result<(), Error> {
        match self {
            Self::Issue(args) => args.run(),
        }
    }
}

#[derive(Debug, Args)]
pub struct IssueArgs {
    /// The PEM or DER encoded certificate of the parent CA.
    #[arg(long, value_name = "FILE")]
    pub parent_certificate: PathBuf,

    /// The encrypted private key of the parent CA.
    #[arg(long, value_name = "FILE")]
    pub parent_key: PathBuf,

    /// File containing the passphrase of the parent private key.
    #[arg(long, value_name = "FILE")]
    pub passphrase_file: PathBuf,

    /// The common name of the CA. Defaults to "<issuer name> Intermediate CA".
    #[arg(long)]
    pub common_name: Option<String>,

    /// The serial number of the certificate.
    #[arg(long)]
    pub serial: u64,

    /// The validity of the certificate. It never exceeds the validity of the
    /// parent.
    #[arg(long, value_name = "DURATION")]
    pub validity: Option<Duration>,

    /// Directory the certificate and encrypted private key are written to.
    #[arg(long, value_name = "DIR")]
    pub out_dir: PathBuf,

    #[command(flatten)]
    pub pki: PkiOptions,
}

impl IssueArgs {
    pub fn run(self) -> Result<(), Error> {
        let parent_certificate =
            read_file(&self.parent_certificate).context(ReadParentCertificateSnafu)?;
        let parent_certificate =
            decode_certificate(&parent_certificate).context(DecodeParentCertificateSnafu)?;

        // The new key pair uses the algorithm of the parent.
        match KeyAlgorithm::of_certificate(&parent_certificate) {
            Ok(KeyAlgorithm::Rsa) => self
                .issue::<rsa::SigningKey>(parent_certificate)
                .context(IssueRsaSnafu),
            Ok(KeyAlgorithm::Ecdsa) => self
                .issue::<ecdsa::SigningKey>(parent_certificate)
                .context(IssueEcdsaSnafu),
            Err(oid) => UnsupportedAlgorithmSnafu { oid }.fail(),
        }
    }

    fn issue<K>(&self, parent_certificate: Certificate) -> Result<(), IssueError<K::Error>>
    where
        K: CertificateKeypair,
    {
        let secret_key = self.pki.secret_key.as_ref().context(MissingSecretKeySnafu)?;
        let passphrase = read_passphrase(&self.passphrase_file).context(ReadPassphraseSnafu)?;
        let key_size = self.pki.key_size_for::<K>().context(WeakKeySnafu)?;

        let parent_key = read_file(&self.parent_key).context(ReadParentKeySnafu)?;
        let parent_key = EncryptedPrivateKey::from_bytes(parent_key).context(DecodeParentKeySnafu)?;
        let parent_key: K =
            envelope::open_key_pair(&parent_key, &passphrase).context(UnlockParentKeySnafu)?;
        let parent = CertificateAuthority::from_parts(parent_certificate, parent_key);

        let common_name = self.common_name.clone().unwrap_or_else(|| {
            format!("{} Intermediate CA", self.pki.certificate_issuer_name)
        });

        let ca = parent
            .intermediate_builder()
            .common_name(&common_name)
            .subject_attributes(self.pki.subject_attributes())
            .serial_number(self.serial)
            .validity(self.validity.unwrap_or(self.pki.default_validity))
            .key_size(key_size)
            .build()
            .context(CreateCertificateAuthoritySnafu)?;

        <X509CertBuilder as X509Builder<K>>::verify_issued_by(
            &X509CertBuilder,
            ca.certificate(),
            parent.certificate(),
        )
        .context(VerifyIssuedCertificateSnafu)?;

        write_authority(&ca, secret_key.as_bytes(), &self.out_dir, FILE_STEM)
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path};

    use fides_authority::options::SecretKey;
    use fides_certs::certificate::CertificateExt;

    use super::*;
    use crate::commands::root::{self, tests::PASSPHRASE};

    const SECRET_KEY: [u8; 32] = [9u8; 32];

    fn issue_root(dir: &Path) -> PathBuf {
        let args = root::tests::issue_args(dir);
        let out_dir = args.out_dir.clone();
        args.run().expect("failed to issue root CA");
        out_dir
    }

    fn issue_args(dir: &Path, root_dir: &Path) -> IssueArgs {
        IssueArgs {
            parent_certificate: root_dir.join("root-ca.crt"),
            parent_key: root_dir.join("root-ca.key.enc"),
            passphrase_file: dir.join("passphrase"),
            common_name: None,
            serial: 1,
            validity: Some(Duration::from_days_unchecked(365)),
            out_dir: dir.join("intermediate"),
            pki: PkiOptions {
                secret_key: Some(SecretKey::new(SECRET_KEY)),
                ..PkiOptions::default()
            },
        }
    }

    #[test]
    fn issue_signed_by_root() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let root_dir = issue_root(dir.path());
        let args = issue_args(dir.path(), &root_dir);
        let out_dir = args.out_dir.clone();

        args.run().expect("failed to issue intermediate CA");

        let pem = fs::read_to_string(out_dir.join("intermediate-ca.crt"))
            .expect("failed to read certificate");
        let certificate = Certificate::from_pem_str(&pem).expect("failed to parse certificate");
        assert_eq!(
            certificate.common_name().as_deref(),
            Some("Fides.io Intermediate CA")
        );
        assert_eq!(
            certificate.issuer_attributes().common_name(),
            Some("Example Root")
        );

        // The intermediate is capped at the 30 day validity of the root.
        assert!((certificate.not_after() - certificate.not_before()).whole_days() <= 30);

        // The intermediate key is protected by the secret key, not the passphrase.
        let envelope = EncryptedPrivateKey::from_bytes(
            fs::read(out_dir.join("intermediate-ca.key.enc")).expect("failed to read key"),
        )
        .expect("invalid envelope");
        assert!(envelope::open_key_pair::<ecdsa::SigningKey>(&envelope, PASSPHRASE).is_err());
        envelope::open_key_pair::<ecdsa::SigningKey>(&envelope, &SECRET_KEY)
            .expect("failed to open key with secret key");
    }

    #[test]
    fn wrong_passphrase() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let root_dir = issue_root(dir.path());
        let args = issue_args(dir.path(), &root_dir);
        fs::write(&args.passphrase_file, b"not the passphrase").expect("failed to write file");

        assert!(matches!(
            args.run(),
            Err(Error::IssueEcdsa {
                source: IssueError::UnlockParentKey { .. }
            })
        ));
    }

    #[test]
    fn missing_secret_key() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let root_dir = issue_root(dir.path());
        let mut args = issue_args(dir.path(), &root_dir);
        args.pki.secret_key = None;

        assert!(matches!(
            args.run(),
            Err(Error::IssueEcdsa {
                source: IssueError::MissingSecretKey
            })
        ));
    }
}
