use std::path::PathBuf;

use clap::{Args, Subcommand};
use fides_authority::PkiOptions;
use fides_certs::{
    ca::CertificateAuthority,
    keys::{CertificateKeypair, ecdsa, rsa},
};
use fides_shared::time::Duration;
use snafu::{ResultExt, Snafu};

use super::{
    CreateCertificateAuthoritySnafu, IssueError, KeyAlgorithm, ReadPassphraseSnafu, WeakKeySnafu,
    read_passphrase, write_authority,
};

pub const FILE_STEM: &str = "root-ca";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to issue RSA root CA"))]
    IssueRsa { source: IssueError<rsa::Error> },

    #[snafu(display("failed to issue ECDSA root CA"))]
    IssueEcdsa { source: IssueError<ecdsa::Error> },
}

#[derive(Debug, Subcommand)]
pub enum RootCommand {
    /// Issue a self-signed root CA. The private key is encrypted with the
    /// passphrase.
    Issue(IssueArgs),
}

impl RootCommand {
    pub fn run(self) -> Result<(), Error> {
        match self {
            Self::Issue(args) => args.run(),
        }
    }
}

#[derive(Debug, Args)]
pub struct IssueArgs {
    /// The common name of the CA. Defaults to the certificate issuer name.
    #[arg(long)]
    pub common_name: Option<String>,

    /// The serial number of the certificate.
    #[arg(long)]
    pub serial: u64,

    /// The validity of the certificate, for example `365d`.
    #[arg(long, value_name = "DURATION")]
    pub validity: Option<Duration>,

    /// File containing the passphrase protecting the private key.
    #[arg(long, value_name = "FILE")]
    pub passphrase_file: PathBuf,

    /// Directory the certificate and encrypted private key are written to.
    #[arg(long, value_name = "DIR")]
    pub out_dir: PathBuf,

    #[arg(long, value_enum, default_value_t)]
    pub algorithm: KeyAlgorithm,

    #[command(flatten)]
    pub pki: PkiOptions,
}

impl IssueArgs {
    pub fn run(self) -> Result<(), Error> {
        match self.algorithm {
            KeyAlgorithm::Rsa => self.issue::<rsa::SigningKey>().context(IssueRsaSnafu),
            KeyAlgorithm::Ecdsa => self.issue::<ecdsa::SigningKey>().context(IssueEcdsaSnafu),
        }
    }

    fn issue<K>(&self) -> Result<(), IssueError<K::Error>>
    where
        K: CertificateKeypair,
    {
        let passphrase = read_passphrase(&self.passphrase_file).context(ReadPassphraseSnafu)?;
        let key_size = self.pki.key_size_for::<K>().context(WeakKeySnafu)?;

        let common_name = self
            .common_name
            .as_deref()
            .unwrap_or(self.pki.certificate_issuer_name.as_str());

        let ca = CertificateAuthority::<K>::root_builder()
            .common_name(common_name)
            .subject_attributes(self.pki.subject_attributes())
            .serial_number(self.serial)
            .validity(self.validity.unwrap_or(self.pki.default_validity))
            .key_size(key_size)
            .build()
            .context(CreateCertificateAuthoritySnafu)?;

        write_authority(&ca, &passphrase, &self.out_dir, FILE_STEM)
    }
}
