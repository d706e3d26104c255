use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use const_oid::db::rfc5912::{ID_EC_PUBLIC_KEY, RSA_ENCRYPTION};
use fides_authority::options::WeakKeySizeError;
use fides_certs::{
    ca::{CertificateAuthority, CreateCertificateAuthorityError, SignCertificateError},
    certificate::CertificateExt,
    envelope::{self, KeyEnvelopeError},
    keys::CertificateKeypair,
};
use snafu::{ResultExt, Snafu, ensure};
use tracing::{info, warn};
use x509_cert::{Certificate, spki::ObjectIdentifier};
use zeroize::Zeroizing;

pub mod certificate;
pub mod intermediate;
pub mod root;
pub mod session;

#[derive(Debug, Snafu)]
pub enum FileError {
    #[snafu(display("failed to read {path:?}"))]
    Read { source: io::Error, path: PathBuf },

    #[snafu(display("failed to create directory {path:?}"))]
    CreateDirectory { source: io::Error, path: PathBuf },

    #[snafu(display("failed to write {path:?}"))]
    Write { source: io::Error, path: PathBuf },

    #[snafu(display("refusing to overwrite the existing file {path:?}"))]
    AlreadyExists { path: PathBuf },

    #[snafu(display("the passphrase file {path:?} is empty"))]
    EmptyPassphrase { path: PathBuf },
}

/// Errors shared by all commands which issue a CA with keys of type `K`.
#[derive(Debug, Snafu)]
pub enum IssueError<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("failed to read the passphrase"))]
    ReadPassphrase { source: FileError },

    #[snafu(display("failed to read the parent private key"))]
    ReadParentKey { source: FileError },

    #[snafu(display("the parent private key file is not an encrypted private key"))]
    DecodeParentKey { source: envelope::Error },

    #[snafu(display("failed to unlock the parent private key"))]
    UnlockParentKey { source: KeyEnvelopeError<E> },

    #[snafu(display("a secret key is required to protect intermediate CA keys"))]
    MissingSecretKey,

    #[snafu(display("the configured key size is too weak"))]
    WeakKey { source: WeakKeySizeError },

    #[snafu(display("failed to create certificate authority"))]
    CreateCertificateAuthority {
        source: CreateCertificateAuthorityError<E>,
    },

    #[snafu(display("the parent private key does not belong to the parent certificate"))]
    VerifyIssuedCertificate { source: SignCertificateError<E> },

    #[snafu(display("failed to encrypt the private key"))]
    SealPrivateKey { source: KeyEnvelopeError<E> },

    #[snafu(display("failed to encode the certificate"))]
    EncodeCertificate {
        source: fides_certs::certificate::Error,
    },

    #[snafu(display("failed to write the certificate authority"))]
    WriteOutput { source: FileError },
}

/// The key algorithm of newly generated CA keys.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum KeyAlgorithm {
    #[default]
    Rsa,
    Ecdsa,
}

impl KeyAlgorithm {
    /// Detects the algorithm of the public key contained in `certificate`.
    pub fn of_certificate(certificate: &Certificate) -> Result<Self, ObjectIdentifier> {
        let oid = certificate.tbs_certificate.subject_public_key_info.algorithm.oid;

        if oid == RSA_ENCRYPTION {
            Ok(Self::Rsa)
        } else if oid == ID_EC_PUBLIC_KEY {
            Ok(Self::Ecdsa)
        } else {
            Err(oid)
        }
    }
}

/// Reads a passphrase from `path`. A trailing line break is not part of the
/// passphrase.
pub fn read_passphrase(path: &Path) -> Result<Zeroizing<Vec<u8>>, FileError> {
    let mut passphrase = Zeroizing::new(fs::read(path).context(ReadSnafu { path })?);
    while matches!(passphrase.last(), Some(b'\n' | b'\r')) {
        passphrase.pop();
    }

    ensure!(!passphrase.is_empty(), EmptyPassphraseSnafu { path });
    Ok(passphrase)
}

/// Decodes a PEM or DER encoded certificate.
pub fn decode_certificate(input: &[u8]) -> fides_certs::certificate::Result<Certificate> {
    match std::str::from_utf8(input) {
        Ok(pem) if pem.trim_start().starts_with("-----BEGIN") => Certificate::from_pem_str(pem),
        _ => Certificate::from_der_bytes(input),
    }
}

pub fn read_file(path: &Path) -> Result<Vec<u8>, FileError> {
    fs::read(path).context(ReadSnafu { path })
}

/// Writes `contents` to a new file. Existing files are never overwritten.
pub fn write_new_file(path: &Path, contents: &[u8]) -> Result<(), FileError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .context(WriteSnafu { path })?;

    file.write_all(contents).context(WriteSnafu { path })
}

/// Writes the PEM certificate and the private key, encrypted with `secret`,
/// of `ca` into `out_dir`.
///
/// Either both files are written or none. Existing files are never
/// overwritten.
pub fn write_authority<K>(
    ca: &CertificateAuthority<K>,
    secret: &[u8],
    out_dir: &Path,
    file_stem: &str,
) -> Result<(), IssueError<K::Error>>
where
    K: CertificateKeypair,
{
    let pem = ca
        .certificate()
        .to_pem_string()
        .context(EncodeCertificateSnafu)?;
    let envelope = envelope::seal_key_pair(ca.key_pair(), secret).context(SealPrivateKeySnafu)?;

    fs::create_dir_all(out_dir)
        .context(CreateDirectorySnafu { path: out_dir })
        .context(WriteOutputSnafu)?;

    let certificate_path = out_dir.join(format!("{file_stem}.crt"));
    let key_path = out_dir.join(format!("{file_stem}.key.enc"));

    if let Some(path) = [&certificate_path, &key_path]
        .into_iter()
        .find(|path| path.exists())
    {
        return AlreadyExistsSnafu { path }.fail().context(WriteOutputSnafu);
    }

    write_new_file(&certificate_path, pem.as_bytes()).context(WriteOutputSnafu)?;
    if let Err(error) = write_new_file(&key_path, envelope.as_bytes()) {
        if let Err(remove_error) = fs::remove_file(&certificate_path) {
            warn!(
                certificate = %certificate_path.display(),
                error = &remove_error as &dyn std::error::Error,
                "failed to remove certificate without private key"
            );
        }
        return Err(error).context(WriteOutputSnafu);
    }

    info!(
        certificate = %certificate_path.display(),
        private_key = %key_path.display(),
        "wrote certificate authority"
    );
    Ok(())
}
