use std::{fmt, str::FromStr};

use base64::{Engine, engine::general_purpose::STANDARD};
use fides_certs::{
    ca::DEFAULT_CA_VALIDITY,
    certificate::{AttributeName, DistinguishedName},
    keys::{CertificateKeypair, rsa},
};
use fides_shared::time::Duration;
use snafu::{ResultExt, Snafu, ensure};
use zeroize::Zeroizing;

pub const DEFAULT_ISSUER_NAME: &str = "Fides.io";
pub const DEFAULT_ISSUER_ORGANIZATION: &str = "zen-trust.net";

/// The length of the server secret key in bytes.
pub const SECRET_KEY_LEN: usize = 32;

#[derive(Debug, Snafu)]
pub enum SecretKeyError {
    #[snafu(display("failed to decode base64 encoded secret key"))]
    DecodeBase64 { source: base64::DecodeError },

    #[snafu(display("the secret key has {len} bytes, expected {SECRET_KEY_LEN} bytes"))]
    InvalidLength { len: usize },
}

#[derive(Debug, PartialEq, Eq, Snafu)]
#[snafu(display(
    "refusing to create CA key with {key_size} bits, at least {minimum} bits are required"
))]
pub struct WeakKeySizeError {
    pub key_size: usize,
    pub minimum: usize,
}

/// The server-wide key protecting the private keys of intermediate CAs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(Zeroizing<[u8; SECRET_KEY_LEN]>);

impl SecretKey {
    pub fn new(key: [u8; SECRET_KEY_LEN]) -> Self {
        Self(Zeroizing::new(key))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

impl FromStr for SecretKey {
    type Err = SecretKeyError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let bytes = Zeroizing::new(STANDARD.decode(input.trim()).context(DecodeBase64Snafu)?);
        let key = <[u8; SECRET_KEY_LEN]>::try_from(bytes.as_slice())
            .map_err(|_| InvalidLengthSnafu { len: bytes.len() }.build())?;

        Ok(Self::new(key))
    }
}

/// Configuration of the [`AuthorityService`](crate::AuthorityService).
#[derive(clap::Args, Clone, Debug, PartialEq, Eq)]
pub struct PkiOptions {
    /// Base64 encoded 32-byte key used to encrypt the private keys of
    /// intermediate CAs.
    #[arg(long, env, value_name = "BASE64", hide_env_values = true)]
    pub secret_key: Option<SecretKey>,

    /// The default common name of root CAs.
    #[arg(long, env, default_value = DEFAULT_ISSUER_NAME)]
    pub certificate_issuer_name: String,

    /// The organization added to the subject of every CA.
    #[arg(long, env, default_value = DEFAULT_ISSUER_ORGANIZATION)]
    pub certificate_issuer_organization: String,

    /// The smallest RSA modulus in bits accepted for new CA keys.
    #[arg(long, env, value_name = "BITS", default_value_t = rsa::MINIMUM_KEY_SIZE)]
    pub minimum_key_size: usize,

    /// The size in bits of newly generated CA keys. Defaults to the default
    /// size of the key algorithm.
    #[arg(long, env, value_name = "BITS")]
    pub key_size: Option<usize>,

    /// The validity of new CAs if the request doesn't specify one.
    #[arg(long, env, value_name = "DURATION", default_value_t = DEFAULT_CA_VALIDITY)]
    pub default_validity: Duration,
}

impl Default for PkiOptions {
    fn default() -> Self {
        Self {
            secret_key: None,
            certificate_issuer_name: DEFAULT_ISSUER_NAME.to_owned(),
            certificate_issuer_organization: DEFAULT_ISSUER_ORGANIZATION.to_owned(),
            minimum_key_size: rsa::MINIMUM_KEY_SIZE,
            key_size: None,
            default_validity: DEFAULT_CA_VALIDITY,
        }
    }
}

impl PkiOptions {
    /// Subject attributes shared by all CAs. The common name is added per CA.
    pub fn subject_attributes(&self) -> DistinguishedName {
        let organization = self.certificate_issuer_organization.trim();
        if organization.is_empty() {
            return DistinguishedName::new();
        }

        DistinguishedName::new().with(AttributeName::OrganizationName, organization)
    }

    /// The size of new CA keys of type `K`. RSA keys below
    /// [`PkiOptions::minimum_key_size`] are rejected.
    pub fn key_size_for<K>(&self) -> Result<usize, WeakKeySizeError>
    where
        K: CertificateKeypair,
    {
        let key_size = self.key_size.unwrap_or(K::DEFAULT_KEY_SIZE);

        if K::algorithm_name() == rsa::ALGORITHM_NAME {
            ensure!(key_size >= self.minimum_key_size, WeakKeySizeSnafu {
                key_size,
                minimum: self.minimum_key_size
            });
        }

        Ok(key_size)
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use fides_certs::keys::ecdsa;
    use rstest::rstest;

    use super::*;

    #[derive(clap::Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        pki: PkiOptions,
    }

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["fides"]);

        assert_eq!(cli.pki.certificate_issuer_name, DEFAULT_ISSUER_NAME);
        assert_eq!(cli.pki.minimum_key_size, 2048);
        assert_eq!(*cli.pki.default_validity, *Duration::from_days_unchecked(365));
    }

    #[test]
    fn parse_secret_key() {
        let encoded = STANDARD.encode([7u8; SECRET_KEY_LEN]);
        let cli = Cli::parse_from(["fides", "--secret-key", &encoded]);

        assert_eq!(
            cli.pki.secret_key.expect("secret key must be set").as_bytes(),
            &[7u8; SECRET_KEY_LEN]
        );
    }

    #[rstest]
    #[case("not base64!")]
    #[case("AAAA")]
    fn reject_invalid_secret_key(#[case] input: &str) {
        assert!(input.parse::<SecretKey>().is_err());
    }

    #[test]
    fn subject_attributes() {
        let attributes = PkiOptions::default().subject_attributes();
        assert_eq!(
            attributes.get(AttributeName::OrganizationName),
            Some("zen-trust.net")
        );
    }

    #[rstest]
    #[case::rsa_default(None, Ok(rsa::SigningKey::DEFAULT_KEY_SIZE))]
    #[case::rsa_minimum(Some(2048), Ok(2048))]
    #[case::rsa_weak(Some(1024), Err(WeakKeySizeError { key_size: 1024, minimum: 2048 }))]
    fn rsa_key_size(
        #[case] key_size: Option<usize>,
        #[case] expected: Result<usize, WeakKeySizeError>,
    ) {
        let options = PkiOptions {
            key_size,
            ..PkiOptions::default()
        };

        assert_eq!(options.key_size_for::<rsa::SigningKey>(), expected);
    }

    #[test]
    fn minimum_only_applies_to_rsa() {
        let options = PkiOptions {
            minimum_key_size: 4096,
            ..PkiOptions::default()
        };

        assert_eq!(
            options.key_size_for::<ecdsa::SigningKey>(),
            Ok(ecdsa::SigningKey::DEFAULT_KEY_SIZE)
        );
        assert!(options.key_size_for::<rsa::SigningKey>().is_err());
    }
}
