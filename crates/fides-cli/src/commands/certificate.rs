use std::{
    io::{self, Write},
    path::PathBuf,
};

use clap::{Args, Subcommand, ValueEnum};
use fides_certs::certificate::{self, CertificateExt};
use snafu::{ResultExt, Snafu};
use x509_cert::Certificate;

use super::{FileError, decode_certificate, read_file};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read certificate"))]
    ReadCertificate { source: FileError },

    #[snafu(display("failed to decode certificate"))]
    DecodeCertificate { source: certificate::Error },

    #[snafu(display("failed to encode certificate as {format}"))]
    EncodeCertificate {
        source: certificate::Error,
        format: OutputFormat,
    },

    #[snafu(display("failed to serialize certificate as JSON"))]
    SerializeJson { source: serde_json::Error },

    #[snafu(display("failed to write to stdout"))]
    WriteStdout { source: io::Error },
}

#[derive(Debug, Subcommand)]
pub enum CertificateCommand {
    /// Print a PEM or DER encoded certificate in the requested format.
    Show(ShowArgs),
}

impl CertificateCommand {
    pub fn run(self) -> Result<(), Error> {
        match self {
            Self::Show(args) => args.run(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Pem,
    Der,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,

    /// The certificate file.
    pub file: PathBuf,
}

impl ShowArgs {
    pub fn run(self) -> Result<(), Error> {
        let input = read_file(&self.file).context(ReadCertificateSnafu)?;
        let certificate = decode_certificate(&input).context(DecodeCertificateSnafu)?;
        let output = render(&certificate, self.format)?;

        let mut stdout = io::stdout().lock();
        stdout.write_all(&output).context(WriteStdoutSnafu)?;
        stdout.flush().context(WriteStdoutSnafu)
    }
}

fn render(certificate: &Certificate, format: OutputFormat) -> Result<Vec<u8>, Error> {
    match format {
        OutputFormat::Json => {
            let json = certificate
                .to_json()
                .context(EncodeCertificateSnafu { format })?;
            let mut output = serde_json::to_vec_pretty(&json).context(SerializeJsonSnafu)?;
            output.push(b'\n');
            Ok(output)
        }
        OutputFormat::Pem => certificate
            .to_pem_string()
            .map(String::into_bytes)
            .context(EncodeCertificateSnafu { format }),
        OutputFormat::Der => certificate
            .to_der_bytes()
            .context(EncodeCertificateSnafu { format }),
    }
}

#[cfg(test)]
mod tests {
    use fides_certs::{ca::CertificateAuthority, keys::ecdsa};
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn certificate() -> Certificate {
        CertificateAuthority::<ecdsa::SigningKey>::root_builder()
            .common_name("Show Root")
            .serial_number(42)
            .build()
            .expect("failed to build root CA")
            .certificate()
            .clone()
    }

    #[rstest]
    fn json_output(certificate: Certificate) {
        let output = render(&certificate, OutputFormat::Json).expect("failed to render");
        let json: serde_json::Value =
            serde_json::from_slice(&output).expect("output must be JSON");

        assert_eq!(json["subject"]["commonName"], "Show Root");
        assert_eq!(json["issuer"]["commonName"], "Show Root");
    }

    #[rstest]
    #[case(OutputFormat::Pem)]
    #[case(OutputFormat::Der)]
    fn encoded_output_decodes_again(certificate: Certificate, #[case] format: OutputFormat) {
        let output = render(&certificate, format).expect("failed to render");
        let decoded = decode_certificate(&output).expect("failed to decode output");

        assert_eq!(decoded, certificate);
    }
}
