//! The `fides` command line tool issues and inspects certificate authorities
//! without a running service. Private keys are only ever written as encrypted
//! envelopes.
use clap::{Parser, Subcommand};
use fides_telemetry::{TelemetryOptions, Tracing};
use snafu::{ResultExt, Snafu};

use crate::commands::{
    certificate::CertificateCommand, intermediate::IntermediateCommand, root::RootCommand,
    session::SessionCommand,
};

mod commands;

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize tracing"))]
    InitTracing {
        source: fides_telemetry::tracing::Error,
    },

    #[snafu(display("failed to run root command"))]
    Root { source: commands::root::Error },

    #[snafu(display("failed to run intermediate command"))]
    Intermediate {
        source: commands::intermediate::Error,
    },

    #[snafu(display("failed to run certificate command"))]
    Certificate {
        source: commands::certificate::Error,
    },

    #[snafu(display("failed to run session command"))]
    Session { source: commands::session::Error },
}

#[derive(Debug, Parser)]
#[command(name = "fides", author, version, about)]
struct Cli {
    #[command(flatten)]
    telemetry: TelemetryOptions,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage self-signed root CAs.
    #[command(subcommand)]
    Root(RootCommand),

    /// Manage intermediate CAs signed by a root CA.
    #[command(subcommand)]
    Intermediate(IntermediateCommand),

    /// Inspect certificates.
    #[command(subcommand)]
    Certificate(CertificateCommand),

    /// Client tooling for the encryption session protocol.
    #[command(subcommand)]
    Session(SessionCommand),
}

#[snafu::report]
fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    let _tracing_guard = Tracing::pre_configured("fides", cli.telemetry)
        .init()
        .context(InitTracingSnafu)?;

    match cli.command {
        Command::Root(command) => command.run().context(RootSnafu),
        Command::Intermediate(command) => command.run().context(IntermediateSnafu),
        Command::Certificate(command) => command.run().context(CertificateSnafu),
        Command::Session(command) => command.run().context(SessionSnafu),
    }
}
