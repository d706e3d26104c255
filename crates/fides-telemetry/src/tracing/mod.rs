//! Tracing subscriber setup shared by the Fides binaries.
//!
//! Two outputs are supported: log lines on stderr and JSON lines in rolling
//! log files. Each output has its own level filter, which can be overridden
//! through an environment variable. Stdout is left to the binary itself.
use std::path::PathBuf;

use bon::Builder;
use snafu::{ResultExt as _, Snafu};
use tracing::{level_filters::LevelFilter, subscriber::SetGlobalDefaultError};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{Layer, Registry, layer::SubscriberExt};

pub use crate::tracing::settings::{
    ConsoleLogFormat, ConsoleLogSettings, FileLogSettings, Settings,
};

pub mod settings;

pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create rolling log files in {directory:?}"))]
    InitRollingFileAppender {
        source: InitError,
        directory: PathBuf,
    },

    #[snafu(display("a global tracing subscriber is already installed"))]
    SetGlobalDefaultSubscriber { source: SetGlobalDefaultError },
}

/// The configured tracing outputs of a binary.
///
/// Keep the value returned by [`Tracing::init`] alive for as long as the
/// binary runs, for example as `_tracing_guard`.
///
/// ```
/// # use fides_telemetry::tracing::{Error, Tracing};
/// # use tracing::level_filters::LevelFilter;
/// fn main() -> Result<(), Error> {
///     let _tracing_guard = Tracing::builder("fides")
///         .console(("CONSOLE_LOG_LEVEL", LevelFilter::INFO))
///         .build()
///         .init()?;
///
///     tracing::info!("ready");
///     Ok(())
/// }
/// ```
///
/// [`Tracing::pre_configured`] reads the following variables:
///
/// - `CONSOLE_LOG_LEVEL`: level filter of the console output.
/// - `FILE_LOG_LEVEL`: level filter of the file output.
///
/// All other settings come from [`TelemetryOptions`].
#[derive(Debug, Builder)]
pub struct Tracing {
    #[builder(start_fn)]
    service_name: &'static str,

    #[builder(default, into)]
    console: ConsoleLogSettings,

    #[builder(default, into)]
    file: FileLogSettings,
}

impl Tracing {
    pub const CONSOLE_LOG_LEVEL: &str = "CONSOLE_LOG_LEVEL";
    pub const FILE_LOG_LEVEL: &str = "FILE_LOG_LEVEL";
    pub const FILE_LOG_SUFFIX: &str = "log.json";

    /// Console and file output default to the INFO level. Log files are never
    /// rotated unless a rotation period is given.
    pub fn pre_configured(service_name: &'static str, options: TelemetryOptions) -> Self {
        let TelemetryOptions {
            console_log_disabled,
            console_log_format,
            file_log_directory,
            file_log_rotation_period,
        } = options;

        let console = if console_log_disabled {
            ConsoleLogSettings::Disabled
        } else {
            ConsoleLogSettings::Enabled {
                common_settings: (Self::CONSOLE_LOG_LEVEL, LevelFilter::INFO).into(),
                format: console_log_format,
            }
        };

        let file = file_log_directory.map(|directory| {
            FileLogSettings::enabled(
                (Self::FILE_LOG_LEVEL, LevelFilter::INFO),
                directory,
                file_log_rotation_period.unwrap_or_default(),
                Self::FILE_LOG_SUFFIX,
            )
        });

        Self::builder(service_name)
            .console(console)
            .file(file)
            .build()
    }

    /// Installs the configured outputs as the global default subscriber.
    pub fn init(self) -> Result<Self> {
        let layers: Vec<BoxedLayer> = self
            .console_layer()
            .into_iter()
            .chain(self.file_layer()?)
            .collect();

        if !layers.is_empty() {
            tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layers))
                .context(SetGlobalDefaultSubscriberSnafu)?;
        }

        tracing::debug!(
            tracing.service_name = self.service_name,
            tracing.file_log.enabled = self.file.is_enabled(),
            "initialized tracing"
        );
        Ok(self)
    }

    fn console_layer(&self) -> Option<BoxedLayer> {
        let ConsoleLogSettings::Enabled {
            common_settings,
            format,
        } = &self.console
        else {
            return None;
        };

        let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        let filter = common_settings.env_filter();

        Some(match format {
            ConsoleLogFormat::Plain => layer.with_filter(filter).boxed(),
            ConsoleLogFormat::Json => layer.json().with_filter(filter).boxed(),
        })
    }

    fn file_layer(&self) -> Result<Option<BoxedLayer>> {
        let FileLogSettings::Enabled {
            common_settings,
            directory,
            rotation,
            filename_suffix,
        } = &self.file
        else {
            return Ok(None);
        };

        let appender = RollingFileAppender::builder()
            .rotation(rotation.clone())
            .filename_prefix(self.service_name)
            .filename_suffix(filename_suffix)
            .build(directory)
            .context(InitRollingFileAppenderSnafu { directory })?;

        Ok(Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(appender)
                .with_filter(common_settings.env_filter())
                .boxed(),
        ))
    }
}

/// Command line arguments (with environment fallbacks if the `clap` feature
/// is enabled) for [`Tracing::pre_configured`].
#[cfg_attr(feature = "clap", derive(clap::Args))]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TelemetryOptions {
    /// Disable console logs.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub console_log_disabled: bool,

    /// Print console logs as plain text or JSON lines.
    #[cfg_attr(
        feature = "clap",
        arg(long, env, value_enum, value_name = "FORMAT", default_value_t)
    )]
    pub console_log_format: ConsoleLogFormat,

    /// Also write JSON logs to files in DIRECTORY.
    #[cfg_attr(
        feature = "clap",
        arg(long, env, value_name = "DIRECTORY", group = "file_log")
    )]
    pub file_log_directory: Option<PathBuf>,

    /// Time PERIOD after which log files are rolled over.
    #[cfg_attr(
        feature = "clap",
        arg(long, env, value_name = "PERIOD", requires = "file_log")
    )]
    pub file_log_rotation_period: Option<RotationPeriod>,
}

#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum RotationPeriod {
    Minutely,
    Hourly,
    Daily,

    #[default]
    Never,
}

impl From<RotationPeriod> for Rotation {
    fn from(value: RotationPeriod) -> Self {
        match value {
            RotationPeriod::Minutely => Self::MINUTELY,
            RotationPeriod::Hourly => Self::HOURLY,
            RotationPeriod::Daily => Self::DAILY,
            RotationPeriod::Never => Self::NEVER,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn outputs_default_to_disabled() {
        let tracing = Tracing::builder("test").build();

        assert_eq!(tracing.service_name, "test");
        assert!(!tracing.console.is_enabled());
        assert!(!tracing.file.is_enabled());
    }

    #[rstest]
    #[case(ConsoleLogFormat::Plain)]
    #[case(ConsoleLogFormat::Json)]
    fn console_format(#[case] format: ConsoleLogFormat) {
        let tracing = Tracing::pre_configured("test", TelemetryOptions {
            console_log_format: format,
            ..TelemetryOptions::default()
        });

        assert_eq!(tracing.console, ConsoleLogSettings::Enabled {
            common_settings: Settings {
                environment_variable: Tracing::CONSOLE_LOG_LEVEL,
                default_level: LevelFilter::INFO,
            },
            format,
        });
        assert!(tracing.console_layer().is_some());
    }

    #[test]
    fn file_output_only() {
        let tracing = Tracing::pre_configured("fides", TelemetryOptions {
            console_log_disabled: true,
            file_log_directory: Some(PathBuf::from("/var/log/fides")),
            file_log_rotation_period: Some(RotationPeriod::Daily),
            ..TelemetryOptions::default()
        });

        assert!(!tracing.console.is_enabled());
        assert_eq!(tracing.file, FileLogSettings::Enabled {
            common_settings: Settings {
                environment_variable: Tracing::FILE_LOG_LEVEL,
                default_level: LevelFilter::INFO,
            },
            directory: PathBuf::from("/var/log/fides"),
            rotation: Rotation::DAILY,
            filename_suffix: "log.json".to_owned(),
        });
    }

    #[test]
    fn file_output_is_disabled_by_none() {
        let tracing = Tracing::builder("test")
            .file(None::<FileLogSettings>)
            .build();

        assert_eq!(tracing.file, FileLogSettings::Disabled);
    }
}
