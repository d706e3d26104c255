//! Per-output subscriber settings.
use std::path::{Path, PathBuf};

use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::EnvFilter;

/// The level filter of one output.
#[derive(Debug, PartialEq)]
pub struct Settings {
    /// The environment variable which, if set, overrides
    /// [`Self::default_level`]. It accepts full `EnvFilter` directives such as
    /// `fides_authority=debug,info`.
    pub environment_variable: &'static str,

    pub default_level: LevelFilter,
}

impl Settings {
    pub(crate) fn env_filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_env_var(self.environment_variable)
            .with_default_directive(self.default_level.into())
            .from_env_lossy()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment_variable: "RUST_LOG",
            default_level: LevelFilter::INFO,
        }
    }
}

impl From<(&'static str, LevelFilter)> for Settings {
    fn from((environment_variable, default_level): (&'static str, LevelFilter)) -> Self {
        Self {
            environment_variable,
            default_level,
        }
    }
}

/// How log lines are printed to stderr.
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ConsoleLogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Default, PartialEq)]
pub enum ConsoleLogSettings {
    #[default]
    Disabled,

    Enabled {
        common_settings: Settings,
        format: ConsoleLogFormat,
    },
}

impl ConsoleLogSettings {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }
}

impl From<(&'static str, LevelFilter)> for ConsoleLogSettings {
    fn from(value: (&'static str, LevelFilter)) -> Self {
        Self::Enabled {
            common_settings: value.into(),
            format: ConsoleLogFormat::default(),
        }
    }
}

/// Settings of the rolling file output, which always writes JSON lines.
#[derive(Debug, Default, PartialEq)]
pub enum FileLogSettings {
    #[default]
    Disabled,

    Enabled {
        common_settings: Settings,
        directory: PathBuf,
        rotation: Rotation,

        /// Appended to the service name to form the file name.
        filename_suffix: String,
    },
}

impl FileLogSettings {
    pub fn enabled(
        common_settings: impl Into<Settings>,
        directory: impl AsRef<Path>,
        rotation: impl Into<Rotation>,
        filename_suffix: impl Into<String>,
    ) -> Self {
        Self::Enabled {
            common_settings: common_settings.into(),
            directory: directory.as_ref().to_path_buf(),
            rotation: rotation.into(),
            filename_suffix: filename_suffix.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }
}

impl<T> From<Option<T>> for FileLogSettings
where
    T: Into<Self>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Disabled, Into::into)
    }
}
