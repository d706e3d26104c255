use fides_shared::time::Duration;

/// The default CA validity time span of 365 days.
pub const DEFAULT_CA_VALIDITY: Duration = Duration::from_days_unchecked(365);

/// The common name used when the caller doesn't provide one.
pub const DEFAULT_CA_COMMON_NAME: &str = "zen-trust CA";
