//! This crate contains functionality to initialise the tracing subscribers
//! used by the Fides binaries.
//!
//! To get started, see [`Tracing`][crate::tracing::Tracing].
pub mod tracing;

#[doc(inline)]
pub use crate::tracing::{TelemetryOptions, Tracing};
