//! Lifecycle management of the certificate authority hierarchy: one active
//! root CA and any number of intermediate CAs signed by a root.
//!
//! [`AuthorityService`] is the entry point. It persists authorities through
//! an injected [`AuthorityStore`](store::AuthorityStore) and encrypts every
//! CA private key before it reaches the store.
pub mod authority;
pub mod options;
pub mod projection;
pub mod store;

mod service;

pub use authority::{Authority, AuthorityKind, AuthorityState};
pub use options::PkiOptions;
pub use service::*;
