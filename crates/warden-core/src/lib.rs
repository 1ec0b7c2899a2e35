//! Warden Core Library
//!
//! Core types, configuration, and the error taxonomy shared by the Warden
//! directory and certificate crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::WardenConfig;
pub use error::{Error, Result};

/// Warden version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default LDAP port
pub const LDAP_PORT: u16 = 389;

/// Default LDAPS port
pub const LDAPS_PORT: u16 = 636;

/// Global catalog port (plain)
pub const GC_PORT: u16 = 3268;

/// Global catalog port (TLS)
pub const GC_SSL_PORT: u16 = 3269;

/// Normalize a tenant name for use as a lookup key.
///
/// Tenant names compare case-insensitively; surrounding whitespace is ignored.
pub fn normalize_tenant(name: &str) -> String {
    name.trim().to_lowercase()
}
