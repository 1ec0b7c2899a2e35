//! Warden certificate validation
//!
//! Client-certificate path validation against per-tenant trust anchors,
//! with revocation checking over CRL (HTTP or LDAP) and OCSP. Fetched CRLs are kept in a
//! tenant-scoped cache.

pub mod crl;
pub mod error;
pub mod ldap;
pub mod metrics;
pub mod ocsp;
pub mod trust;
pub mod validator;

#[cfg(test)]
mod testing;

pub use crl::{
    CachedCrl, CrlCache, CrlCacheManager, CrlFetcher, HttpCrlFetcher, SchemeCrlFetcher,
};
pub use error::{CertError, CertResult};
pub use ldap::{LdapCrlFetcher, LdapCrlLocation};
pub use ocsp::{CertId, HttpOcspClient, OcspClient, OcspRequest, OcspStatus};
pub use trust::TrustStore;
pub use validator::{CertPathValidator, MAX_PATH_DEPTH};
