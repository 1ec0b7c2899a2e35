//! Certificate validation error types

use thiserror::Error;

/// Result type for certificate operations
pub type CertResult<T> = Result<T, CertError>;

/// Certificate validation errors
///
/// A completed validation fails with exactly one of `CertValidation`,
/// `Revoked` or `RevocationStatusUnknown`. `Parse` and `Config` come from
/// setup.
#[derive(Error, Debug)]
pub enum CertError {
    #[error("Certificate validation failed: {0}")]
    CertValidation(String),

    #[error("Certificate revoked: {0}")]
    Revoked(String),

    #[error("Certificate revocation status unknown: {0}")]
    RevocationStatusUnknown(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CertError {
    pub fn code(&self) -> &'static str {
        match self {
            CertError::CertValidation(_) => "CertValidation",
            CertError::Revoked(_) => "Revoked",
            CertError::RevocationStatusUnknown(_) => "RevocationStatusUnknown",
            CertError::Parse(_) => "ParseError",
            CertError::Config(_) => "ConfigError",
            CertError::Io(_) => "IoError",
        }
    }

    /// Whether this is one of the three validation outcomes
    pub fn is_validation_outcome(&self) -> bool {
        matches!(
            self,
            CertError::CertValidation(_)
                | CertError::Revoked(_)
                | CertError::RevocationStatusUnknown(_)
        )
    }
}
