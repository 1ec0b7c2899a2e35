//! Error types for Warden directory operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Schema / configuration errors
    #[error("Invalid schema mapping: {0}")]
    InvalidSchema(String),

    #[error("Query is not supported by this schema mapping: {0}")]
    UnsupportedQuery(String),

    #[error("no attribute mapping found for [{0}]")]
    NoAttributeMapping(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Lookup errors
    #[error("Invalid principal: {0}")]
    InvalidPrincipal(String),

    // Authentication errors
    #[error("Login failed")]
    LoginFailed,

    #[error("User account locked: {0}")]
    AccountLocked(String),

    #[error("User account expired: {0}")]
    PasswordExpired(String),

    // Pool lifecycle errors
    #[error("No connection pool exists for tenant '{0}'")]
    NoPoolForTenant(String),

    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("Connection is not tracked by the pool for tenant '{0}'")]
    UnknownConnection(String),

    #[error("Connection has already been returned to the pool")]
    AlreadyReturned,

    // Transport errors
    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidSchema(_) => "InvalidSchema",
            Error::UnsupportedQuery(_) => "UnsupportedQuery",
            Error::NoAttributeMapping(_) => "NoAttributeMapping",
            Error::Config(_) => "ConfigError",
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::InvalidPrincipal(_) => "InvalidPrincipal",
            Error::LoginFailed => "LoginFailed",
            Error::AccountLocked(_) => "UserAccountLocked",
            Error::PasswordExpired(_) => "PasswordExpired",
            Error::NoPoolForTenant(_) => "NoPoolForTenant",
            Error::ConnectionUnavailable(_) => "ConnectionUnavailable",
            Error::UnknownConnection(_) => "UnknownConnection",
            Error::AlreadyReturned => "AlreadyReturned",
            Error::Directory(_) => "DirectoryError",
            Error::NotImplemented(_) => "NotImplemented",
            Error::Io(_) => "IoError",
            Error::Other(_) => "InternalError",
        }
    }

    /// Lifecycle errors caused by misuse of the connection pool.
    ///
    /// These are never retried.
    pub fn is_pool_misuse(&self) -> bool {
        matches!(
            self,
            Error::NoPoolForTenant(_) | Error::UnknownConnection(_) | Error::AlreadyReturned
        )
    }

    /// Errors that mean the principal does not exist, as opposed to a
    /// transport or configuration failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::InvalidPrincipal(_))
    }
}
