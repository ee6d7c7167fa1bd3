//! Error types for stackop.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("source error: {0}")]
    Source(String),

    #[error("refresh drift: {0}")]
    RefreshDrift(String),

    #[error("engine conflict: {0}")]
    EngineConflict(String),

    #[error("engine pending operations: {0}")]
    EnginePendingOperations(String),

    #[error("engine failed: {0}")]
    EngineFailed(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short, stable name of the error kind, used in logs and status messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::NotFound(_) => "NotFound",
            Error::AccessDenied(_) => "AccessDenied",
            Error::Io(_) => "IOError",
            Error::Auth(_) => "AuthError",
            Error::Source(_) => "SourceError",
            Error::RefreshDrift(_) => "RefreshDrift",
            Error::EngineConflict(_) => "EngineConflict",
            Error::EnginePendingOperations(_) => "EnginePendingOperations",
            Error::EngineFailed(_) => "EngineFailed",
            Error::Cancelled => "Cancelled",
            Error::Internal(_) => "Internal",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
