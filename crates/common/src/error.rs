//! Error types for WgMesh

use thiserror::Error;

/// Result type alias using WgMesh Error
pub type Result<T> = std::result::Result<T, Error>;

/// WgMesh error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Malformed value: {0}")]
    Malformed(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("ALREADY_INSTALLED: {0}")]
    AlreadyInstalled(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Record absent, as opposed to the store failing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Transport failures may succeed on the next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Stable machine-readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Malformed(_) | Error::Serialization(_) => "malformed",
            Error::Transport(_) => "transport",
            Error::PolicyViolation(_) => "policy_violation",
            Error::AlreadyInstalled(_) => "already_installed",
            Error::Unauthorized(_) => "unauthorized",
            Error::InvalidConfig(_) => "invalid_config",
            Error::Io(_) | Error::Database(_) | Error::Internal(_) => "internal",
        }
    }

    /// Rebuild an error from its wire code and message.
    pub fn from_code(code: &str, message: String) -> Self {
        match code {
            "not_found" => Error::NotFound {
                kind: "record".to_string(),
                id: message,
            },
            "malformed" => Error::Malformed(message),
            "transport" => Error::Transport(message),
            "policy_violation" => Error::PolicyViolation(message),
            "already_installed" => Error::AlreadyInstalled(message),
            "unauthorized" => Error::Unauthorized(message),
            "invalid_config" => Error::InvalidConfig(message),
            _ => Error::Internal(message),
        }
    }
}
