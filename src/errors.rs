//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Errors are `Clone` so a single failed computation can be handed to every
/// caller coalesced on the same cache ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite` outside the queue read path.
    Db(String),
    /// The conversation store failed or timed out while serving a queue read.
    StoreUnavailable(String),
    /// A scope reference could not be resolved (e.g. malformed partner id).
    InvalidScope(String),
    /// Caller-supplied input was rejected before reaching the store.
    Validation(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether a caller may reasonably retry the same request later.
    ///
    /// Only store failures qualify; failed computations are never cached, so
    /// the next call starts from scratch.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Re-tag a persistence failure as a store outage on the queue read path.
    #[must_use]
    pub fn into_store_failure(self) -> Self {
        match self {
            Self::Db(msg) | Self::Io(msg) => Self::StoreUnavailable(msg),
            other => other,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::StoreUnavailable(msg) => write!(f, "store unavailable: {msg}"),
            Self::InvalidScope(msg) => write!(f, "invalid scope: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}
