//! Queue scopes and the cache keys derived from them.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Version tag of the cached result shape. Bump when `ClassifiedSummary`
/// or the queue ordering changes so old entries are never served.
pub const RESULT_SHAPE_VERSION: &str = "v1";

const MAX_PARTNER_ID_LEN: usize = 64;

/// Validated conversation partner identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartnerId(String);

impl PartnerId {
    /// Validate a raw partner identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidScope` if the id is empty, longer than 64
    /// characters, or contains anything besides ASCII alphanumerics, `-`
    /// and `_`.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(AppError::InvalidScope("partner id is empty".into()));
        }
        if raw.len() > MAX_PARTNER_ID_LEN {
            return Err(AppError::InvalidScope(format!(
                "partner id exceeds {MAX_PARTNER_ID_LEN} characters"
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AppError::InvalidScope(format!(
                "partner id contains invalid characters: {raw}"
            )));
        }
        Ok(Self(raw.to_owned()))
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PartnerId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PartnerId> for String {
    fn from(value: PartnerId) -> Self {
        value.0
    }
}

impl Display for PartnerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key space a queue read and its cache entry are computed over.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Every conversation.
    Global,
    /// Conversations belonging to a single conversation partner.
    ByPartner(PartnerId),
}

impl Scope {
    /// Resolve a partner scope from a raw identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidScope` if the identifier is malformed.
    pub fn partner(raw: &str) -> Result<Self> {
        PartnerId::parse(raw).map(Self::ByPartner)
    }

    /// Cache key of the live queue for this scope.
    #[must_use]
    pub fn queue_key(&self) -> String {
        match self {
            Self::Global => format!("queue:{RESULT_SHAPE_VERSION}:global"),
            Self::ByPartner(id) => format!("queue:{RESULT_SHAPE_VERSION}:partner:{id}"),
        }
    }

    /// Partner filter pushed down to the store, if any.
    #[must_use]
    pub fn partner_id(&self) -> Option<&PartnerId> {
        match self {
            Self::Global => None,
            Self::ByPartner(id) => Some(id),
        }
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::ByPartner(id) => write!(f, "partner:{id}"),
        }
    }
}
