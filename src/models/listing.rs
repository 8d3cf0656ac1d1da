//! Listing filters for the broader conversation listing views.

use std::fmt::Write as _;

use serde::Deserialize;

use super::conversation::ConversationStatus;
use super::scope::{PartnerId, RESULT_SHAPE_VERSION};
use crate::{AppError, Result};

/// Default page size of a listing.
pub const DEFAULT_LISTING_LIMIT: u32 = 50;
/// Largest page a listing may request.
pub const MAX_LISTING_LIMIT: u32 = 100;

/// Filter for a conversation listing. Unlike the live queue, listings keep
/// idle conversations and only sort by recency.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListingFilter {
    /// Only conversations with this status.
    #[serde(default)]
    pub status: Option<ConversationStatus>,
    /// Only conversations of this partner.
    #[serde(default)]
    pub partner: Option<PartnerId>,
    /// Only conversations currently in the panic room.
    #[serde(default)]
    pub panic_only: bool,
    /// Maximum number of rows returned.
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    DEFAULT_LISTING_LIMIT
}

impl Default for ListingFilter {
    fn default() -> Self {
        Self {
            status: None,
            partner: None,
            panic_only: false,
            limit: DEFAULT_LISTING_LIMIT,
        }
    }
}

impl ListingFilter {
    /// Reject out-of-range limits.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if `limit` is zero or above 100.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 || self.limit > MAX_LISTING_LIMIT {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {MAX_LISTING_LIMIT}"
            )));
        }
        Ok(())
    }

    /// Number of active filter criteria; drives the listing TTL.
    #[must_use]
    pub fn complexity(&self) -> u32 {
        u32::from(self.status.is_some())
            + u32::from(self.partner.is_some())
            + u32::from(self.panic_only)
    }

    /// Canonical cache key; equal filters always map to the same key.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut key = format!("{LISTING_KEY_PREFIX}{RESULT_SHAPE_VERSION}");
        if let Some(status) = self.status {
            let _ = write!(key, ":status={status:?}");
        }
        if let Some(partner) = &self.partner {
            let _ = write!(key, ":partner={partner}");
        }
        if self.panic_only {
            key.push_str(":panic");
        }
        let _ = write!(key, ":limit={}", self.limit);
        key
    }
}

/// Prefix shared by every listing cache key.
pub const LISTING_KEY_PREFIX: &str = "listing:";
