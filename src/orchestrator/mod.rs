//! Write-path orchestration.
//!
//! Conversation mutations and the cache invalidation that follows them.

pub mod conversation_manager;
