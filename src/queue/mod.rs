//! Live queue engine.
//!
//! Covers conversation classification, the staged store query, and the
//! cached read path serving dashboard requests.

pub mod classifier;
pub mod executor;
pub mod live_queue;
pub mod store;
