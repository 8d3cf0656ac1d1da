#![forbid(unsafe_code)]

//! `support-desk`: support-chat dashboard backend.
//!
//! The live queue engine classifies conversations that need an agent now,
//! serves them through a coalescing TTL cache, and evicts cache entries
//! when conversations are written.

pub mod cache;
pub mod config;
pub mod errors;
pub mod http;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod queue;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
