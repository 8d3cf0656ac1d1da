//! Domain model module declarations.

pub mod conversation;
pub mod listing;
pub mod scope;
pub mod summary;
