//! Error handling
//!
//! Defines error types and handling for the credential store and cache.

pub mod handlers;
pub mod types;

pub use types::*;
