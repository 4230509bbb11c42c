//! Credential cache service
//!
//! Fast in-memory authentication over a credential file, with deferred,
//! periodic persistence.

mod cache;
mod scheduler;
pub mod service;

pub use service::InMemoryService;
