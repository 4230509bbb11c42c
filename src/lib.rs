//! authfile - bcrypt credential store with an in-memory cache
//!
//! Authenticates usernames against a locally stored file of bcrypt hashes.
//! The cache service answers from memory, a bounded work pool runs the
//! expensive hashing, and changes are synced back to the file periodically.

pub mod auth;
pub mod config;
pub mod editor;
pub mod error;
pub mod pool;
pub mod storage;

pub use auth::InMemoryService;
pub use config::AuthfileConfig;
pub use error::{AuthError, AuthfileError, StoreError};
pub use pool::WorkPool;
pub use storage::{CredentialRecord, FileBackend, StoreContents, username_is_valid};
