//! Credential store
//!
//! File-backed `(username, bcrypt hash)` records plus the stored hashing cost,
//! with locked writes and atomic replacement.

pub mod backend;
pub mod lock;
pub mod record;
pub mod validation;

pub use backend::FileBackend;
pub use lock::FileLock;
pub use record::{CredentialRecord, StoreContents};
pub use validation::{DEFAULT_COST, MAX_COST, MIN_COST, cost_is_valid, username_is_valid};
