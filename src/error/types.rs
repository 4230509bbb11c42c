//! Error types
//!
//! Defines domain-specific error types for the credential store, the cache
//! service, and the umbrella type used by the offline editor binary.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::storage::{MAX_COST, MIN_COST};

/// Credential store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Credential file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Credential file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Timed out after {timeout:?} waiting for lock on {}", .path.display())]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("Corrupt credential file at line {line}: {reason}")]
    CorruptFormat { line: usize, reason: String },

    #[error("Duplicate username: {0}")]
    DuplicateUsername(String),

    #[error("Username not found: {0}")]
    UserNotFound(String),

    #[error("Invalid username: {0:?}")]
    InvalidUsername(String),

    #[error("Invalid bcrypt cost {0}: must be between {min} and {max}", min = MIN_COST, max = MAX_COST)]
    InvalidCost(u32),

    #[error("Hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Cache service errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Authentication failed for user: {0}")]
    AuthenticationFailed(String),

    #[error("Duplicate username: {0}")]
    DuplicateUsername(String),

    #[error("Invalid username: {0:?}")]
    InvalidUsername(String),

    #[error("Invalid bcrypt cost {0}: must be between {min} and {max}", min = MIN_COST, max = MAX_COST)]
    InvalidCost(u32),

    #[error("Refusing to reload with {0} unsynced change(s) pending")]
    UnsyncedChanges(u64),

    #[error("Worker pool is shut down")]
    PoolUnavailable,

    #[error("Worker job terminated before producing a result")]
    JobFailed,

    #[error("Hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// General error that encompasses all error types
#[derive(Debug, Error)]
pub enum AuthfileError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
