//! Error handlers
//!
//! Provides error reporting and exit code mapping for the offline editor.

use crate::error::types::{AuthError, AuthfileError, StoreError};
use log::error;

/// Log an error
pub fn handle_error(err: &AuthfileError) {
    error!("bcryptfile: {}", err);
}

/// Convert error to process exit code
pub fn error_to_exit_code(err: &AuthfileError) -> i32 {
    match err {
        AuthfileError::Store(e) | AuthfileError::Auth(AuthError::Store(e)) => store_exit_code(e),
        AuthfileError::Auth(AuthError::UserNotFound(_)) => 3,
        AuthfileError::Auth(AuthError::DuplicateUsername(_)) => 4,
        AuthfileError::Auth(AuthError::InvalidUsername(_) | AuthError::InvalidCost(_)) => 2,
        AuthfileError::Auth(_) => 1,
        AuthfileError::Config(_) => 2,
        AuthfileError::Io(_) => 74,
    }
}

fn store_exit_code(err: &StoreError) -> i32 {
    match err {
        StoreError::InvalidUsername(_) | StoreError::InvalidCost(_) => 2,
        StoreError::NotFound(_) | StoreError::UserNotFound(_) => 3,
        StoreError::AlreadyExists(_) | StoreError::DuplicateUsername(_) => 4,
        StoreError::LockTimeout { .. } => 75,
        StoreError::CorruptFormat { .. } => 65,
        StoreError::Hash(_) => 1,
        StoreError::Io(_) => 74,
    }
}
