//! Offline credential file editor
//!
//! Line-oriented edits used by the `bcryptfile` tool. Edits go straight to
//! the file, line by line, without the cache service: unrecognised lines are
//! preserved and a running service only sees the result after `reload`.
//! Every edit runs under the store's file lock and replaces the file
//! atomically.

use log::info;
use std::path::Path;

use crate::error::StoreError;
use crate::storage::backend::create_file;
use crate::storage::record::{parse_cost, split_record};
use crate::storage::validation::{COST_PREFIX, DEFAULT_COST, FIELD_SEPARATOR};
use crate::storage::{FileBackend, cost_is_valid, username_is_valid};

/// Creates a new credential file holding only the cost line.
/// Fails with `AlreadyExists` if the file is already there.
pub fn init_file(path: &Path, cost: u32, permissions: u32) -> Result<(), StoreError> {
    if !cost_is_valid(cost) {
        return Err(StoreError::InvalidCost(cost));
    }
    create_file(path, permissions, &cost_line(cost))?;
    info!("Initialised {} with cost {cost}", path.display());
    Ok(())
}

/// Appends a user, hashed at the file's cost.
pub fn add_user(store: &FileBackend, username: &str, password: &str) -> Result<(), StoreError> {
    check_username(username)?;
    store.rewrite(|text| {
        if text.lines().any(|line| matches_user(username, line)) {
            return Err(StoreError::DuplicateUsername(username.to_string()));
        }
        let mut out = with_trailing_newline(text);
        out.push_str(&user_line(username, password, find_cost(text))?);
        Ok(out)
    })?;
    info!("Added user {username} to {}", store.path().display());
    Ok(())
}

/// Removes every line belonging to `username`.
pub fn delete_user(store: &FileBackend, username: &str) -> Result<(), StoreError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(StoreError::InvalidUsername(username.to_string()));
    }
    store.rewrite(|text| {
        let mut found = false;
        let out = filter_lines(text, |line| {
            if matches_user(username, line) {
                found = true;
                None
            } else {
                Some(line.to_string())
            }
        });
        if !found {
            return Err(StoreError::UserNotFound(username.to_string()));
        }
        Ok(out)
    })?;
    info!("Deleted user {username} from {}", store.path().display());
    Ok(())
}

/// Replaces the hash of `username`, hashed at the file's cost.
pub fn modify_user(store: &FileBackend, username: &str, password: &str) -> Result<(), StoreError> {
    check_username(username)?;
    store.rewrite(|text| {
        if !text.lines().any(|line| matches_user(username, line)) {
            return Err(StoreError::UserNotFound(username.to_string()));
        }
        let replacement = user_line(username, password, find_cost(text))?;
        Ok(filter_lines(text, |line| {
            if matches_user(username, line) {
                Some(replacement.clone())
            } else {
                Some(line.to_string())
            }
        }))
    })?;
    info!("Changed password of {username} in {}", store.path().display());
    Ok(())
}

/// Rewrites the cost line, appending one if the file has none.
/// Existing hashes keep the cost they were made with.
pub fn change_cost(store: &FileBackend, cost: u32) -> Result<(), StoreError> {
    if !cost_is_valid(cost) {
        return Err(StoreError::InvalidCost(cost));
    }
    let replacement = cost_line(cost);
    store.rewrite(|text| {
        let mut found = false;
        let mut out = filter_lines(text, |line| {
            if line.trim_start().starts_with(COST_PREFIX) {
                found = true;
                Some(replacement.clone())
            } else {
                Some(line.to_string())
            }
        });
        if !found {
            out = with_trailing_newline(&out);
            out.push_str(&replacement);
        }
        Ok(out)
    })?;
    info!("Set cost of {} to {cost}", store.path().display());
    Ok(())
}

/// Cost from the first parseable cost line, or `DEFAULT_COST`.
pub fn find_cost(text: &str) -> u32 {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix(COST_PREFIX))
        .find_map(parse_cost)
        .unwrap_or(DEFAULT_COST)
}

fn check_username(username: &str) -> Result<(), StoreError> {
    if username_is_valid(username) {
        Ok(())
    } else {
        Err(StoreError::InvalidUsername(username.to_string()))
    }
}

fn matches_user(username: &str, line: &str) -> bool {
    split_record(line.trim()).is_some_and(|(name, _)| name == username)
}

fn user_line(username: &str, password: &str, cost: u32) -> Result<String, StoreError> {
    let hash = bcrypt::hash(password, cost)?;
    Ok(format!("{username}{FIELD_SEPARATOR}{hash}\n"))
}

fn cost_line(cost: u32) -> String {
    format!("{COST_PREFIX}{cost}\n")
}

/// Maps each line (newline included) through `f`; `None` drops the line.
fn filter_lines<F>(text: &str, mut f: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        if let Some(kept) = f(line) {
            out.push_str(&kept);
        }
    }
    out
}

fn with_trailing_newline(text: &str) -> String {
    let mut out = text.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out
}
