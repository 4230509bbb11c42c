//! In-memory credential cache
//!
//! Mirrors the credential file in memory. Every mutation bumps a generation
//! counter; the cache is dirty while the last synced generation lags behind.

use std::collections::BTreeMap;

use crate::error::AuthError;
use crate::storage::{CredentialRecord, StoreContents};

#[derive(Debug)]
pub(crate) struct CredentialCache {
    cost: u32,
    entries: BTreeMap<String, String>,
    generation: u64,
    synced_generation: u64,
}

/// Point-in-time copy of the cache taken for a sync.
#[derive(Debug)]
pub(crate) struct Snapshot {
    pub cost: u32,
    pub records: Vec<CredentialRecord>,
    pub generation: u64,
}

impl CredentialCache {
    pub fn from_contents(contents: StoreContents) -> Self {
        Self {
            cost: contents.cost,
            entries: contents.records,
            generation: 0,
            synced_generation: 0,
        }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn set_cost(&mut self, cost: u32) {
        if self.cost != cost {
            self.cost = cost;
            self.touch();
        }
    }

    pub fn get(&self, username: &str) -> Option<&str> {
        self.entries.get(username).map(String::as_str)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.entries.contains_key(username)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn usernames(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn insert_new(&mut self, username: &str, hash: String) -> Result<(), AuthError> {
        if self.entries.contains_key(username) {
            return Err(AuthError::DuplicateUsername(username.to_string()));
        }
        self.entries.insert(username.to_string(), hash);
        self.touch();
        Ok(())
    }

    pub fn replace(&mut self, username: &str, hash: String) -> Result<(), AuthError> {
        match self.entries.get_mut(username) {
            Some(stored) => {
                *stored = hash;
                self.touch();
                Ok(())
            }
            None => Err(AuthError::UserNotFound(username.to_string())),
        }
    }

    pub fn remove(&mut self, username: &str) -> Result<(), AuthError> {
        if self.entries.remove(username).is_none() {
            return Err(AuthError::UserNotFound(username.to_string()));
        }
        self.touch();
        Ok(())
    }

    /// Mutations made since the last successful sync.
    pub fn pending(&self) -> u64 {
        self.generation - self.synced_generation
    }

    pub fn snapshot(&self) -> Snapshot {
        let contents = StoreContents {
            cost: self.cost,
            records: self.entries.clone(),
        };
        Snapshot {
            cost: self.cost,
            records: contents.to_records(),
            generation: self.generation,
        }
    }

    /// Records that everything up to `generation` is on disk.
    pub fn mark_synced(&mut self, generation: u64) {
        self.synced_generation = self.synced_generation.max(generation);
    }

    /// Replaces the cache with freshly loaded store contents.
    pub fn reset(&mut self, contents: StoreContents) {
        self.cost = contents.cost;
        self.entries = contents.records;
        self.synced_generation = self.generation;
    }

    fn touch(&mut self) {
        self.generation += 1;
    }
}
