//! Username registry
//!
//! The single source of truth for "is this name taken". Names are compared
//! case-insensitively but displayed as originally claimed.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::AppError;
use crate::lock;

/// Set of currently claimed usernames
///
/// Every operation runs under one exclusive lock, so claim/release/rename
/// are each a single indivisible step.
#[derive(Debug, Default)]
pub struct UsernameRegistry {
    /// Lowercased name -> name as claimed
    names: Mutex<HashMap<String, String>>,
}

impl UsernameRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a username
    ///
    /// Returns false without mutating anything if the name is already held.
    pub fn claim(&self, name: &str) -> bool {
        let mut names = lock(&self.names);
        let key = name.to_lowercase();
        if names.contains_key(&key) {
            return false;
        }
        names.insert(key, name.to_string());
        true
    }

    /// Release a username (no-op if not held)
    pub fn release(&self, name: &str) {
        lock(&self.names).remove(&name.to_lowercase());
    }

    /// Atomically swap `old` for `new`
    ///
    /// Fails with `UsernameTaken` if `new` is held under a different name.
    /// A case-only change of the caller's own name is allowed.
    pub fn rename(&self, old: &str, new: &str) -> Result<(), AppError> {
        let mut names = lock(&self.names);
        let old_key = old.to_lowercase();
        let new_key = new.to_lowercase();

        if new_key != old_key && names.contains_key(&new_key) {
            return Err(AppError::UsernameTaken(new.to_string()));
        }

        names.remove(&old_key);
        names.insert(new_key, new.to_string());
        Ok(())
    }

    /// Check whether a name is held (case-insensitive)
    pub fn contains(&self, name: &str) -> bool {
        lock(&self.names).contains_key(&name.to_lowercase())
    }

    /// All claimed names as displayed, sorted lexicographically
    pub fn list(&self) -> Vec<String> {
        let mut list: Vec<String> = lock(&self.names).values().cloned().collect();
        list.sort();
        list
    }

    /// Number of claimed names
    pub fn len(&self) -> usize {
        lock(&self.names).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
