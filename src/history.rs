//! # Per-user localization history
//!
//! [`HistoryStore`] keeps, for each user, the most recent localization results in insertion
//! order. Each sequence is bounded: when an insert would exceed the capacity, the oldest
//! entries are evicted first.
//!
//! Concurrency
//! -----------------
//! The user index sits behind a `RwLock` that is only write-locked to create a user's
//! sequence; each sequence has its own `Mutex`. Two concurrent appends for the same user are
//! serialized on that mutex, so the bound always holds, while appends for different users
//! never contend beyond the shared read lock.
//!
//! History lives for the process lifetime only.
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use ahash::RandomState;
use tracing::debug;

use crate::{
    constants::{UserId, MAX_USER_HISTORY_LENGTH, USER_ID_NOT_VALID},
    localize_errors::LocalizeError,
    normalize::LocalizationResult,
};

/// One stored localization, either computed or submitted by a client.
pub type HistoryEntry = LocalizationResult;

type UserHistory = Arc<Mutex<VecDeque<HistoryEntry>>>;

#[derive(Debug)]
pub struct HistoryStore {
    capacity: usize,
    users: RwLock<HashMap<UserId, UserHistory, RandomState>>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(MAX_USER_HISTORY_LENGTH)
    }
}

impl HistoryStore {
    /// Create an empty store keeping at most `capacity` entries per user (at least one).
    pub fn new(capacity: usize) -> Self {
        HistoryStore {
            capacity: capacity.max(1),
            users: RwLock::new(HashMap::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn user_history(&self, user_id: &str) -> Option<UserHistory> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        users.get(user_id).cloned()
    }

    fn user_history_or_create(&self, user_id: &str) -> UserHistory {
        if let Some(history) = self.user_history(user_id) {
            return history;
        }
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        users
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::with_capacity(self.capacity))))
            .clone()
    }

    /// Append an entry to a user's history, creating it on first use.
    ///
    /// After the call the sequence holds at most `capacity` entries; the oldest ones are
    /// dropped first.
    pub fn append(&self, user_id: &str, entry: HistoryEntry) {
        let history = self.user_history_or_create(user_id);
        let mut entries = history.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        debug!(user = user_id, len = entries.len(), "history updated");
    }

    /// Snapshot of a user's history, oldest first.
    ///
    /// Return
    /// ----------
    /// * `NotFound("User ID is not valid")` when the user has no history yet.
    pub fn get(&self, user_id: &str) -> Result<Vec<HistoryEntry>, LocalizeError> {
        let history = self
            .user_history(user_id)
            .ok_or_else(|| LocalizeError::NotFound(USER_ID_NOT_VALID.into()))?;
        let entries = history.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.iter().cloned().collect())
    }

    /// Identifiers of all users with at least one entry, sorted.
    pub fn list_users(&self) -> Vec<UserId> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<UserId> = users.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }
}
