//! StateStore - per-user, per-key last-writer-wins map
//!
//! Each key of each user holds a `StampedValue`. An update replaces the stored
//! value only when its timestamp is strictly greater, so on equal timestamps the
//! value stored first is kept. That makes re-applying an update a no-op and the
//! final value independent of arrival order except for exact ties.

use super::error::MergeCollisionError;
use ahash::AHashMap;
use std::collections::BTreeMap;

/// Key -> value view of one user, timestamps stripped
pub type UserSnapshot = BTreeMap<String, String>;

/// User -> key -> value view of a whole store
pub type Snapshot = BTreeMap<String, UserSnapshot>;

/// Keys accepted by one `apply` call, with the value now stored
pub type Changes = AHashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampedValue {
    pub timestamp: i64,
    pub value: String,
}

impl StampedValue {
    pub fn new(timestamp: i64, value: String) -> Self {
        StampedValue { timestamp, value }
    }

    /// LWW acceptance test: strictly newer wins, ties keep what is stored
    #[inline]
    pub fn is_superseded_by(&self, timestamp: i64) -> bool {
        self.timestamp < timestamp
    }
}

#[derive(Debug, Default)]
pub struct StateStore {
    users: AHashMap<String, AHashMap<String, StampedValue>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one update and return the keys it changed.
    ///
    /// The user gets an entry even when `fields` is empty, so it still shows up
    /// in snapshots with an empty state.
    pub fn apply<I>(&mut self, user: String, timestamp: i64, fields: I) -> Changes
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut changes = Changes::new();
        let entries = self.users.entry(user).or_default();

        for (key, value) in fields {
            match entries.get_mut(&key) {
                Some(stored) => {
                    if stored.is_superseded_by(timestamp) {
                        stored.timestamp = timestamp;
                        stored.value.clone_from(&value);
                        changes.insert(key, value);
                    }
                }
                None => {
                    entries.insert(key.clone(), StampedValue::new(timestamp, value.clone()));
                    changes.insert(key, value);
                }
            }
        }

        // Postcondition: every change is now stored at exactly this timestamp
        #[cfg(debug_assertions)]
        for (key, value) in &changes {
            debug_assert!(
                entries
                    .get(key)
                    .map(|s| s.timestamp == timestamp && &s.value == value)
                    .unwrap_or(false),
                "Postcondition: change for key '{}' must be stored",
                key
            );
        }

        changes
    }

    pub fn get(&self, user: &str, key: &str) -> Option<&StampedValue> {
        self.users.get(user)?.get(key)
    }

    /// Key -> value view of one user; empty if the user was never seen
    pub fn user_state(&self, user: &str) -> UserSnapshot {
        self.users
            .get(user)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.users
            .keys()
            .map(|user| (user.clone(), self.user_state(user)))
            .collect()
    }

    /// Consuming variant of `snapshot`, used for the final emission
    pub fn into_snapshot(self) -> Snapshot {
        self.users
            .into_iter()
            .map(|(user, entries)| {
                let view = entries.into_iter().map(|(k, v)| (k, v.value)).collect();
                (user, view)
            })
            .collect()
    }

    /// Move every user of `self` into `other`.
    ///
    /// Fails without touching either store if `other` already holds any of
    /// those users.
    pub fn merge_into(self, other: &mut StateStore) -> Result<(), MergeCollisionError> {
        if let Some(user) = self.users.keys().find(|u| other.users.contains_key(*u)) {
            return Err(MergeCollisionError { user: user.clone() });
        }

        let expected_users = other.users.len() + self.users.len();

        other.users.extend(self.users);

        debug_assert_eq!(
            other.users.len(),
            expected_users,
            "Postcondition: merge must not drop users"
        );
        Ok(())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn key_count(&self) -> usize {
        self.users.values().map(|entries| entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
