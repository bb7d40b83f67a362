use indexmap::IndexMap;
use std::borrow::Borrow;
use std::hash::Hash;

use crate::entry::{Entry, Timestamp};

/// In-memory map of key to [`Entry`], iterated in insertion order.
///
/// The table knows nothing about timers or events; the keystore layers those
/// on top. Overwriting a key keeps its original position.
#[derive(Debug, Clone)]
pub struct ExpiringEntryTable<K> {
    entries: IndexMap<K, Entry>,
}

impl<K> Default for ExpiringEntryTable<K> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<K: Hash + Eq + Clone> ExpiringEntryTable<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a table from restored entries, keeping their order
    pub fn from_entries(entries: impl IntoIterator<Item = (K, Entry)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Stores `entry` under `key`, returning the entry it replaced
    pub fn insert(&mut self, key: K, entry: Entry) -> Option<Entry> {
        self.entries.insert(key, entry)
    }

    /// Looks up an entry that is still live at `now`
    pub fn get<Q>(&self, key: &Q, now: Timestamp) -> Option<&Entry>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).filter(|entry| !entry.is_expired(now))
    }

    /// Looks up an entry regardless of expiry, with its owned key
    pub fn get_raw<Q>(&self, key: &Q) -> Option<(&K, &Entry)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get_key_value(key)
    }

    /// Removes an entry, preserving the order of the rest
    pub fn remove<Q>(&mut self, key: &Q) -> Option<(K, Entry)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.shift_remove_entry(key)
    }

    /// Removes an entry only if `predicate` holds for it
    pub fn remove_if<Q>(&mut self, key: &Q, predicate: impl FnOnce(&Entry) -> bool) -> Option<(K, Entry)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.entries.get(key).is_some_and(predicate) {
            self.remove(key)
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &Entry)> {
        self.entries.iter()
    }

    /// All keys in insertion order
    pub fn keys(&self) -> Vec<K> {
        self.entries.keys().cloned().collect()
    }

    /// Keys whose entries have expired at `now`, in insertion order
    pub fn expired_keys(&self, now: Timestamp) -> Vec<K> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Cloned copy of every entry, in insertion order
    pub fn snapshot(&self) -> Vec<(K, Entry)> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Number of entries, including ones that have expired but not been purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
