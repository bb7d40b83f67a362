use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::backend::Persistence;
use crate::codec;
use crate::config::SharePolicy;
use crate::entry::Entry;
use crate::error::{KeystoreError, Result};
use crate::random::RandomSource;
use crate::record::{PersistedRecord, CURRENT_VERSION};

/// Saves and restores a whole table through the two host storage locations.
///
/// The table is serialized as a JSON array of `[key, record]` pairs, split
/// into two shares, and each share is written to a different location under
/// the same storage key. The gateway only ever sees snapshots; it never
/// touches the live table.
pub struct PersistenceGateway {
    persistence: Persistence,
    random: Arc<dyn RandomSource>,
    storage_key: String,
    policy: SharePolicy,
}

impl PersistenceGateway {
    pub fn new(
        persistence: Persistence,
        random: Arc<dyn RandomSource>,
        storage_key: impl Into<String>,
        policy: SharePolicy,
    ) -> Self {
        Self {
            persistence,
            random,
            storage_key: storage_key.into(),
            policy,
        }
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    /// Writes `snapshot` to both locations
    pub fn save<K: Serialize>(&self, snapshot: &[(K, Entry)]) -> Result<()> {
        let records: Vec<(&K, PersistedRecord)> = snapshot
            .iter()
            .map(|(key, entry)| (key, PersistedRecord::from_entry(entry)))
            .collect();
        let json = Zeroizing::new(serde_json::to_string(&records).map_err(KeystoreError::Serialization)?);

        let (a, b) = codec::split(&json, self.random.as_ref()).into_parts();
        self.persistence.slot.set(&self.storage_key, &a)?;
        if let Err(err) = self.persistence.kv.set(&self.storage_key, &b) {
            // Never leave a share without its partner
            self.persistence.slot.remove(&self.storage_key);
            return Err(err);
        }

        tracing::debug!(
            storage_key = %self.storage_key,
            entries = snapshot.len(),
            "Persisted keystore shares"
        );
        Ok(())
    }

    /// Restores the persisted table, or an empty one if nothing usable is stored.
    ///
    /// Failures are logged and swallowed.
    pub fn load<K: DeserializeOwned + Debug>(&self) -> Vec<(K, Entry)> {
        match self.try_load() {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(
                    storage_key = %self.storage_key,
                    error = %err,
                    "Discarding unreadable persisted keystore"
                );
                Vec::new()
            }
        }
    }

    /// Restores the persisted table, reporting why it could not be read.
    ///
    /// Individual records that cannot be decoded are dropped without failing
    /// the whole load.
    pub fn try_load<K: DeserializeOwned + Debug>(&self) -> Result<Vec<(K, Entry)>> {
        let a = self.persistence.slot.get(&self.storage_key);
        let b = self.persistence.kv.get(&self.storage_key);
        if self.policy == SharePolicy::Consume && (a.is_some() || b.is_some()) {
            self.clear();
        }

        let (Some(a), Some(b)) = (a, b) else {
            return Ok(Vec::new());
        };
        let json = codec::join(&a, &b)
            .map(Zeroizing::new)
            .ok_or_else(|| KeystoreError::Corrupted("shares do not recombine".to_string()))?;
        let pairs: Vec<Value> = serde_json::from_str(&json)
            .map_err(|e| KeystoreError::Corrupted(format!("invalid table: {}", e)))?;

        let total = pairs.len();
        let entries: Vec<(K, Entry)> = pairs
            .into_iter()
            .filter_map(|pair| match decode_pair::<K>(pair) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(error = %err, "Dropping persisted record");
                    None
                }
            })
            .collect();

        tracing::debug!(
            storage_key = %self.storage_key,
            restored = entries.len(),
            dropped = total - entries.len(),
            "Restored keystore shares"
        );
        Ok(entries)
    }

    /// Removes both shares from both locations
    pub fn clear(&self) {
        self.persistence.slot.remove(&self.storage_key);
        self.persistence.kv.remove(&self.storage_key);
    }
}

fn decode_pair<K: DeserializeOwned + Debug>(pair: Value) -> Result<(K, Entry)> {
    let Value::Array(mut items) = pair else {
        return Err(KeystoreError::Corrupted("table item is not a pair".to_string()));
    };
    if items.len() != 2 {
        return Err(KeystoreError::Corrupted(format!(
            "table item has {} elements",
            items.len()
        )));
    }

    let raw_record = items.pop().unwrap_or(Value::Null);
    let raw_key = items.pop().unwrap_or(Value::Null);
    let key: K = serde_json::from_value(raw_key)
        .map_err(|e| KeystoreError::Corrupted(format!("invalid key: {}", e)))?;
    let record = PersistedRecord::parse(raw_record).map_err(|err| {
        tracing::debug!(key = ?key, "Record has an unknown version");
        err
    })?;
    if record.version() < CURRENT_VERSION {
        tracing::debug!(key = ?key, from = record.version(), "Upgrading persisted record");
    }

    Ok((key, record.upgrade().into_entry()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{KvStore, SharedSlot, SlotStore};
    use crate::entry::Timestamp;
    use crate::random::OsRandom;
    use serde_json::json;

    fn gateway(persistence: &Persistence, policy: SharePolicy) -> PersistenceGateway {
        PersistenceGateway::new(persistence.clone(), Arc::new(OsRandom), "session-keystore:test", policy)
    }

    /// Stores `json` the way a save would, bypassing the record encoder
    fn plant(persistence: &Persistence, json: &str) {
        let (a, b) = codec::split(json, &OsRandom).into_parts();
        persistence.slot.set("session-keystore:test", &a).unwrap();
        persistence.kv.set("session-keystore:test", &b).unwrap();
    }

    fn values(entries: &[(String, Entry)]) -> Vec<(&str, &str)> {
        entries.iter().map(|(k, e)| (k.as_str(), e.value())).collect()
    }

    #[test]
    fn test_save_then_load() {
        let (persistence, _) = Persistence::in_memory();
        let gw = gateway(&persistence, SharePolicy::Consume);

        let snapshot = vec![
            ("foo".to_string(), Entry::new("bar", None)),
            ("egg".to_string(), Entry::new("spam", Some(Timestamp::from_millis(77)))),
        ];
        gw.save(&snapshot).unwrap();

        let restored: Vec<(String, Entry)> = gw.load();
        assert_eq!(values(&restored), vec![("foo", "bar"), ("egg", "spam")]);
        assert_eq!(restored[1].1.expires_at(), Some(Timestamp::from_millis(77)));
    }

    #[test]
    fn test_legacy_records_load_as_current() {
        let (persistence, _) = Persistence::in_memory();
        plant(
            &persistence,
            r#"[["foo",{"key":"bar","expiresAt":500}],["egg",{"v":1,"value":"spam"}]]"#,
        );

        let gw = gateway(&persistence, SharePolicy::Retain);
        let restored: Vec<(String, Entry)> = gw.try_load().unwrap();
        assert_eq!(values(&restored), vec![("foo", "bar"), ("egg", "spam")]);
        assert_eq!(restored[0].1.expires_at(), Some(Timestamp::from_millis(500)));

        // Writing the restored table back drops the legacy shape
        gw.save(&restored).unwrap();
        let a = persistence.slot.get("session-keystore:test").unwrap();
        let b = persistence.kv.get("session-keystore:test").unwrap();
        let table: serde_json::Value = serde_json::from_str(&codec::join(&a, &b).unwrap()).unwrap();
        assert_eq!(
            table,
            json!([
                ["foo", {"v": 1, "value": "bar", "expiresAt": 500}],
                ["egg", {"v": 1, "value": "spam"}],
            ])
        );
    }

    #[test]
    fn test_neither_location_holds_plaintext() {
        let (persistence, _) = Persistence::in_memory();
        let gw = gateway(&persistence, SharePolicy::Consume);
        gw.save(&[("foo".to_string(), Entry::new("hunter2-secret", None))]).unwrap();

        let a = persistence.slot.get("session-keystore:test").unwrap();
        let b = persistence.kv.get("session-keystore:test").unwrap();
        assert!(!a.contains("hunter2"));
        assert!(!b.contains("hunter2"));
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn test_consume_removes_both_shares() {
        let (persistence, _) = Persistence::in_memory();
        let gw = gateway(&persistence, SharePolicy::Consume);
        gw.save(&[("foo".to_string(), Entry::new("bar", None))]).unwrap();

        let first: Vec<(String, Entry)> = gw.load();
        assert_eq!(first.len(), 1);
        assert_eq!(persistence.slot.get("session-keystore:test"), None);
        assert_eq!(persistence.kv.get("session-keystore:test"), None);

        let second: Vec<(String, Entry)> = gw.load();
        assert!(second.is_empty());
    }

    #[test]
    fn test_retain_keeps_both_shares() {
        let (persistence, _) = Persistence::in_memory();
        let gw = gateway(&persistence, SharePolicy::Retain);
        gw.save(&[("foo".to_string(), Entry::new("bar", None))]).unwrap();

        let _: Vec<(String, Entry)> = gw.load();
        let again: Vec<(String, Entry)> = gw.load();
        assert_eq!(values(&again), vec![("foo", "bar")]);
    }

    #[test]
    fn test_missing_share_yields_empty() {
        let (persistence, _) = Persistence::in_memory();
        let gw = gateway(&persistence, SharePolicy::Consume);
        gw.save(&[("foo".to_string(), Entry::new("bar", None))]).unwrap();
        persistence.kv.remove("session-keystore:test");

        let restored: Vec<(String, Entry)> = gw.try_load().unwrap();
        assert!(restored.is_empty());
        // The orphaned share is consumed as well
        assert_eq!(persistence.slot.get("session-keystore:test"), None);
    }

    #[test]
    fn test_mismatched_shares_are_corrupted() {
        let (persistence, _) = Persistence::in_memory();
        let gw = gateway(&persistence, SharePolicy::Consume);
        gw.save(&[("foo".to_string(), Entry::new("bar", None))]).unwrap();
        let (_, longer) = codec::split("a much longer plaintext than before", &OsRandom).into_parts();
        persistence.kv.set("session-keystore:test", &longer).unwrap();

        let err = gw.try_load::<String>().unwrap_err();
        assert!(err.is_corrupted());
        assert!(gw.load::<String>().is_empty());
    }

    #[test]
    fn test_invalid_json_is_corrupted() {
        let (persistence, _) = Persistence::in_memory();
        let gw = gateway(&persistence, SharePolicy::Consume);
        plant(&persistence, "{ not json");

        assert!(matches!(
            gw.try_load::<String>(),
            Err(KeystoreError::Corrupted(_))
        ));
    }

    #[test]
    fn test_v0_records_are_upgraded() {
        let (persistence, _) = Persistence::in_memory();
        let gw = gateway(&persistence, SharePolicy::Consume);
        plant(
            &persistence,
            &json!([["foo", {"key": "bar", "expiresAt": 1000}]]).to_string(),
        );

        let restored: Vec<(String, Entry)> = gw.load();
        assert_eq!(values(&restored), vec![("foo", "bar")]);
        assert_eq!(restored[0].1.expires_at(), Some(Timestamp::from_millis(1000)));
    }

    #[test]
    fn test_bad_records_are_dropped_individually() {
        let (persistence, _) = Persistence::in_memory();
        let gw = gateway(&persistence, SharePolicy::Consume);
        plant(
            &persistence,
            &json!([
                ["first", {"v": 1, "value": "one"}],
                ["future", {"v": 2, "value": "two"}],
                ["lonely"],
                [42, {"v": 1, "value": "numeric key"}],
                ["last", {"key": "three"}]
            ])
            .to_string(),
        );

        let restored: Vec<(String, Entry)> = gw.load();
        assert_eq!(values(&restored), vec![("first", "one"), ("last", "three")]);
    }

    #[test]
    fn test_failed_kv_write_removes_slot_share() {
        struct FullKv;
        impl KvStore for FullKv {
            fn get(&self, _: &str) -> Option<String> {
                None
            }
            fn set(&self, _: &str, _: &str) -> Result<()> {
                Err(KeystoreError::Backend("quota exceeded".to_string()))
            }
            fn remove(&self, _: &str) {}
        }

        let (memory, _) = Persistence::in_memory();
        let slot = Arc::new(SharedSlot::new());
        let persistence = Persistence::new(slot.clone(), Arc::new(FullKv), memory.suspend);
        let gw = gateway(&persistence, SharePolicy::Consume);

        let err = gw.save(&[("foo".to_string(), Entry::new("bar", None))]).unwrap_err();
        assert!(matches!(err, KeystoreError::Backend(_)));
        assert_eq!(slot.raw(), "");
    }

    #[test]
    fn test_slot_capacity_surfaces_on_save() {
        let (memory, _) = Persistence::in_memory();
        let persistence = Persistence::new(
            Arc::new(SharedSlot::with_capacity(8)),
            memory.kv.clone(),
            memory.suspend,
        );
        let gw = gateway(&persistence, SharePolicy::Consume);

        let err = gw.save(&[("foo".to_string(), Entry::new("bar", None))]).unwrap_err();
        assert!(matches!(err, KeystoreError::SlotCapacityExceeded { .. }));
        assert_eq!(memory.kv.get("session-keystore:test"), None);
    }
}
