//! Keystore persistence across suspend
//!
//! Drives two store instances against the same in-memory host, the way a page
//! reload hands one instance's shares to the next.

use keystore_core::codec;
use keystore_core::{
    Clock, EventKind, Keystore, KeystoreConfig, KvStore, ManualClock, MemoryKvStore, OsRandom,
    Persistence, SharePolicy, SharedSlot, SlotStore, SuspendTrigger, Timestamp,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const START: u64 = 1_700_000_000_000;

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keystore_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// An in-memory host whose locations outlive any one store
struct Host {
    slot: Arc<SharedSlot>,
    kv: Arc<MemoryKvStore>,
    suspend: Arc<SuspendTrigger>,
    clock: Arc<ManualClock>,
}

impl Host {
    fn new() -> Self {
        init_tracing();
        Self {
            slot: Arc::new(SharedSlot::new()),
            kv: Arc::new(MemoryKvStore::new()),
            suspend: Arc::new(SuspendTrigger::new()),
            clock: Arc::new(ManualClock::new(Timestamp::from_millis(START))),
        }
    }

    fn persistence(&self) -> Persistence {
        Persistence::new(self.slot.clone(), self.kv.clone(), self.suspend.clone())
    }

    fn open(&self, name: &str) -> Keystore {
        Keystore::builder()
            .name(name)
            .clock(self.clock.clone())
            .persistence(self.persistence())
            .build()
    }

    /// Writes `table` as shares, as an older writer would have
    fn plant(&self, storage_key: &str, table: serde_json::Value) {
        let pair = codec::split(&table.to_string(), &OsRandom);
        self.slot.set(storage_key, pair.a()).unwrap();
        self.kv.set(storage_key, pair.b()).unwrap();
    }

    fn after(&self, ms: u64) -> Option<Timestamp> {
        Some(self.clock.now().saturating_add(Duration::from_millis(ms)))
    }
}

#[test]
fn test_round_trip_across_instances() {
    let host = Host::new();

    let a = host.open("default");
    a.set("foo", "bar", None);
    a.set("egg", "spam", host.after(60_000));
    a.set("gone", "soon", None);
    a.delete("gone");
    assert_eq!(host.suspend.fire(), 1);

    let b = host.open("default");
    assert_eq!(b.get("foo").as_deref(), Some("bar"));
    assert_eq!(b.get("egg").as_deref(), Some("spam"));
    assert_eq!(b.get("gone"), None);
    assert_eq!(b.keys(), vec!["foo", "egg"]);
}

#[test]
fn test_no_location_holds_plaintext() {
    let host = Host::new();
    let a = host.open("default");
    a.set("token", "very-secret-token-value", None);
    a.persist().unwrap();

    let slot_share = host.slot.get("session-keystore:default").unwrap();
    let kv_share = host.kv.get("session-keystore:default").unwrap();
    assert!(!host.slot.raw().contains("very-secret-token-value"));
    assert!(!slot_share.contains("very-secret-token-value"));
    assert!(!kv_share.contains("very-secret-token-value"));
    assert_ne!(slot_share, kv_share);
}

#[test]
fn test_shares_consumed_on_restore() {
    let host = Host::new();
    let a = host.open("default");
    a.set("foo", "bar", None);
    host.suspend.fire();

    let b = host.open("default");
    assert_eq!(b.get("foo").as_deref(), Some("bar"));
    assert_eq!(host.slot.get("session-keystore:default"), None);
    assert_eq!(host.kv.get("session-keystore:default"), None);

    // A third instance without an intervening suspend starts empty
    let c = host.open("default");
    assert!(c.is_empty());
}

#[test]
fn test_retain_policy_keeps_shares() {
    let host = Host::new();
    let config = KeystoreConfig::new().with_share_policy(SharePolicy::Retain);
    let open = || {
        Keystore::builder()
            .with_config(config.clone())
            .clock(host.clock.clone())
            .persistence(host.persistence())
            .build()
    };

    let a = open();
    a.set("foo", "bar", None);
    a.persist().unwrap();

    let b = open();
    let c = open();
    assert_eq!(b.get("foo").as_deref(), Some("bar"));
    assert_eq!(c.get("foo").as_deref(), Some("bar"));
    assert!(host.slot.get("session-keystore:default").is_some());
}

#[test]
fn test_v0_record_is_upgraded() {
    let host = Host::new();
    let expires = START + 60_000;
    host.plant(
        "session-keystore:legacy",
        json!([
            ["foo", { "key": "bar", "expiresAt": expires }],
            ["egg", { "key": "spam" }],
        ]),
    );

    let store = host.open("legacy");
    assert_eq!(store.get("foo").as_deref(), Some("bar"));
    assert_eq!(store.get("egg").as_deref(), Some("spam"));

    // Saved back in the current shape
    store.persist().unwrap();
    let a = host.slot.get("session-keystore:legacy").unwrap();
    let b = host.kv.get("session-keystore:legacy").unwrap();
    let table: serde_json::Value = serde_json::from_str(&codec::join(&a, &b).unwrap()).unwrap();
    assert_eq!(
        table,
        json!([
            ["foo", { "v": 1, "value": "bar", "expiresAt": expires }],
            ["egg", { "v": 1, "value": "spam" }],
        ])
    );
}

#[test]
fn test_unknown_record_version_dropped() {
    let host = Host::new();
    host.plant(
        "session-keystore:default",
        json!([
            ["future", { "v": 2, "payload": "?" }],
            ["foo", { "v": 1, "value": "bar" }],
        ]),
    );

    let store = host.open("default");
    assert_eq!(store.get("future"), None);
    assert_eq!(store.get("foo").as_deref(), Some("bar"));
    assert_eq!(store.len(), 1);
}

#[test]
fn test_corrupted_shares_start_empty() {
    let host = Host::new();
    host.slot.set("session-keystore:default", "AAAA").unwrap();
    host.kv.set("session-keystore:default", "AAAAAAAA").unwrap();

    let store = host.open("default");
    assert!(store.is_empty());
    // Consumed even though unreadable
    assert_eq!(host.kv.get("session-keystore:default"), None);
}

#[test]
fn test_restored_expired_entry_emits_expired() {
    let host = Host::new();
    let a = host.open("default");
    a.set("short", "lived", host.after(1_000));
    a.set("long", "lived", host.after(60_000));
    host.suspend.fire();

    host.clock.advance(Duration::from_secs(5));

    let expired = Arc::new(Mutex::new(Vec::new()));
    let b = {
        let expired = Arc::clone(&expired);
        Keystore::builder()
            .clock(host.clock.clone())
            .persistence(host.persistence())
            .on_expired(move |event| expired.lock().push(event.name.clone()))
            .build()
    };

    assert_eq!(*expired.lock(), vec!["short"]);
    assert_eq!(b.get("short"), None);
    assert_eq!(b.get("long").as_deref(), Some("lived"));
}

#[test]
fn test_names_are_disjoint() {
    let host = Host::new();
    let auth = host.open("auth");
    let prefs = host.open("prefs");
    auth.set("token", "abc", None);
    prefs.set("theme", "dark", None);
    assert_eq!(host.suspend.fire(), 2);

    let raw = host.slot.raw();
    assert!(raw.contains("session-keystore:auth"));
    assert!(raw.contains("session-keystore:prefs"));

    let auth = host.open("auth");
    assert_eq!(auth.keys(), vec!["token"]);
    // Restoring one name leaves the other's shares alone
    assert!(host.kv.get("session-keystore:prefs").is_some());

    let prefs = host.open("prefs");
    assert_eq!(prefs.keys(), vec!["theme"]);
}

#[test]
fn test_suspend_after_drop_is_harmless() {
    let host = Host::new();
    let store = host.open("default");
    store.set("foo", "bar", None);
    drop(store);

    assert_eq!(host.suspend.fire(), 1);
    assert_eq!(host.kv.get("session-keystore:default"), None);
}

#[test]
fn test_slot_capacity_exceeded() {
    let host = Host::new();
    let tiny = Arc::new(SharedSlot::with_capacity(64));
    let store = Keystore::builder()
        .persistence(Persistence::new(tiny.clone(), host.kv.clone(), host.suspend.clone()))
        .build();
    store.set("foo", "a value long enough to overflow the tiny slot", None);

    let err = store.persist().unwrap_err();
    assert!(matches!(
        err,
        keystore_core::KeystoreError::SlotCapacityExceeded { .. }
    ));
    // Neither location is left holding a lone share
    assert_eq!(tiny.get("session-keystore:default"), None);
    assert_eq!(host.kv.get("session-keystore:default"), None);
}

#[test]
fn test_events_after_restore() {
    let host = Host::new();
    let a = host.open("default");
    a.set("foo", "bar", None);
    host.suspend.fire();

    let b = host.open("default");
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in EventKind::ALL {
        let seen = Arc::clone(&seen);
        b.on(kind, move |event| seen.lock().push((kind, event.name.clone())));
    }

    // Restored keys are existing keys
    b.set("foo", "baz", None);
    b.delete("foo");
    assert_eq!(
        *seen.lock(),
        vec![
            (EventKind::Updated, "foo".to_string()),
            (EventKind::Deleted, "foo".to_string()),
        ]
    );
}
