use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Borrow;
use std::fmt;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;
use subtle::ConstantTimeEq;

use crate::backend::Persistence;
use crate::clock::{Clock, SystemClock};
use crate::config::KeystoreConfig;
use crate::entry::{Entry, Timestamp};
use crate::error::{KeystoreError, Result};
use crate::events::{EventBus, EventKind, Handler, KeyEvent, Subscription};
use crate::gateway::PersistenceGateway;
use crate::random::{OsRandom, RandomSource};
use crate::scheduler::{ArmOutcome, TimeoutScheduler};
use crate::table::ExpiringEntryTable;

/// Bounds every keystore key type must satisfy.
///
/// Implemented automatically for any qualifying type.
pub trait StoreKey:
    Eq + Hash + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> StoreKey for T where
    T: Eq + Hash + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Compares two secrets without leaking where they differ.
///
/// The length check is not constant-time; lengths are not treated as secret.
fn same_secret(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() != b_bytes.len() {
        return false;
    }
    a_bytes.ct_eq(b_bytes).into()
}

/// Internal shared state for the keystore
struct KeystoreInner<K: StoreKey> {
    /// Handle to ourselves, captured by timer callbacks
    this: Weak<KeystoreInner<K>>,
    name: String,
    storage_key: String,
    table: Mutex<ExpiringEntryTable<K>>,
    scheduler: TimeoutScheduler<K>,
    events: EventBus<K>,
    clock: Arc<dyn Clock>,
    gateway: Option<PersistenceGateway>,
}

impl<K: StoreKey> KeystoreInner<K> {
    fn emit(&self, kind: EventKind, name: K) {
        self.events.emit(kind, &KeyEvent { name });
    }

    /// Arms the expiry timer for `key`; must be called with the table locked
    fn arm(&self, key: &K, expires_at: Option<Timestamp>) -> ArmOutcome {
        let this = self.this.clone();
        let timer_key = key.clone();
        self.scheduler.arm(key, expires_at, move |generation| {
            if let Some(inner) = this.upgrade() {
                inner.on_timer(timer_key, generation, expires_at);
            }
        })
    }

    fn on_timer(&self, key: K, generation: u64, armed_at: Option<Timestamp>) {
        let expired = {
            let mut table = self.table.lock();
            self.scheduler.release(&key, generation);
            // A newer set may have replaced the entry this timer was armed for
            table.remove_if(&key, |entry| entry.expires_at() == armed_at)
        };
        if let Some((key, _)) = expired {
            tracing::debug!(store = %self.name, key = ?key, "Key expired");
            self.emit(EventKind::Expired, key);
        }
    }

    /// Expires `key` if its entry has expired at `now`
    fn expire_if_due<Q>(&self, key: &Q, now: Timestamp) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let expired = {
            let mut table = self.table.lock();
            let removed = table.remove_if(key, |entry| entry.is_expired(now));
            if removed.is_some() {
                self.scheduler.disarm(key);
            }
            removed
        };
        match expired {
            Some((key, _)) => {
                self.emit(EventKind::Expired, key);
                true
            }
            None => false,
        }
    }

    fn set(&self, key: K, value: String, expires_at: Option<Timestamp>) {
        let now = self.clock.now();
        let transitions = {
            let mut table = self.table.lock();
            let previous = table.insert(key.clone(), Entry::new(value, expires_at));
            let mut transitions = Vec::with_capacity(2);

            // An expired entry that was never purged counts as absent
            let previous = match previous {
                Some(entry) if entry.is_expired(now) => {
                    transitions.push(EventKind::Expired);
                    None
                }
                other => other,
            };

            if self.arm(&key, expires_at) == ArmOutcome::Elapsed {
                table.remove(&key);
                transitions.push(EventKind::Expired);
            } else if let Some(previous) = previous {
                let changed = table
                    .get_raw(&key)
                    .is_some_and(|(_, current)| !same_secret(previous.value(), current.value()));
                if changed {
                    transitions.push(EventKind::Updated);
                }
            } else {
                transitions.push(EventKind::Created);
            }
            transitions
        };

        // Two expiries in a row describe a single transition
        let mut last = None;
        for kind in transitions {
            if last == Some(kind) {
                continue;
            }
            last = Some(kind);
            self.emit(kind, key.clone());
        }
    }

    fn get<Q>(&self, key: &Q, now: Timestamp) -> Option<String>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (name, value) = {
            let table = self.table.lock();
            let (name, entry) = table.get_raw(key)?;
            if entry.is_expired(now) {
                drop(table);
                self.expire_if_due(key, now);
                return None;
            }
            (name.clone(), entry.value().to_owned())
        };
        self.emit(EventKind::Read, name);
        Some(value)
    }

    /// Removes `key`; an entry that has already expired is reported as
    /// `expired` and does not count as deleted
    fn delete<Q>(&self, key: &Q, now: Timestamp) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let removed = {
            let mut table = self.table.lock();
            self.scheduler.disarm(key);
            table.remove(key)
        };
        match removed {
            Some((key, entry)) if entry.is_expired(now) => {
                self.emit(EventKind::Expired, key);
                false
            }
            Some((key, _)) => {
                self.emit(EventKind::Deleted, key);
                true
            }
            None => false,
        }
    }

    /// Replaces the table with restored entries and re-arms their timers
    fn restore(&self, entries: Vec<(K, Entry)>) {
        let expired = {
            let mut table = self.table.lock();
            *table = ExpiringEntryTable::from_entries(entries);

            let armed: Vec<(K, Option<Timestamp>)> = table
                .iter()
                .filter(|(_, entry)| entry.expires_at().is_some())
                .map(|(key, entry)| (key.clone(), entry.expires_at()))
                .collect();

            let mut expired = Vec::new();
            for (key, expires_at) in armed {
                if self.arm(&key, expires_at) == ArmOutcome::Elapsed {
                    table.remove(&key);
                    expired.push(key);
                }
            }
            expired
        };

        for key in expired {
            self.emit(EventKind::Expired, key);
        }
    }

    fn persist(&self) -> Result<()> {
        let gateway = self
            .gateway
            .as_ref()
            .ok_or(KeystoreError::UnsupportedEnvironment)?;
        let snapshot = self.table.lock().snapshot();
        gateway.save(&snapshot)
    }
}

/// In-memory keystore for short-lived secrets.
///
/// Every entry may carry an absolute expiry. Expiry is enforced actively by a
/// per-key timer on the Tokio runtime and passively on every read, and each
/// lifecycle transition is published on an event bus:
///
/// | Transition                         | Event     |
/// |------------------------------------|-----------|
/// | `set` on an absent key             | `created` |
/// | `set` with a different value       | `updated` |
/// | `get` on a live key                | `read`    |
/// | `delete` / `clear`                 | `deleted` |
/// | expiry (timer, read, or `set` with a past expiry) | `expired` |
///
/// When the host provides [`Persistence`], the table is restored on
/// construction and saved whenever the host signals suspend. The saved table
/// is split into two shares kept in two different locations, so neither
/// location ever holds the plaintext.
///
/// `Keystore` is a cheap handle; clones share the same table.
///
/// # Example
///
/// ```rust
/// use keystore_core::{EventKind, Keystore};
///
/// let store = Keystore::new();
/// store.on(EventKind::Created, |event| println!("created {}", event.name));
///
/// store.set("token", "s3cr3t", None);
/// assert_eq!(store.get("token").as_deref(), Some("s3cr3t"));
///
/// store.delete("token");
/// assert_eq!(store.get("token"), None);
/// ```
pub struct Keystore<K: StoreKey = String> {
    inner: Arc<KeystoreInner<K>>,
}

impl<K: StoreKey> Clone for Keystore<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Keystore {
    /// Creates an in-memory keystore named `"default"`
    ///
    /// Timers run on the current Tokio runtime if there is one; otherwise
    /// expiry is only enforced on access and by [`purge_expired`](Self::purge_expired).
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates an in-memory keystore with custom configuration
    pub fn with_config(config: KeystoreConfig) -> Self {
        Self::builder().with_config(config).build()
    }

    /// Starts building a keystore with string keys
    pub fn builder() -> KeystoreBuilder {
        KeystoreBuilder::new()
    }
}

impl Default for Keystore {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StoreKey> Keystore<K> {
    /// Stores `value` under `key`; `None` means the entry never expires
    ///
    /// An `expires_at` that has already passed stores nothing and emits
    /// `expired` instead of `created`.
    pub fn set(&self, key: impl Into<K>, value: impl Into<String>, expires_at: Option<Timestamp>) {
        self.inner.set(key.into(), value.into(), expires_at);
    }

    /// Stores `value` under `key`, expiring `ttl` from now
    pub fn set_with_ttl(&self, key: impl Into<K>, value: impl Into<String>, ttl: Duration) {
        let expires_at = self.inner.clock.now().saturating_add(ttl);
        self.set(key, value, Some(expires_at));
    }

    /// Retrieves a value by key
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    /// Expired entries are removed and reported as `expired`.
    pub fn get<Q>(&self, key: &Q) -> Option<String>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_at(key, self.inner.clock.now())
    }

    /// Retrieves a value as if the current time were `now`
    pub fn get_at<Q>(&self, key: &Q, now: Timestamp) -> Option<String>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.get(key, now)
    }

    /// Checks if a key exists and is not expired, without emitting `read`
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.inner.clock.now();
        if self.inner.table.lock().get(key, now).is_some() {
            return true;
        }
        self.inner.expire_if_due(key, now);
        false
    }

    /// Deletes a key, cancelling its timer
    ///
    /// Returns `true` if the key existed and had not expired. A key whose
    /// expiry has passed is expired instead, emitting `expired`.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.delete(key, self.inner.clock.now())
    }

    /// Deletes every live key in insertion order, emitting one `deleted` per key
    ///
    /// Keys whose expiry has passed are expired instead. Returns the number
    /// of keys deleted.
    pub fn clear(&self) -> usize {
        let now = self.inner.clock.now();
        let keys = self.inner.table.lock().keys();
        keys.iter().filter(|key| self.inner.delete(*key, now)).count()
    }

    /// Expires every entry whose expiry has passed
    ///
    /// Returns the number of entries removed. Timers normally do this; the
    /// sweep matters when no runtime is available.
    pub fn purge_expired(&self) -> usize {
        let now = self.inner.clock.now();
        let keys = self.inner.table.lock().expired_keys(now);
        keys.iter()
            .filter(|key| self.inner.expire_if_due(*key, now))
            .count()
    }

    /// Returns all keys that are not expired, in insertion order
    pub fn keys(&self) -> Vec<K> {
        let now = self.inner.clock.now();
        self.inner
            .table
            .lock()
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Returns the number of entries in the store (including expired ones not yet purged)
    pub fn len(&self) -> usize {
        self.inner.table.lock().len()
    }

    /// Returns `true` if the store is empty
    pub fn is_empty(&self) -> bool {
        self.inner.table.lock().is_empty()
    }

    /// Subscribes `handler` to `kind`
    ///
    /// Handlers get no access to the store; capture a clone of it if needed.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription<K>
    where
        F: Fn(&KeyEvent<K>) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind, Arc::new(handler))
    }

    /// Subscribes a shared handler, which can later be passed to [`off`](Self::off)
    pub fn on_handler(&self, kind: EventKind, handler: Handler<K>) -> Subscription<K> {
        self.inner.events.subscribe(kind, handler)
    }

    /// Unsubscribes a handler registered with [`on_handler`](Self::on_handler)
    pub fn off(&self, kind: EventKind, handler: &Handler<K>) -> bool {
        self.inner.events.unsubscribe(kind, handler)
    }

    /// Saves the table to the host storage locations now
    ///
    /// # Errors
    ///
    /// Returns [`KeystoreError::UnsupportedEnvironment`] if the store was built
    /// without [`Persistence`], or the backend's error if a write fails.
    pub fn persist(&self) -> Result<()> {
        self.inner.persist()
    }

    /// Returns `true` if this store can persist
    pub fn is_persistent(&self) -> bool {
        self.inner.gateway.is_some()
    }

    /// Returns `true` if expiry timers fire on their own
    pub fn timers_active(&self) -> bool {
        self.inner.scheduler.is_active()
    }

    /// The logical name of the store
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The key both persisted shares are stored under
    pub fn storage_key(&self) -> &str {
        &self.inner.storage_key
    }
}

impl<K: StoreKey> fmt::Debug for Keystore<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keystore")
            .field("name", &self.inner.name)
            .field("entries", &self.len())
            .field("persistent", &self.is_persistent())
            .finish()
    }
}

/// Builder for a [`Keystore`]
///
/// Direct callbacks (`on_access`, `on_changed`, `on_expired`) are subscribed
/// before persisted entries are restored, so they observe entries that
/// expired while the store was suspended.
///
/// # Example
///
/// ```rust
/// use keystore_core::{Keystore, Persistence};
///
/// let (persistence, _suspend) = Persistence::in_memory();
/// let store = Keystore::builder()
///     .name("session")
///     .persistence(persistence)
///     .on_expired(|event| println!("{} expired", event.name))
///     .build();
/// assert_eq!(store.storage_key(), "session-keystore:session");
/// ```
pub struct KeystoreBuilder<K: StoreKey = String> {
    config: KeystoreConfig,
    clock: Option<Arc<dyn Clock>>,
    random: Arc<dyn RandomSource>,
    persistence: Option<Persistence>,
    callbacks: Vec<(EventKind, Handler<K>)>,
}

impl<K: StoreKey> Default for KeystoreBuilder<K> {
    fn default() -> Self {
        Self {
            config: KeystoreConfig::default(),
            clock: None,
            random: Arc::new(OsRandom),
            persistence: None,
            callbacks: Vec::new(),
        }
    }
}

impl<K: StoreKey> KeystoreBuilder<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration
    pub fn with_config(mut self, config: KeystoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the logical name of the store
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config = self.config.with_name(name);
        self
    }

    /// Uses `clock` instead of the system clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Uses `random` for share pads instead of the OS-seeded generator
    pub fn random_source(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Enables persistence through the host's storage locations
    pub fn persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Calls `callback` whenever a key is read
    pub fn on_access<F>(mut self, callback: F) -> Self
    where
        F: Fn(&KeyEvent<K>) + Send + Sync + 'static,
    {
        self.callbacks.push((EventKind::Read, Arc::new(callback)));
        self
    }

    /// Calls `callback` whenever a key is created, updated or deleted
    pub fn on_changed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&KeyEvent<K>) + Send + Sync + 'static,
    {
        let handler: Handler<K> = Arc::new(callback);
        for kind in [EventKind::Created, EventKind::Updated, EventKind::Deleted] {
            self.callbacks.push((kind, Arc::clone(&handler)));
        }
        self
    }

    /// Calls `callback` whenever a key expires
    pub fn on_expired<F>(mut self, callback: F) -> Self
    where
        F: Fn(&KeyEvent<K>) + Send + Sync + 'static,
    {
        self.callbacks.push((EventKind::Expired, Arc::new(callback)));
        self
    }

    /// Builds the store, restoring persisted entries if persistence is enabled
    pub fn build(self) -> Keystore<K> {
        let runtime = tokio::runtime::Handle::try_current().ok();
        if runtime.is_none() {
            tracing::debug!(
                store = %self.config.name,
                "No Tokio runtime; expiry timers disabled, expiry enforced on access"
            );
        }

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);
        let storage_key = self.config.storage_key();
        let gateway = self.persistence.map(|persistence| {
            PersistenceGateway::new(
                persistence,
                self.random,
                storage_key.clone(),
                self.config.share_policy,
            )
        });

        let inner = Arc::new_cyclic(|this| KeystoreInner {
            this: this.clone(),
            name: self.config.name.clone(),
            storage_key,
            table: Mutex::new(ExpiringEntryTable::new()),
            scheduler: TimeoutScheduler::new(Arc::clone(&clock), runtime),
            events: EventBus::new(),
            clock,
            gateway,
        });

        for (kind, handler) in self.callbacks {
            // Direct callbacks stay subscribed for the lifetime of the store
            let _ = inner.events.subscribe(kind, handler);
        }

        if let Some(gateway) = &inner.gateway {
            let restored = gateway.load::<K>();
            let count = restored.len();
            inner.restore(restored);

            let weak = Arc::downgrade(&inner);
            gateway.persistence().suspend.on_suspend(Box::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Err(err) = inner.persist() {
                    tracing::warn!(store = %inner.name, error = %err, "Failed to persist keystore on suspend");
                }
            }));

            tracing::debug!(store = %inner.name, restored = count, "Keystore ready");
        }

        Keystore { inner }
    }
}
