//! Host storage capabilities used for persistence, plus in-memory hosts.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::{KeystoreError, Result};

/// Default capacity of a [`SharedSlot`] (2 MiB)
pub const DEFAULT_SLOT_CAPACITY: usize = 2 * 1024 * 1024;

/// A small, capacity-constrained named string slot that survives navigation.
pub trait SlotStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str) -> Result<()>;
    fn remove(&self, name: &str);
}

/// A session-scoped key/value string store.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str);
}

/// Hook run when the host is about to discard in-memory state
pub type SuspendHook = Box<dyn FnOnce() + Send>;

/// Host notification that in-memory state is about to be discarded.
pub trait SuspendSignal: Send + Sync {
    /// Registers `hook` to run once on suspend
    fn on_suspend(&self, hook: SuspendHook);
}

/// The complete set of capabilities needed to persist a keystore.
#[derive(Clone)]
pub struct Persistence {
    pub slot: Arc<dyn SlotStore>,
    pub kv: Arc<dyn KvStore>,
    pub suspend: Arc<dyn SuspendSignal>,
}

impl Persistence {
    pub fn new(
        slot: Arc<dyn SlotStore>,
        kv: Arc<dyn KvStore>,
        suspend: Arc<dyn SuspendSignal>,
    ) -> Self {
        Self { slot, kv, suspend }
    }

    /// Fresh in-memory host: a [`SharedSlot`], a [`MemoryKvStore`] and a [`SuspendTrigger`]
    pub fn in_memory() -> (Self, Arc<SuspendTrigger>) {
        let trigger = Arc::new(SuspendTrigger::new());
        let persistence = Self::new(
            Arc::new(SharedSlot::new()),
            Arc::new(MemoryKvStore::new()),
            trigger.clone(),
        );
        (persistence, trigger)
    }
}

impl fmt::Debug for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistence").finish_non_exhaustive()
    }
}

/// One string slot holding every named share as a JSON object.
///
/// Modelled on a browser's `window.name`: the whole slot is a single string,
/// shared by every store in the process, with a hard size limit. A slot whose
/// content is not a JSON object reads as empty.
#[derive(Debug)]
pub struct SharedSlot {
    raw: Mutex<String>,
    capacity: usize,
}

impl SharedSlot {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SLOT_CAPACITY)
    }

    /// Creates a slot holding at most `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            raw: Mutex::new(String::new()),
            capacity,
        }
    }

    /// The slot's entire raw content
    pub fn raw(&self) -> String {
        self.raw.lock().clone()
    }

    /// Overwrites the slot's raw content, bypassing the capacity check
    pub fn set_raw(&self, raw: impl Into<String>) {
        *self.raw.lock() = raw.into();
    }

    fn decode(raw: &str) -> BTreeMap<String, String> {
        if raw.is_empty() {
            return BTreeMap::new();
        }
        serde_json::from_str(raw).unwrap_or_default()
    }

    fn encode(entries: &BTreeMap<String, String>) -> Result<String> {
        if entries.is_empty() {
            return Ok(String::new());
        }
        serde_json::to_string(entries).map_err(KeystoreError::Serialization)
    }
}

impl Default for SharedSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotStore for SharedSlot {
    fn get(&self, name: &str) -> Option<String> {
        Self::decode(&self.raw.lock()).remove(name)
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        let mut raw = self.raw.lock();
        let mut entries = Self::decode(&raw);
        entries.insert(name.to_string(), value.to_string());

        let encoded = Self::encode(&entries)?;
        if encoded.len() > self.capacity {
            return Err(KeystoreError::SlotCapacityExceeded {
                needed: encoded.len(),
                capacity: self.capacity,
            });
        }
        *raw = encoded;
        Ok(())
    }

    fn remove(&self, name: &str) {
        let mut raw = self.raw.lock();
        let mut entries = Self::decode(&raw);
        if entries.remove(name).is_some() {
            // A shrinking object always re-encodes
            *raw = Self::encode(&entries).unwrap_or_default();
        }
    }
}

/// Session key/value store kept in memory
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

/// Suspend signal fired by hand.
///
/// [`fire`](Self::fire) runs every registered hook once, in registration order.
#[derive(Default)]
pub struct SuspendTrigger {
    hooks: Mutex<Vec<SuspendHook>>,
}

impl SuspendTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs and clears every registered hook, returning how many ran
    pub fn fire(&self) -> usize {
        let hooks = std::mem::take(&mut *self.hooks.lock());
        let count = hooks.len();
        for hook in hooks {
            hook();
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.hooks.lock().len()
    }
}

impl SuspendSignal for SuspendTrigger {
    fn on_suspend(&self, hook: SuspendHook) {
        self.hooks.lock().push(hook);
    }
}

impl fmt::Debug for SuspendTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendTrigger")
            .field("pending", &self.pending())
            .finish()
    }
}
