//! # Keystore Core
//!
//! An in-memory keystore for short-lived secrets such as session tokens.
//!
//! ## Features
//!
//! - Per-entry absolute expiry, enforced by Tokio timers and on every read
//! - Lifecycle events (`created`, `updated`, `read`, `deleted`, `expired`)
//! - Optional persistence across suspend: the table is split into two XOR
//!   shares kept in two different host storage locations, so neither holds
//!   the plaintext
//! - Transparent upgrade of records saved by older versions
//!
//! ## Example
//!
//! ```rust,no_run
//! use keystore_core::{EventKind, Keystore, Persistence};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (persistence, suspend) = Persistence::in_memory();
//!
//!     let store = Keystore::builder()
//!         .name("auth")
//!         .persistence(persistence)
//!         .on_expired(|event| println!("{} expired", event.name))
//!         .build();
//!
//!     store.on(EventKind::Created, |event| println!("{} created", event.name));
//!
//!     // Store a token for 15 minutes
//!     store.set_with_ttl("access_token", "eyJhbGciOi...", Duration::from_secs(900));
//!
//!     if let Some(token) = store.get("access_token") {
//!         println!("token: {}", token);
//!     }
//!
//!     // The host is about to unload: both shares are written
//!     suspend.fire();
//! }
//! ```

mod backend;
mod clock;
pub mod codec;
mod config;
mod entry;
mod error;
mod events;
mod gateway;
mod random;
mod record;
mod scheduler;
mod store;
mod table;

pub use backend::{
    KvStore, MemoryKvStore, Persistence, SharedSlot, SlotStore, SuspendHook, SuspendSignal,
    SuspendTrigger, DEFAULT_SLOT_CAPACITY,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{KeystoreConfig, SharePolicy, DEFAULT_NAME, DEFAULT_NAMESPACE};
pub use entry::{Entry, Timestamp};
pub use error::{KeystoreError, Result};
pub use events::{EventBus, EventKind, Handler, KeyEvent, Subscription};
pub use gateway::PersistenceGateway;
pub use random::{OsRandom, RandomSource};
pub use record::{PersistedRecord, CURRENT_VERSION};
pub use scheduler::{ArmOutcome, TimeoutScheduler};
pub use store::{Keystore, KeystoreBuilder, StoreKey};
pub use table::ExpiringEntryTable;
