use dashmap::DashMap;
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::clock::Clock;
use crate::entry::Timestamp;

/// What [`TimeoutScheduler::arm`] did with a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    /// No expiry was given; nothing is scheduled
    Unbounded,
    /// A timer will fire once the expiry is reached
    Scheduled,
    /// The expiry has already passed; the caller must expire the key now
    Elapsed,
    /// The expiry is in the future but no runtime is available to fire it
    Inactive,
}

struct TimerSlot {
    generation: u64,
    handle: AbortHandle,
}

/// Per-key expiry timers.
///
/// Holds at most one pending timer per key. Each timer is a task on the Tokio
/// runtime that sleeps until the expiry and then runs the callback handed to
/// [`arm`](Self::arm). Dropping the scheduler aborts every pending timer.
pub struct TimeoutScheduler<K: Hash + Eq> {
    timers: DashMap<K, TimerSlot>,
    generation: AtomicU64,
    clock: Arc<dyn Clock>,
    runtime: Option<Handle>,
}

impl<K> TimeoutScheduler<K>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    /// Creates a scheduler spawning timers on `runtime`.
    ///
    /// Without a runtime, future expiries are reported as
    /// [`ArmOutcome::Inactive`] and nothing fires on its own.
    pub fn new(clock: Arc<dyn Clock>, runtime: Option<Handle>) -> Self {
        Self {
            timers: DashMap::new(),
            generation: AtomicU64::new(0),
            clock,
            runtime,
        }
    }

    /// Cancels any timer for `key` and schedules a new one for `expires_at`.
    ///
    /// `on_fire` receives the generation of the timer that fired, to be passed
    /// back to [`release`](Self::release).
    pub fn arm<F>(&self, key: &K, expires_at: Option<Timestamp>, on_fire: F) -> ArmOutcome
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.disarm(key);

        let Some(expires_at) = expires_at else {
            return ArmOutcome::Unbounded;
        };
        let Some(delay) = expires_at.remaining_since(self.clock.now()) else {
            return ArmOutcome::Elapsed;
        };
        let Some(runtime) = &self.runtime else {
            return ArmOutcome::Inactive;
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(generation);
        });
        self.timers.insert(
            key.clone(),
            TimerSlot {
                generation,
                handle: task.abort_handle(),
            },
        );

        ArmOutcome::Scheduled
    }

    /// Cancels and forgets the timer for `key`, if any
    pub fn disarm<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if let Some((_, slot)) = self.timers.remove(key) {
            slot.handle.abort();
        }
    }

    /// Forgets the slot of a timer that has fired, unless it was re-armed since
    pub fn release(&self, key: &K, generation: u64) {
        self.timers.remove_if(key, |_, slot| slot.generation == generation);
    }

    /// Whether timers can fire on their own
    pub fn is_active(&self) -> bool {
        self.runtime.is_some()
    }
}

impl<K: Hash + Eq> Drop for TimeoutScheduler<K> {
    fn drop(&mut self) {
        for slot in self.timers.iter() {
            slot.handle.abort();
        }
    }
}
