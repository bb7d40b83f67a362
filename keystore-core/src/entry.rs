use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use zeroize::Zeroizing;

/// Absolute instant in milliseconds since the Unix epoch
///
/// Always written as an integer. Reading accepts any finite number: fractions
/// are floored and instants before the epoch clamp to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from milliseconds since the Unix epoch
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the number of milliseconds since the Unix epoch
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns this timestamp shifted forward by `delta`, saturating
    pub fn saturating_add(self, delta: Duration) -> Self {
        let millis = u64::try_from(delta.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// Returns this timestamp shifted back by `delta`, saturating at the epoch
    pub fn saturating_sub(self, delta: Duration) -> Self {
        let millis = u64::try_from(delta.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_sub(millis))
    }

    /// Time remaining from `now` until this instant, or `None` if it is not in the future
    pub fn remaining_since(self, now: Timestamp) -> Option<Duration> {
        self.0
            .checked_sub(now.0)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

struct TimestampVisitor;

impl Visitor<'_> for TimestampVisitor {
    type Value = Timestamp;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a finite number of milliseconds since the Unix epoch")
    }

    fn visit_u64<E: de::Error>(self, millis: u64) -> Result<Timestamp, E> {
        Ok(Timestamp(millis))
    }

    fn visit_i64<E: de::Error>(self, millis: i64) -> Result<Timestamp, E> {
        Ok(Timestamp(u64::try_from(millis).unwrap_or(0)))
    }

    fn visit_f64<E: de::Error>(self, millis: f64) -> Result<Timestamp, E> {
        if !millis.is_finite() {
            return Err(E::invalid_value(Unexpected::Float(millis), &self));
        }
        // Float to int casts saturate: negatives become 0
        Ok(Timestamp(millis.floor() as u64))
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TimestampVisitor)
    }
}

impl From<u64> for Timestamp {
    fn from(millis: u64) -> Self {
        Self(millis)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        // Instants before the epoch clamp to it
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self(u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Represents a stored secret with its optional expiration time
#[derive(Debug, Clone)]
pub struct Entry {
    value: Zeroizing<String>,
    expires_at: Option<Timestamp>,
}

impl Entry {
    /// Creates a new entry; `None` means the entry never expires
    pub fn new(value: impl Into<String>, expires_at: Option<Timestamp>) -> Self {
        Self {
            value: Zeroizing::new(value.into()),
            expires_at,
        }
    }

    /// Returns the stored value as a string slice
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the expiration time, if any
    pub fn expires_at(&self) -> Option<Timestamp> {
        self.expires_at
    }

    /// Checks if this entry has expired at `now`
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
