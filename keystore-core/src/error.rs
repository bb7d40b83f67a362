//! Error types for the keystore.

use thiserror::Error;

/// Errors that can surface from persistence operations.
///
/// Operations on the live table (`set`, `get`, `delete`, `clear`) never fail.
#[derive(Error, Debug)]
pub enum KeystoreError {
    /// Persistence was requested but the host provided no slot store,
    /// key/value store or suspend signal
    #[error("Persistence is not available in this environment")]
    UnsupportedEnvironment,

    /// Stored shares could not be recombined or decoded
    #[error("Corrupted persisted data: {0}")]
    Corrupted(String),

    /// A persisted record matched neither the v0 nor the v1 shape
    #[error("Unknown record version: {0}")]
    UnknownRecordVersion(String),

    /// JSON serialization error while writing the table
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    /// The capacity-constrained slot cannot hold the share
    #[error("Slot capacity exceeded: {needed} bytes needed, {capacity} bytes available")]
    SlotCapacityExceeded {
        /// Size the slot would have after the write, in bytes
        needed: usize,
        /// Maximum size of the slot, in bytes
        capacity: usize,
    },

    /// A storage backend rejected the operation
    #[error("Backend error: {0}")]
    Backend(String),
}

impl KeystoreError {
    /// Returns `true` if persistence is unavailable in this environment.
    pub fn is_unsupported_environment(&self) -> bool {
        matches!(self, KeystoreError::UnsupportedEnvironment)
    }

    /// Returns `true` if the error comes from damaged persisted data.
    pub fn is_corrupted(&self) -> bool {
        matches!(
            self,
            KeystoreError::Corrupted(_) | KeystoreError::UnknownRecordVersion(_)
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KeystoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(KeystoreError::UnsupportedEnvironment.is_unsupported_environment());
        assert!(!KeystoreError::UnsupportedEnvironment.is_corrupted());
        assert!(KeystoreError::Corrupted("length mismatch".into()).is_corrupted());
        assert!(KeystoreError::UnknownRecordVersion("v: 7".into()).is_corrupted());
    }

    #[test]
    fn test_capacity_message() {
        let err = KeystoreError::SlotCapacityExceeded {
            needed: 300,
            capacity: 256,
        };
        assert_eq!(
            err.to_string(),
            "Slot capacity exceeded: 300 bytes needed, 256 bytes available"
        );
    }
}
