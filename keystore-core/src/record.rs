//! Versioned wire shape of a persisted entry.
//!
//! Two shapes exist in stored data:
//!
//! - v0: `{ "key": "<secret>", "expiresAt"?: <ms> }` (the secret lives under `key`)
//! - v1: `{ "v": 1, "value": "<secret>", "expiresAt"?: <ms> }`
//!
//! Both are read; only v1 is ever written.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use zeroize::Zeroizing;

use crate::entry::{Entry, Timestamp};
use crate::error::{KeystoreError, Result};

/// Version number written into every record
pub const CURRENT_VERSION: u64 = 1;

#[derive(Deserialize)]
struct LegacyShape {
    key: String,
    #[serde(rename = "expiresAt", default)]
    expires_at: Option<Timestamp>,
}

#[derive(Deserialize)]
struct CurrentShape {
    value: String,
    #[serde(rename = "expiresAt", default)]
    expires_at: Option<Timestamp>,
}

/// One persisted entry, in whichever version it was read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistedRecord {
    V0 {
        key: Zeroizing<String>,
        expires_at: Option<Timestamp>,
    },
    V1 {
        value: Zeroizing<String>,
        expires_at: Option<Timestamp>,
    },
}

impl PersistedRecord {
    /// Current-version record for a live entry
    pub fn from_entry(entry: &Entry) -> Self {
        PersistedRecord::V1 {
            value: Zeroizing::new(entry.value().to_owned()),
            expires_at: entry.expires_at(),
        }
    }

    /// Detects the version of a decoded JSON record
    pub fn parse(raw: Value) -> Result<Self> {
        let version = match &raw {
            Value::Object(fields) => fields.get("v").cloned(),
            other => {
                return Err(KeystoreError::UnknownRecordVersion(format!(
                    "expected an object, found {}",
                    json_type(other)
                )))
            }
        };

        match version {
            None => {
                let shape: LegacyShape = serde_json::from_value(raw)
                    .map_err(|e| KeystoreError::UnknownRecordVersion(format!("v0: {}", e)))?;
                if shape.key.is_empty() {
                    return Err(KeystoreError::UnknownRecordVersion(
                        "v0: empty key".to_string(),
                    ));
                }
                Ok(PersistedRecord::V0 {
                    key: Zeroizing::new(shape.key),
                    expires_at: shape.expires_at,
                })
            }
            Some(v) if v.as_u64() == Some(CURRENT_VERSION) => {
                let shape: CurrentShape = serde_json::from_value(raw)
                    .map_err(|e| KeystoreError::UnknownRecordVersion(format!("v1: {}", e)))?;
                Ok(PersistedRecord::V1 {
                    value: Zeroizing::new(shape.value),
                    expires_at: shape.expires_at,
                })
            }
            Some(v) => Err(KeystoreError::UnknownRecordVersion(format!("v: {}", v))),
        }
    }

    /// Version this record was read as
    pub fn version(&self) -> u64 {
        match self {
            PersistedRecord::V0 { .. } => 0,
            PersistedRecord::V1 { .. } => CURRENT_VERSION,
        }
    }

    /// Losslessly converts to the current version
    pub fn upgrade(self) -> Self {
        match self {
            PersistedRecord::V0 { key, expires_at } => PersistedRecord::V1 {
                value: key,
                expires_at,
            },
            current => current,
        }
    }

    pub fn into_entry(self) -> Entry {
        Entry::new(self.secret(), self.expires_at())
    }

    fn secret(&self) -> &str {
        match self {
            PersistedRecord::V0 { key, .. } => key,
            PersistedRecord::V1 { value, .. } => value,
        }
    }

    fn expires_at(&self) -> Option<Timestamp> {
        match self {
            PersistedRecord::V0 { expires_at, .. } | PersistedRecord::V1 { expires_at, .. } => {
                *expires_at
            }
        }
    }
}

/// Always writes the v1 shape, whatever version was read.
impl Serialize for PersistedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let expires_at = self.expires_at();
        let fields = if expires_at.is_some() { 3 } else { 2 };
        let mut record = serializer.serialize_struct("PersistedRecord", fields)?;
        record.serialize_field("v", &CURRENT_VERSION)?;
        record.serialize_field("value", self.secret())?;
        if let Some(at) = expires_at {
            record.serialize_field("expiresAt", &at)?;
        }
        record.end()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
