/// Default logical store name
pub const DEFAULT_NAME: &str = "default";

/// Default namespace prefixed to every storage key
pub const DEFAULT_NAMESPACE: &str = "session-keystore";

/// What happens to the persisted shares once they have been read back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SharePolicy {
    /// Remove both shares as soon as they are read (single restore)
    #[default]
    Consume,
    /// Leave both shares in place until the next save overwrites them
    Retain,
}

/// Configuration for a keystore
///
/// # Example
///
/// ```rust
/// use keystore_core::{KeystoreConfig, SharePolicy};
///
/// let config = KeystoreConfig::default()
///     .with_name("auth")
///     .with_share_policy(SharePolicy::Retain);
/// assert_eq!(config.storage_key(), "session-keystore:auth");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeystoreConfig {
    /// Logical name of the store (default: `"default"`)
    pub name: String,
    /// Namespace of the storage key (default: `"session-keystore"`)
    pub namespace: String,
    /// Share retention after a restore (default: [`SharePolicy::Consume`])
    pub share_policy: SharePolicy,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            share_policy: SharePolicy::default(),
        }
    }
}

impl KeystoreConfig {
    /// Creates a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the logical name; an empty name keeps the default
    ///
    /// Stores with different names persist to disjoint storage keys.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = if name.is_empty() {
            DEFAULT_NAME.to_string()
        } else {
            name
        };
        self
    }

    /// Sets the storage key namespace; an empty namespace keeps the default
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.namespace = if namespace.is_empty() {
            DEFAULT_NAMESPACE.to_string()
        } else {
            namespace
        };
        self
    }

    /// Sets the share retention policy
    pub fn with_share_policy(mut self, policy: SharePolicy) -> Self {
        self.share_policy = policy;
        self
    }

    /// The key both shares are stored under: `"<namespace>:<name>"`
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }

    /// Create configuration from environment variables.
    ///
    /// Reads:
    /// - `SESSION_KEYSTORE_NAME` - Store name (defaults to `"default"`)
    /// - `SESSION_KEYSTORE_NAMESPACE` - Storage key namespace (defaults to `"session-keystore"`)
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(name) = std::env::var("SESSION_KEYSTORE_NAME") {
            config = config.with_name(name);
        }
        if let Ok(namespace) = std::env::var("SESSION_KEYSTORE_NAMESPACE") {
            config = config.with_namespace(namespace);
        }
        config
    }
}
