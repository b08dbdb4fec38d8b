//! Capabilities the loader is built against.
//!
//! The loader never talks to Vault directly: it asks an [`AuthProvider`] for
//! a token, hands it to a [`SecretStore`], and writes what it reads into a
//! [`ConfigSink`]. Production code plugs in [`crate::VaultClient`] and the
//! providers from [`crate::auth`]; tests plug in scripted doubles.

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::VaultResult;

/// A bearer token and how long it stays valid.
#[derive(Clone)]
pub struct AuthToken {
    /// Token presented to the secret store
    pub token: SecretString,
    /// Validity of the token
    pub ttl: Duration,
}

impl AuthToken {
    /// Create a token.
    #[must_use]
    pub fn new(token: impl Into<String>, ttl: Duration) -> Self {
        Self {
            token: SecretString::from(token.into()),
            ttl,
        }
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Produces credentials for the secret store.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Obtain a fresh token.
    async fn token(&self) -> VaultResult<AuthToken>;
}

/// A secret payload as returned by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Secret {
    /// Key/value payload
    pub data: Map<String, Value>,
    /// Lease on this secret (zero when the store reports none)
    pub lease_duration: Duration,
    /// Lease ID for renewable secrets
    pub lease_id: Option<String>,
    /// Whether the lease is renewable
    pub renewable: bool,
}

impl Secret {
    /// Secret with the given payload and lease.
    #[must_use]
    pub const fn new(data: Map<String, Value>, lease_duration: Duration) -> Self {
        Self {
            data,
            lease_duration,
            lease_id: None,
            renewable: false,
        }
    }
}

/// Reads secrets from a remote store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Use `token` for subsequent reads.
    async fn set_token(&self, token: SecretString);

    /// Read the secret at `path`.
    async fn read(&self, path: &str) -> VaultResult<Secret>;
}

/// Receives merged configuration values. Later writes overwrite earlier ones.
pub trait ConfigSink: Send {
    /// Store `value` under `key`.
    fn set(&mut self, key: String, value: Value);
}

/// Sink shared between a host and the poll watcher.
pub type SharedSink = Arc<Mutex<dyn ConfigSink>>;

impl ConfigSink for HashMap<String, Value> {
    fn set(&mut self, key: String, value: Value) {
        self.insert(key, value);
    }
}

impl ConfigSink for BTreeMap<String, Value> {
    fn set(&mut self, key: String, value: Value) {
        self.insert(key, value);
    }
}

/// Ordered configuration values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values(BTreeMap<String, Value>);

impl Values {
    /// Empty value set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a string value.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no key is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over keys and values in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Wrap into a [`SharedSink`]-compatible handle.
    #[must_use]
    pub fn shared(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }
}

impl ConfigSink for Values {
    fn set(&mut self, key: String, value: Value) {
        self.0.insert(key, value);
    }
}

impl From<Values> for BTreeMap<String, Value> {
    fn from(values: Values) -> Self {
        values.0
    }
}
