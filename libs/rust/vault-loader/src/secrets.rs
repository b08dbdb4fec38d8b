//! Secret descriptors and Vault wire types.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::provider::Secret;

/// One path to fetch from the secret store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretDescriptor {
    /// Path of the secret, e.g. `secret/data/payments`
    pub key: String,
    /// Prefix prepended to every key of the payload
    pub keys_prefix: Option<String>,
}

impl SecretDescriptor {
    /// Descriptor for `key` without a prefix.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            keys_prefix: None,
        }
    }

    /// Prefix every key read from this secret.
    #[must_use]
    pub fn with_keys_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.keys_prefix = Some(prefix.into());
        self
    }

    /// Name under which a payload key is merged.
    #[must_use]
    pub fn config_key(&self, key: &str) -> String {
        match &self.keys_prefix {
            Some(prefix) => format!("{prefix}{key}"),
            None => key.to_string(),
        }
    }
}

impl From<&str> for SecretDescriptor {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Logical read response.
#[derive(Debug, Deserialize)]
pub struct SecretResponse {
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default)]
    pub lease_id: String,
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
}

impl SecretResponse {
    /// Convert into a [`Secret`], unwrapping KV v2 envelopes.
    ///
    /// KV v2 nests the payload under `data.data` next to `data.metadata`.
    #[must_use]
    pub fn into_secret(self) -> Secret {
        let mut data = self.data.unwrap_or_default();

        if is_kv2_envelope(&data) {
            if let Some(Value::Object(inner)) = data.remove("data") {
                data = inner;
            }
        }

        Secret {
            data,
            lease_duration: Duration::from_secs(self.lease_duration),
            lease_id: (!self.lease_id.is_empty()).then_some(self.lease_id),
            renewable: self.renewable,
        }
    }
}

// A KV v1 secret may legitimately hold keys named `data` and `metadata`;
// only a versioned metadata object marks a KV v2 envelope.
fn is_kv2_envelope(data: &Map<String, Value>) -> bool {
    data.len() == 2
        && data.get("data").is_some_and(Value::is_object)
        && data
            .get("metadata")
            .and_then(Value::as_object)
            .is_some_and(|metadata| metadata.contains_key("version"))
}

/// Vault auth response
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub auth: AuthData,
}

#[derive(Debug, Deserialize)]
pub struct AuthData {
    pub client_token: String,
    #[serde(default)]
    pub policies: Vec<String>,
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
}
