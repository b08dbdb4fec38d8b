//! Scripted auth provider and secret store doubles.

#![allow(dead_code)]

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use vault_loader::{AuthProvider, AuthToken, Secret, SecretStore, VaultError, VaultResult};

pub const HOUR: Duration = Duration::from_secs(3600);

/// Auth provider returning a fixed token, or failing on demand.
pub struct ScriptedAuth {
    ttl: Duration,
    failing: AtomicBool,
    fail_next: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedAuth {
    pub fn ok(ttl: Duration) -> Self {
        Self {
            ttl,
            failing: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        let auth = Self::ok(HOUR);
        auth.set_failing(true);
        auth
    }

    /// Fail the next `n` calls, then succeed.
    pub fn failing_times(n: usize, ttl: Duration) -> Self {
        let auth = Self::ok(ttl);
        auth.fail_next.store(n, Ordering::SeqCst);
        auth
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthProvider for ScriptedAuth {
    async fn token(&self) -> VaultResult<AuthToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let scripted_failure = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if scripted_failure || self.failing.load(Ordering::SeqCst) {
            return Err(VaultError::auth_failed("permission denied"));
        }
        Ok(AuthToken::new("DUMMYTOKEN", self.ttl))
    }
}

/// In-memory secret store recording every call it receives.
#[derive(Default)]
pub struct ScriptedStore {
    secrets: Mutex<HashMap<String, Secret>>,
    failing_paths: Mutex<HashSet<String>>,
    failing: AtomicBool,
    read_delay: Mutex<Duration>,
    reads: Mutex<Vec<String>>,
    tokens: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, path: &str, data: Value, lease: Duration) -> Self {
        self.put(path, data, lease);
        self
    }

    pub fn with_read_delay(self, delay: Duration) -> Self {
        *self.read_delay.lock().unwrap() = delay;
        self
    }

    pub fn put(&self, path: &str, data: Value, lease: Duration) {
        let data = match data {
            Value::Object(map) => map,
            other => panic!("secret payload must be an object, got {other}"),
        };
        self.secrets
            .lock()
            .unwrap()
            .insert(path.to_string(), Secret::new(data, lease));
    }

    pub fn fail_path(&self, path: &str) {
        self.failing_paths.lock().unwrap().insert(path.to_string());
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().unwrap().clone()
    }

    pub fn read_count(&self) -> usize {
        self.reads.lock().unwrap().len()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for ScriptedStore {
    async fn set_token(&self, token: SecretString) {
        self.tokens
            .lock()
            .unwrap()
            .push(token.expose_secret().to_string());
    }

    async fn read(&self, path: &str) -> VaultResult<Secret> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.reads.lock().unwrap().push(path.to_string());

        let delay = *self.read_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) || self.failing_paths.lock().unwrap().contains(path) {
            return Err(VaultError::unavailable(format!("read {path} failed")));
        }

        self.secrets
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| VaultError::not_found(path))
    }
}

/// Build a payload map from `(key, value)` pairs.
pub fn payload(pairs: &[(&str, Value)]) -> Value {
    let map: Map<String, Value> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect();
    Value::Object(map)
}
