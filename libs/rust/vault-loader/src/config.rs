//! Loader and Vault client configuration.

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;
use crate::provider::{AuthProvider, SecretStore, SharedSink};
use crate::secrets::SecretDescriptor;

/// Default number of retries of a failed background refresh.
pub const DEFAULT_MAX_RETRY: u32 = 3;
/// Default delay between retries.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Default wait before the first background cycle when no interval is known.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(30);

/// Construction parameters of a [`crate::Loader`].
#[derive(Clone)]
pub struct LoaderConfig {
    /// Secret store client
    pub client: Option<Arc<dyn SecretStore>>,
    /// Secrets to fetch, in merge order
    pub secrets: Vec<SecretDescriptor>,
    /// Credential source
    pub auth_provider: Option<Arc<dyn AuthProvider>>,
    /// Start a poll watcher at construction
    pub renew: bool,
    /// Sink the poll watcher merges into
    pub sink: Option<SharedSink>,
    /// Retries of a failed background refresh
    pub max_retry: u32,
    /// Delay between retries
    pub retry_delay: Duration,
    /// Stop the poll watcher once retries are exhausted
    pub stop_on_failure: bool,
    /// Wait before the first background cycle if no interval is known yet
    pub initial_delay: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            client: None,
            secrets: Vec::new(),
            auth_provider: None,
            renew: false,
            sink: None,
            max_retry: DEFAULT_MAX_RETRY,
            retry_delay: DEFAULT_RETRY_DELAY,
            stop_on_failure: false,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }
}

impl fmt::Debug for LoaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderConfig")
            .field("client", &self.client.is_some())
            .field("secrets", &self.secrets)
            .field("auth_provider", &self.auth_provider.is_some())
            .field("renew", &self.renew)
            .field("sink", &self.sink.is_some())
            .field("max_retry", &self.max_retry)
            .field("retry_delay", &self.retry_delay)
            .field("stop_on_failure", &self.stop_on_failure)
            .field("initial_delay", &self.initial_delay)
            .finish()
    }
}

impl LoaderConfig {
    /// Empty configuration with default retry settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the secret store client.
    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn SecretStore>) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the auth provider.
    #[must_use]
    pub fn with_auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    /// Append a secret to fetch.
    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<SecretDescriptor>) -> Self {
        self.secrets.push(secret.into());
        self
    }

    /// Enable background renewal into `sink`.
    #[must_use]
    pub fn with_renewal(mut self, sink: SharedSink) -> Self {
        self.renew = true;
        self.sink = Some(sink);
        self
    }

    /// Set the retry count.
    #[must_use]
    pub const fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Set the retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Stop the poll watcher once retries are exhausted.
    #[must_use]
    pub const fn with_stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    /// Set the wait before the first background cycle.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Check the construction invariants.
    ///
    /// # Errors
    ///
    /// Reports the first missing piece: secrets, auth provider, client, then
    /// the renewal sink.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secrets.is_empty() {
            return Err(ConfigError::NoSecrets);
        }
        if self.auth_provider.is_none() {
            return Err(ConfigError::NoAuthProvider);
        }
        if self.client.is_none() {
            return Err(ConfigError::NoClient);
        }
        if self.renew && self.sink.is_none() {
            return Err(ConfigError::NoSink);
        }
        Ok(())
    }
}

/// Settings of the live Vault client and auth providers.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Vault server address
    pub addr: Url,
    /// Enterprise namespace sent as `X-Vault-Namespace`
    pub namespace: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Kubernetes auth role name
    pub role: String,
    /// Mount path of the Kubernetes auth method
    pub auth_mount: String,
    /// Service account token path
    pub token_path: String,
}

impl VaultConfig {
    /// Configuration for the server at `addr`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidUrl` if `addr` is not an absolute URL.
    pub fn new(addr: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            addr: parse_url("addr", addr)?,
            namespace: None,
            timeout: Duration::from_secs(30),
            role: String::new(),
            auth_mount: "kubernetes".to_string(),
            token_path: "/var/run/secrets/kubernetes.io/serviceaccount/token".to_string(),
        })
    }

    /// Load from `VAULT_ADDR`, `VAULT_NAMESPACE`, `VAULT_ROLE`,
    /// `VAULT_AUTH_MOUNT` and `VAULT_TOKEN_PATH`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidUrl` if `VAULT_ADDR` does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let addr = env::var("VAULT_ADDR").unwrap_or_else(|_| "https://127.0.0.1:8200".to_string());
        let mut config = Self::new(&addr).map_err(|e| match e {
            ConfigError::InvalidUrl { reason, .. } => ConfigError::InvalidUrl {
                field: "VAULT_ADDR".to_string(),
                reason,
            },
            other => other,
        })?;

        config.namespace = env::var("VAULT_NAMESPACE").ok().filter(|ns| !ns.is_empty());
        if let Ok(role) = env::var("VAULT_ROLE") {
            config.role = role;
        }
        if let Ok(mount) = env::var("VAULT_AUTH_MOUNT") {
            config.auth_mount = mount;
        }
        if let Ok(path) = env::var("VAULT_TOKEN_PATH") {
            config.token_path = path;
        }
        Ok(config)
    }

    /// Set the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the Kubernetes role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Set the Kubernetes auth mount.
    #[must_use]
    pub fn with_auth_mount(mut self, mount: impl Into<String>) -> Self {
        self.auth_mount = mount.into();
        self
    }

    /// Set the service account token path.
    #[must_use]
    pub fn with_token_path(mut self, path: impl Into<String>) -> Self {
        self.token_path = path.into();
        self
    }

    /// Absolute URL of the API path `path` (relative to `/v1/`).
    #[must_use]
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.addr.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn parse_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        field: field.to_string(),
        reason: e.to_string(),
    })
}
