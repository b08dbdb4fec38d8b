//! Vault configuration loader.
//!
//! A refresh cycle authenticates, reads every configured secret in order and
//! merges the payloads into a [`ConfigSink`]. It is all-or-nothing: values
//! are staged while reading and only written once every read succeeded, so a
//! failed cycle leaves both the sink and the refresh interval untouched.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::LoaderConfig,
    error::{ConfigError, VaultResult},
    lease,
    provider::{AuthProvider, AuthToken, ConfigSink, SecretStore},
    secrets::SecretDescriptor,
    watcher::{PollWatcher, WatchSettings},
};

/// Name reported by [`Loader::name`].
pub const LOADER_NAME: &str = "vault";

/// Loads secrets from Vault into configuration values.
pub struct Loader {
    inner: Arc<LoaderInner>,
    poll_watcher: Option<PollWatcher>,
}

pub(crate) struct LoaderInner {
    client: Arc<dyn SecretStore>,
    auth_provider: Arc<dyn AuthProvider>,
    secrets: Vec<SecretDescriptor>,
    max_retry: u32,
    retry_delay: Duration,
    stop_on_failure: bool,
    // Held for a whole cycle; foreground and background cycles never overlap.
    cycle: tokio::sync::Mutex<()>,
    // Last computed interval; the poll watcher re-arms its timer on change.
    interval: watch::Sender<Option<Duration>>,
    last_refresh: Mutex<Option<DateTime<Utc>>>,
}

/// Values read in one cycle, not yet visible to the sink.
struct Staged {
    values: Vec<(String, Value)>,
    ttl: Duration,
}

impl Loader {
    /// Build a loader, starting the poll watcher if renewal is enabled.
    ///
    /// # Panics
    ///
    /// Panics if the configuration has no secret, no auth provider or no
    /// client, or if renewal is enabled without a sink or outside a Tokio
    /// runtime. These are deployment mistakes, not runtime conditions; use
    /// [`Loader::try_new`] to handle them as values.
    #[must_use]
    pub fn new(config: LoaderConfig) -> Self {
        match Self::try_new(config) {
            Ok(loader) => loader,
            Err(e) => panic!("invalid vault loader configuration: {e}"),
        }
    }

    /// Build a loader, reporting configuration problems as errors.
    ///
    /// # Errors
    ///
    /// Returns the first violated construction invariant.
    pub fn try_new(config: LoaderConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let LoaderConfig {
            client,
            secrets,
            auth_provider,
            renew,
            sink,
            max_retry,
            retry_delay,
            stop_on_failure,
            initial_delay,
        } = config;

        let (Some(client), Some(auth_provider)) = (client, auth_provider) else {
            return Err(ConfigError::NoClient);
        };

        let runtime = if renew {
            Some(tokio::runtime::Handle::try_current().map_err(|_| ConfigError::NoRuntime)?)
        } else {
            None
        };

        let inner = Arc::new(LoaderInner {
            client,
            auth_provider,
            secrets,
            max_retry,
            retry_delay,
            stop_on_failure,
            cycle: tokio::sync::Mutex::new(()),
            interval: watch::channel(None).0,
            last_refresh: Mutex::new(None),
        });

        let poll_watcher = match (runtime, sink) {
            (Some(runtime), Some(sink)) => Some(PollWatcher::spawn(
                &runtime,
                Arc::clone(&inner),
                sink,
                WatchSettings::new(max_retry, retry_delay, stop_on_failure, initial_delay),
            )),
            _ => None,
        };

        Ok(Self {
            inner,
            poll_watcher,
        })
    }

    /// Run one refresh cycle, merging into `sink`.
    ///
    /// # Errors
    ///
    /// Returns the auth provider's or the store's error verbatim; nothing is
    /// written in that case.
    pub async fn refresh(&self, sink: &mut dyn ConfigSink) -> VaultResult<()> {
        self.inner.refresh(sink).await
    }

    /// Run one refresh cycle into a sink shared with other tasks.
    ///
    /// The sink is locked only to write the staged values.
    ///
    /// # Errors
    ///
    /// Same as [`Loader::refresh`].
    pub async fn refresh_shared<S>(&self, sink: &tokio::sync::Mutex<S>) -> VaultResult<()>
    where
        S: ConfigSink + ?Sized,
    {
        self.inner.refresh_shared(sink).await
    }

    /// Loader name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        LOADER_NAME
    }

    /// Interval until the next refresh, once a cycle has succeeded.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.inner.ttl()
    }

    /// Time of the last successful cycle.
    #[must_use]
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_refresh()
    }

    /// Configured retry count.
    #[must_use]
    pub fn max_retry(&self) -> u32 {
        self.inner.max_retry
    }

    /// Configured retry delay.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        self.inner.retry_delay
    }

    /// Whether the poll watcher stops after exhausting retries.
    #[must_use]
    pub fn stop_on_failure(&self) -> bool {
        self.inner.stop_on_failure
    }

    /// Configured secrets, in merge order.
    #[must_use]
    pub fn secrets(&self) -> &[SecretDescriptor] {
        &self.inner.secrets
    }

    /// Background watcher, present when renewal is enabled.
    #[must_use]
    pub const fn poll_watcher(&self) -> Option<&PollWatcher> {
        self.poll_watcher.as_ref()
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("secrets", &self.inner.secrets)
            .field("ttl", &self.ttl())
            .field("max_retry", &self.inner.max_retry)
            .field("retry_delay", &self.inner.retry_delay)
            .field("stop_on_failure", &self.inner.stop_on_failure)
            .field("renew", &self.poll_watcher.is_some())
            .finish_non_exhaustive()
    }
}

impl LoaderInner {
    fn last_refresh(&self) -> MutexGuard<'_, Option<DateTime<Utc>>> {
        self.last_refresh.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn ttl(&self) -> Option<Duration> {
        *self.interval.borrow()
    }

    /// Receiver notified whenever a cycle commits a new interval.
    pub(crate) fn subscribe_interval(&self) -> watch::Receiver<Option<Duration>> {
        self.interval.subscribe()
    }

    #[instrument(skip_all, fields(secrets = self.secrets.len()))]
    pub(crate) async fn refresh(&self, sink: &mut dyn ConfigSink) -> VaultResult<()> {
        let _cycle = self.cycle.lock().await;
        let staged = self.fetch().await?;
        self.commit(staged, sink);
        Ok(())
    }

    #[instrument(skip_all, fields(secrets = self.secrets.len()))]
    pub(crate) async fn refresh_shared<S>(&self, sink: &tokio::sync::Mutex<S>) -> VaultResult<()>
    where
        S: ConfigSink + ?Sized,
    {
        let _cycle = self.cycle.lock().await;
        let staged = self.fetch().await?;
        let mut sink = sink.lock().await;
        self.commit(staged, &mut *sink);
        Ok(())
    }

    async fn fetch(&self) -> VaultResult<Staged> {
        let AuthToken {
            token,
            ttl: token_lease,
        } = self
            .auth_provider
            .token()
            .await
            .inspect_err(|e| warn!(error = %e, "Failed to obtain Vault token"))?;

        self.client.set_token(token).await;

        let mut values = Vec::new();
        let mut secret_leases = Vec::with_capacity(self.secrets.len());

        for secret in &self.secrets {
            let fetched = self
                .client
                .read(&secret.key)
                .await
                .inspect_err(|e| warn!(path = %secret.key, error = %e, "Failed to read secret"))?;

            debug!(
                path = %secret.key,
                keys = fetched.data.len(),
                lease_secs = fetched.lease_duration.as_secs(),
                "Read secret"
            );

            secret_leases.push(fetched.lease_duration);
            values.extend(
                fetched
                    .data
                    .into_iter()
                    .map(|(key, value)| (secret.config_key(&key), value)),
            );
        }

        let min_secret_lease = lease::min_lease(secret_leases).unwrap_or(Duration::ZERO);

        Ok(Staged {
            values,
            ttl: lease::refresh_interval(token_lease, min_secret_lease),
        })
    }

    fn commit<S: ConfigSink + ?Sized>(&self, staged: Staged, sink: &mut S) {
        let keys = staged.values.len();
        for (key, value) in staged.values {
            sink.set(key, value);
        }

        *self.last_refresh() = Some(Utc::now());
        self.interval.send_replace(Some(staged.ttl));

        info!(keys, ttl_secs = staged.ttl.as_secs(), "Loaded secrets from Vault");
    }
}
