//! Vault configuration loader.
//!
//! Fetches a list of secrets from HashiCorp Vault, merges their key/value
//! payloads into configuration values, and keeps them fresh by re-fetching
//! at three quarters of the shortest token or secret lease.
//!
//! A zero lease means "refresh immediately". KV v2 reads report a zero lease,
//! so a renewing loader should include at least one leased secret (dynamic
//! credentials, KV v1 with a TTL) or use a [`SecretStore`] wrapper that
//! reports a floor lease. Otherwise the watcher re-fetches back-to-back.
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use vault_loader::{
//!     Loader, LoaderConfig, TokenAuthProvider, Values, VaultClient, VaultConfig,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! rust_common::init_tracing(&rust_common::TracingConfig::default().with_service_name("payments"));
//!
//! let client = VaultClient::new(VaultConfig::from_env()?)?;
//! let values = Values::new().shared();
//!
//! let loader = Loader::new(
//!     LoaderConfig::new()
//!         .with_client(Arc::new(client))
//!         .with_auth_provider(Arc::new(TokenAuthProvider::from_env(Duration::from_secs(3600))?))
//!         .with_secret("database/creds/payments")
//!         .with_renewal(values.clone()),
//! );
//!
//! // Initial load; the poll watcher takes over from here.
//! loader.refresh_shared(&values).await?;
//! let api_key = values.lock().await.get_str("password").map(str::to_owned);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod lease;
pub mod loader;
pub mod provider;
pub mod secrets;
pub mod watcher;

pub use auth::{KubernetesAuthProvider, TokenAuthProvider};
pub use client::VaultClient;
pub use config::{LoaderConfig, VaultConfig};
pub use error::{ConfigError, VaultError, VaultResult};
pub use loader::Loader;
pub use provider::{AuthProvider, AuthToken, ConfigSink, Secret, SecretStore, SharedSink, Values};
pub use secrets::SecretDescriptor;
pub use watcher::{PollWatcher, WatcherState};
