//! Vault HTTP client implementing [`SecretStore`].

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use rust_common::{HttpConfig, build_http_client};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::{
    config::VaultConfig,
    error::{VaultError, VaultResult},
    provider::{Secret, SecretStore},
    secrets::SecretResponse,
};

const TOKEN_HEADER: &str = "X-Vault-Token";
pub(crate) const NAMESPACE_HEADER: &str = "X-Vault-Namespace";

/// Reads secrets over the Vault HTTP API.
pub struct VaultClient {
    config: VaultConfig,
    http: Client,
    token: RwLock<Option<SecretString>>,
}

impl VaultClient {
    /// Create a new Vault client.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Http` if the HTTP client cannot be built.
    pub fn new(config: VaultConfig) -> VaultResult<Self> {
        let http = build_http_client(&HttpConfig::default().with_timeout(config.timeout))?;
        Ok(Self::with_http_client(config, http))
    }

    /// Create a client reusing an existing reqwest client.
    #[must_use]
    pub fn with_http_client(config: VaultConfig, http: Client) -> Self {
        Self {
            config,
            http,
            token: RwLock::new(None),
        }
    }

    /// Client configuration.
    #[must_use]
    pub const fn config(&self) -> &VaultConfig {
        &self.config
    }

    fn with_namespace(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.namespace {
            Some(namespace) => request.header(NAMESPACE_HEADER, namespace),
            None => request,
        }
    }
}

#[async_trait]
impl SecretStore for VaultClient {
    async fn set_token(&self, token: SecretString) {
        *self.token.write().await = Some(token);
    }

    #[instrument(skip(self))]
    async fn read(&self, path: &str) -> VaultResult<Secret> {
        let token = self
            .token
            .read()
            .await
            .clone()
            .ok_or_else(|| VaultError::auth_failed("no token set on client"))?;

        let request = self
            .http
            .get(self.config.api_url(path))
            .header(TOKEN_HEADER, token.expose_secret());

        let response = self
            .with_namespace(request)
            .send()
            .await
            .map_err(|e| VaultError::unavailable(e.to_string()))?;

        let response = check_status(response, path).await?;
        let body: SecretResponse = serde_json::from_slice(&response.bytes().await?)?;
        let secret = body.into_secret();

        debug!(keys = secret.data.len(), lease_secs = secret.lease_duration.as_secs(), "Secret read");
        Ok(secret)
    }
}

/// Map Vault status codes to errors.
pub(crate) async fn check_status(response: Response, path: &str) -> VaultResult<Response> {
    let status = response.status();
    match status.as_u16() {
        _ if status.is_success() => Ok(response),
        404 => Err(VaultError::not_found(path)),
        403 => Err(VaultError::PermissionDenied(path.to_string())),
        429 => Err(VaultError::RateLimited),
        _ => {
            let text = response.text().await.unwrap_or_default();
            Err(VaultError::unavailable(format!("Status {status}: {text}")))
        }
    }
}
