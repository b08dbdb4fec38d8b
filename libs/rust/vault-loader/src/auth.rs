//! Auth providers for the loader.

use async_trait::async_trait;
use reqwest::Client;
use rust_common::{HttpConfig, build_http_client};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{info, instrument};

use crate::{
    client::{NAMESPACE_HEADER, check_status},
    config::VaultConfig,
    error::{VaultError, VaultResult},
    provider::{AuthProvider, AuthToken},
    secrets::AuthResponse,
};

/// Hands out a fixed token with a fixed validity.
pub struct TokenAuthProvider {
    token: SecretString,
    ttl: Duration,
}

impl TokenAuthProvider {
    /// Provider for `token`, valid for `ttl`.
    #[must_use]
    pub fn new(token: impl Into<String>, ttl: Duration) -> Self {
        Self {
            token: SecretString::from(token.into()),
            ttl,
        }
    }

    /// Provider reading the token from `VAULT_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationFailed` if the variable is unset or empty.
    pub fn from_env(ttl: Duration) -> VaultResult<Self> {
        match std::env::var("VAULT_TOKEN") {
            Ok(token) if !token.is_empty() => Ok(Self::new(token, ttl)),
            _ => Err(VaultError::auth_failed("VAULT_TOKEN is not set")),
        }
    }
}

#[async_trait]
impl AuthProvider for TokenAuthProvider {
    async fn token(&self) -> VaultResult<AuthToken> {
        Ok(AuthToken {
            token: self.token.clone(),
            ttl: self.ttl,
        })
    }
}

/// Logs in with the Kubernetes auth method using the pod's service account.
pub struct KubernetesAuthProvider {
    config: VaultConfig,
    http: Client,
}

impl KubernetesAuthProvider {
    /// Create a provider.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Http` if the HTTP client cannot be built.
    pub fn new(config: VaultConfig) -> VaultResult<Self> {
        let http = build_http_client(&HttpConfig::default().with_timeout(config.timeout))?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl AuthProvider for KubernetesAuthProvider {
    #[instrument(skip(self), fields(role = %self.config.role, mount = %self.config.auth_mount))]
    async fn token(&self) -> VaultResult<AuthToken> {
        let jwt = tokio::fs::read_to_string(&self.config.token_path)
            .await
            .map(SecretString::from)
            .map_err(|e| {
                VaultError::auth_failed(format!(
                    "reading service account token {}: {e}",
                    self.config.token_path
                ))
            })?;

        let path = format!("auth/{}/login", self.config.auth_mount);
        let body = serde_json::json!({
            "role": self.config.role,
            "jwt": jwt.expose_secret().trim(),
        });

        let mut request = self.http.post(self.config.api_url(&path)).json(&body);
        if let Some(namespace) = &self.config.namespace {
            request = request.header(NAMESPACE_HEADER, namespace);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VaultError::unavailable(e.to_string()))?;

        let response = match check_status(response, &path).await {
            Err(VaultError::PermissionDenied(_) | VaultError::SecretNotFound(_)) => {
                return Err(VaultError::auth_failed(format!(
                    "login rejected for role {}",
                    self.config.role
                )));
            }
            other => other?,
        };

        let auth: AuthResponse = serde_json::from_slice(&response.bytes().await?)?;
        let ttl = Duration::from_secs(auth.auth.lease_duration);

        info!(ttl_secs = ttl.as_secs(), "Authenticated with Vault");
        Ok(AuthToken {
            token: SecretString::from(auth.auth.client_token),
            ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        let provider = TokenAuthProvider::new("s.root", Duration::from_secs(600));
        let token = provider.token().await.unwrap();
        assert_eq!(token.token.expose_secret(), "s.root");
        assert_eq!(token.ttl, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_missing_service_account_token() {
        let config = VaultConfig::new("http://127.0.0.1:8200")
            .unwrap()
            .with_token_path("/nonexistent/serviceaccount/token");
        let provider = KubernetesAuthProvider::new(config).unwrap();

        let err = provider.token().await.unwrap_err();
        assert!(matches!(err, VaultError::AuthenticationFailed(_)));
    }
}
