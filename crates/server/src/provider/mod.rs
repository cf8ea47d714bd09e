//! External OAuth2 identity providers.
//!
//! Every provider offers the same three capabilities:
//!
//! - build the authorization URL the browser is sent to
//! - exchange the authorization code for a provider token
//! - fetch the user's identity with that token
//!
//! Providers are addressed by name through a [`ProviderRegistry`] built once at
//! startup, so adding a provider never touches the session flows.

pub mod google;

use crate::config::{ConfigError, ProvidersConfig};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

pub use google::GoogleProvider;

/// Token returned by a provider's token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Normalised identity reported by a provider.
///
/// Only `email` is relied upon downstream; it is guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub external_id: String,
    pub email: String,
    pub name: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Name used in routes, e.g. `google`.
    fn name(&self) -> &str;

    /// Authorization URL carrying `state` back to the callback untouched.
    fn authorization_url(&self, state: &str) -> Url;

    async fn exchange_code(&self, code: &str) -> Result<ProviderToken, ProviderError>;

    async fn fetch_identity(&self, token: &ProviderToken)
    -> Result<ExternalIdentity, ProviderError>;
}

/// Name-to-provider mapping.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    /// Build a registry holding every provider present in `config`.
    ///
    /// Callback URLs are derived from `base_url` as `{base_url}/api/oauth/{name}/callback`.
    pub fn from_config(
        config: &ProvidersConfig,
        base_url: &Url,
        http: reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let mut registry = Self::default();
        if let Some(google) = &config.google {
            let redirect_uri = callback_url(base_url, google::NAME);
            let provider = GoogleProvider::new(google, redirect_uri, http).map_err(|e| {
                ConfigError::Validation(format!("providers.google.auth_url is invalid: {e}"))
            })?;
            registry = registry.with_provider(Arc::new(provider));
            tracing::info!(provider = google::NAME, "Registered identity provider");
        }
        Ok(registry)
    }

    pub fn with_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn IdentityProvider>, ProviderError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }
}

/// Callback URL registered with provider `name`.
pub fn callback_url(base_url: &Url, name: &str) -> Url {
    let mut url = base_url.clone();
    url.set_path(&format!(
        "{}/api/oauth/{name}/callback",
        base_url.path().trim_end_matches('/')
    ));
    url
}
