//! Google as an OAuth2 identity provider.

use super::{ExternalIdentity, IdentityProvider, ProviderToken};
use crate::config::OAuthProviderConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

pub const NAME: &str = "google";

/// Subset of Google's OpenID userinfo response.
#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

pub struct GoogleProvider {
    client_id: String,
    client_secret: String,
    auth_url: Url,
    token_url: String,
    userinfo_url: String,
    scopes: Vec<String>,
    redirect_uri: Url,
    http: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(
        config: &OAuthProviderConfig,
        redirect_uri: Url,
        http: reqwest::Client,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            auth_url: Url::parse(&config.auth_url)?,
            token_url: config.token_url.clone(),
            userinfo_url: config.userinfo_url.clone(),
            scopes: config.scopes.clone(),
            redirect_uri,
            http,
        })
    }

    fn exchange_error(reason: impl ToString) -> ProviderError {
        ProviderError::Exchange {
            provider: NAME.to_string(),
            reason: reason.to_string(),
        }
    }

    fn identity_error(reason: impl ToString) -> ProviderError {
        ProviderError::IdentityFetch {
            provider: NAME.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Pass successful responses through; turn anything else into `status: body`.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, String> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(format!("status {status}: {body}"))
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("access_type", "offline");
        url
    }

    #[tracing::instrument(skip_all, fields(provider = NAME))]
    async fn exchange_code(&self, code: &str) -> Result<ProviderToken, ProviderError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Token endpoint unreachable");
                Self::exchange_error(e)
            })?;

        let response = Self::ensure_success(response).await.map_err(|reason| {
            tracing::warn!(reason = %reason, "Token endpoint rejected the code");
            Self::exchange_error(reason)
        })?;

        let token = response
            .json::<ProviderToken>()
            .await
            .map_err(Self::exchange_error)?;
        if token.access_token.is_empty() {
            return Err(Self::exchange_error("empty access token"));
        }

        tracing::debug!("Exchanged authorization code");
        Ok(token)
    }

    #[tracing::instrument(skip_all, fields(provider = NAME))]
    async fn fetch_identity(
        &self,
        token: &ProviderToken,
    ) -> Result<ExternalIdentity, ProviderError> {
        let response = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Userinfo endpoint unreachable");
                Self::identity_error(e)
            })?;

        let response = Self::ensure_success(response).await.map_err(|reason| {
            tracing::warn!(reason = %reason, "Userinfo request failed");
            Self::identity_error(reason)
        })?;

        let info = response
            .json::<UserInfo>()
            .await
            .map_err(Self::identity_error)?;

        let email = info
            .email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .ok_or_else(|| ProviderError::MissingEmail {
                provider: NAME.to_string(),
            })?;

        Ok(ExternalIdentity {
            external_id: info.sub,
            email: email.to_string(),
            name: info.name,
        })
    }
}
