//! Login and refresh flows.
//!
//! A login attempt moves through [`LoginStage`]s in order; any failure stops it
//! and is reported together with the last stage reached. The refresh flow is a
//! single rotation followed by a new access token.

use crate::error::{ProviderError, SessionError};
use crate::identity::IdentityResolver;
use crate::provider::ProviderRegistry;
use crate::refresh::RefreshTokenStore;
use crate::token::AccessTokenCodec;
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

/// Progress of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoginStage {
    Started,
    CodeReceived,
    Exchanged,
    IdentityResolved,
    TokensIssued,
}

impl fmt::Display for LoginStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoginStage::Started => "started",
            LoginStage::CodeReceived => "code_received",
            LoginStage::Exchanged => "exchanged",
            LoginStage::IdentityResolved => "identity_resolved",
            LoginStage::TokensIssued => "tokens_issued",
        };
        f.write_str(name)
    }
}

/// Credential pair handed to a client after login or refresh.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub user_id: Uuid,
    pub access_token: String,
    /// Id of the refresh token record; this is the bearer value.
    pub refresh_token: Uuid,
    pub refresh_expires_at: OffsetDateTime,
}

#[derive(Debug, Error)]
#[error("login failed after {stage}: {reason}")]
pub struct LoginFailure {
    pub stage: LoginStage,
    pub reason: SessionError,
}

impl LoginFailure {
    fn at(stage: LoginStage, reason: impl Into<SessionError>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }

    /// Same as [`Self::at`], logging the failure on the way.
    fn logged(stage: LoginStage, reason: impl Into<SessionError>) -> Self {
        let failure = Self::at(stage, reason);
        match &failure.reason {
            SessionError::Provider(ProviderError::MissingEmail { .. })
            | SessionError::Provider(ProviderError::Exchange { .. })
            | SessionError::Provider(ProviderError::IdentityFetch { .. }) => {
                tracing::warn!(stage = %stage, error = %failure.reason, "Login failed at provider")
            }
            _ => tracing::error!(stage = %stage, error = %failure.reason, "Login failed"),
        }
        failure
    }
}

#[derive(Clone)]
pub struct SessionService {
    providers: ProviderRegistry,
    identities: IdentityResolver,
    codec: AccessTokenCodec,
    refresh_tokens: RefreshTokenStore,
    default_target: Url,
}

impl SessionService {
    /// `default_target` is where browsers land after login when the caller did not name a target.
    pub fn new(
        providers: ProviderRegistry,
        identities: IdentityResolver,
        codec: AccessTokenCodec,
        refresh_tokens: RefreshTokenStore,
        default_target: Url,
    ) -> Self {
        Self {
            providers,
            identities,
            codec,
            refresh_tokens,
            default_target,
        }
    }

    pub fn codec(&self) -> &AccessTokenCodec {
        &self.codec
    }

    pub fn identities(&self) -> &IdentityResolver {
        &self.identities
    }

    pub fn refresh_tokens(&self) -> &RefreshTokenStore {
        &self.refresh_tokens
    }

    pub fn has_provider(&self, provider: &str) -> bool {
        self.providers.contains(provider)
    }

    /// Authorization URL for `provider`.
    ///
    /// `target` is where the callback sends the browser afterwards; `frontend_redirect`
    /// is forwarded to that target as its `r` query parameter. Both travel as the
    /// opaque OAuth state.
    pub fn login_redirect(
        &self,
        provider: &str,
        target: Option<&str>,
        frontend_redirect: Option<&str>,
    ) -> Result<Url, SessionError> {
        let provider = self.providers.get(provider)?;

        let mut state = match target.filter(|t| !t.is_empty()) {
            Some(target) => target.to_string(),
            None => self.default_target.to_string(),
        };
        if let Some(redirect) = frontend_redirect.filter(|r| !r.is_empty()) {
            let separator = if state.contains('?') { '&' } else { '?' };
            state.push(separator);
            state.push_str("r=");
            state.push_str(redirect);
        }

        tracing::debug!(provider = provider.name(), state = %state, "Starting login");
        Ok(provider.authorization_url(&state))
    }

    /// Where the callback for `state` should send the browser.
    pub fn callback_target(&self, state: Option<&str>) -> String {
        match state.map(str::trim).filter(|s| !s.is_empty()) {
            Some(state) => state.to_string(),
            None => self.default_target.to_string(),
        }
    }

    /// Drive a login attempt from the provider callback to issued credentials.
    #[tracing::instrument(skip(self, code), fields(has_code = code.is_some()))]
    pub async fn complete_login(
        &self,
        provider: &str,
        code: Option<&str>,
        provider_error: Option<&str>,
    ) -> Result<IssuedTokens, LoginFailure> {
        let mut stage = LoginStage::Started;

        let provider = self
            .providers
            .get(provider)
            .map_err(|e| LoginFailure::at(stage, e))?;

        if let Some(error) = provider_error.filter(|e| !e.is_empty()) {
            tracing::warn!(provider = provider.name(), error = error, "Provider reported an error");
            return Err(LoginFailure::at(
                stage,
                SessionError::ProviderDenied(error.to_string()),
            ));
        }
        let Some(code) = code.filter(|c| !c.is_empty()) else {
            tracing::warn!(provider = provider.name(), "Callback without authorization code");
            return Err(LoginFailure::at(stage, SessionError::MissingCode));
        };
        stage = LoginStage::CodeReceived;

        let provider_token = provider
            .exchange_code(code)
            .await
            .map_err(|e| LoginFailure::logged(stage, e))?;
        stage = LoginStage::Exchanged;

        let identity = provider
            .fetch_identity(&provider_token)
            .await
            .map_err(|e| LoginFailure::logged(stage, e))?;
        let user = self
            .identities
            .resolve_or_create(&identity.email)
            .await
            .map_err(|e| LoginFailure::logged(stage, e))?;
        stage = LoginStage::IdentityResolved;

        let tokens = self
            .issue_pair(user.id, &user.email)
            .await
            .map_err(|e| LoginFailure::logged(stage, e))?;

        tracing::info!(
            provider = provider.name(),
            user_id = %user.id,
            stage = %LoginStage::TokensIssued,
            "Login completed"
        );
        Ok(tokens)
    }

    /// Redeem a refresh token for a new access token and its successor.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self, refresh_token: Uuid) -> Result<IssuedTokens, SessionError> {
        let successor = self.refresh_tokens.rotate(refresh_token).await?;

        let user = self
            .identities
            .get_by_id(successor.user_id)
            .await?
            .ok_or(SessionError::UserMissing(successor.user_id))?;

        let access_token = self.codec.issue(user.id, &user.email)?;
        tracing::info!(user_id = %user.id, successor_id = %successor.id, "Refreshed session");

        Ok(IssuedTokens {
            user_id: user.id,
            access_token,
            refresh_token: successor.id,
            refresh_expires_at: successor.expires_at,
        })
    }

    /// Mint an access token and a fresh refresh token; both must succeed.
    async fn issue_pair(&self, user_id: Uuid, email: &str) -> Result<IssuedTokens, SessionError> {
        let access_token = self.codec.issue(user_id, email)?;
        let refresh = self.refresh_tokens.issue(user_id).await?;
        Ok(IssuedTokens {
            user_id,
            access_token,
            refresh_token: refresh.id,
            refresh_expires_at: refresh.expires_at,
        })
    }
}
