use sea_orm::DbErr;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Access token verification and signing failures.
///
/// Callers treat every verification variant as "unauthenticated"; the variants
/// exist so logs and tests can tell them apart.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired { expired_at: Option<OffsetDateTime> },
    #[error("token is not valid yet")]
    NotYetValid { not_before: Option<OffsetDateTime> },
    #[error("token failed validation: {0}")]
    Invalid(String),
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl TokenError {
    /// Signing failures are server faults; everything else is the caller's token.
    pub fn is_internal(&self) -> bool {
        matches!(self, TokenError::Signing(_))
    }
}

/// Refresh token rotation failures.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("refresh token is invalid")]
    Invalid,
    #[error("refresh token already used")]
    AlreadyUsed,
    #[error("refresh token expired")]
    Expired,
    #[error("refresh token storage failure: {0}")]
    Persistence(#[from] DbErr),
}

/// External identity provider failures.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unsupported identity provider: {0}")]
    UnknownProvider(String),
    #[error("code exchange with {provider} failed: {reason}")]
    Exchange { provider: String, reason: String },
    #[error("identity fetch from {provider} failed: {reason}")]
    IdentityFetch { provider: String, reason: String },
    #[error("{provider} returned an identity without an email address")]
    MissingEmail { provider: String },
}

/// Caller-facing classification of every credential failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 400, the request must not be retried unmodified
    MalformedInput,
    /// 401
    Unauthenticated,
    /// Exchange or identity fetch failed at the provider
    UpstreamProvider,
    /// Storage or other internal failure, 500
    Persistence,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("identity provider reported an error: {0}")]
    ProviderDenied(String),
    #[error("authorization code missing from callback")]
    MissingCode,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Refresh(#[from] RefreshError),
    #[error("user {0} referenced by a refresh token does not exist")]
    UserMissing(Uuid),
    #[error("persistence failure: {0}")]
    Persistence(#[from] DbErr),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Provider(ProviderError::UnknownProvider(_)) => ErrorKind::MalformedInput,
            SessionError::Provider(_) | SessionError::ProviderDenied(_) => {
                ErrorKind::UpstreamProvider
            }
            SessionError::MissingCode => ErrorKind::MalformedInput,
            SessionError::Token(err) if err.is_internal() => ErrorKind::Persistence,
            SessionError::Token(_) => ErrorKind::Unauthenticated,
            SessionError::Refresh(RefreshError::Persistence(_)) => ErrorKind::Persistence,
            SessionError::Refresh(_) => ErrorKind::Unauthenticated,
            SessionError::UserMissing(_) | SessionError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Value for the `error` query parameter of a failed login redirect.
    ///
    /// Never carries internal error text; provider-reported errors are echoed as given.
    pub fn redirect_error(&self) -> String {
        match self {
            SessionError::ProviderDenied(reason) => reason.clone(),
            SessionError::MissingCode => "missing_code".to_string(),
            SessionError::Provider(ProviderError::UnknownProvider(_)) => {
                "unsupported_provider".to_string()
            }
            SessionError::Provider(ProviderError::Exchange { .. }) => "exchange_failed".to_string(),
            SessionError::Provider(_) => "identity_fetch_failed".to_string(),
            _ => "server_error".to_string(),
        }
    }
}
