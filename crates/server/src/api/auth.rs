//! Bearer authentication extractor and the JSON error body shared by the API.

use crate::AppResources;
use crate::error::{ErrorKind, SessionError};
use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Description returned for every rejected credential, whatever the cause.
pub const GENERIC_TOKEN_ERROR: &str = "invalid or expired token";

/// Identity proven by a verified access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
}

/// Error type for authentication failures
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthError {
    /// Error code (e.g., "invalid_token", "invalid_request")
    pub error: String,
    /// Human-readable error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl AuthError {
    pub fn invalid_token(description: impl Into<String>) -> Self {
        Self {
            error: "invalid_token".to_string(),
            error_description: Some(description.into()),
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self {
            error: "invalid_request".to_string(),
            error_description: Some(description.into()),
        }
    }

    pub fn unsupported_provider(provider: &str) -> Self {
        Self {
            error: "unsupported_provider".to_string(),
            error_description: Some(format!("Unknown identity provider '{provider}'")),
        }
    }

    pub fn server_error() -> Self {
        Self {
            error: "server_error".to_string(),
            error_description: None,
        }
    }
}

impl From<&SessionError> for AuthError {
    fn from(err: &SessionError) -> Self {
        match err.kind() {
            ErrorKind::Unauthenticated => AuthError::invalid_token(GENERIC_TOKEN_ERROR),
            ErrorKind::MalformedInput => AuthError::invalid_request(err.to_string()),
            ErrorKind::UpstreamProvider | ErrorKind::Persistence => AuthError::server_error(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self.error.as_str() {
            "invalid_token" => StatusCode::UNAUTHORIZED,
            "invalid_request" | "unsupported_provider" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Axum extractor that validates `Authorization: Bearer <access token>`.
///
/// Verification is stateless; the token's signature and timestamps are all
/// that is checked.
///
/// ```ignore
/// async fn handler(BearerAuth(user): BearerAuth) -> impl IntoResponse {
///     format!("Hello, {}", user.email)
/// }
/// ```
pub struct BearerAuth(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for BearerAuth
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let resources = parts
            .extensions
            .get::<AppResources>()
            .cloned()
            .ok_or_else(|| {
                tracing::error!("AppResources not found in extensions");
                AuthError::server_error()
            })?;

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        let token = match header {
            Some(header) if header.starts_with("Bearer ") => header,
            Some(_) => {
                tracing::debug!("Authorization header without Bearer scheme");
                return Err(AuthError::invalid_token(GENERIC_TOKEN_ERROR));
            }
            None => {
                return Err(AuthError::invalid_token("Missing Authorization header"));
            }
        };

        let claims = resources.sessions.codec().verify_claims(token).map_err(|e| {
            tracing::debug!(error = %e, "Access token rejected");
            AuthError::invalid_token(GENERIC_TOKEN_ERROR)
        })?;
        let user_id = claims
            .user_id()
            .map_err(|_| AuthError::invalid_token(GENERIC_TOKEN_ERROR))?;

        Ok(BearerAuth(AuthenticatedUser {
            user_id,
            email: claims.email,
        }))
    }
}
