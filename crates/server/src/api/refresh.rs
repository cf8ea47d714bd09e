//! Refresh token redemption (/api/auth/*).

use crate::AppResources;
use crate::api::auth::AuthError;
use crate::error::ErrorKind;
use axum::{
    Extension, Json,
    extract::rejection::JsonRejection,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};
use uuid::Uuid;

/// Tag for OpenAPI documentation.
pub const AUTH_TAG: &str = "Credentials";

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new().routes(routes!(refresh))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    /// Refresh token id returned by login or a previous refresh
    #[schema(example = "3f0c9a57-9a3c-4d8e-9a51-2d6b4f1b7a10")]
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: Uuid,
}

#[tracing::instrument(skip(resources, payload))]
#[utoipa::path(
    post,
    path = "/refresh",
    tag = AUTH_TAG,
    operation_id = "Refresh Credentials",
    summary = "Trade a refresh token for a new credential pair",
    description = "Redeems the refresh token exactly once. The response carries a new access token and \
                   the id of a new refresh token; the submitted refresh token is dead afterwards.",
    request_body(content = RefreshRequest, description = "Refresh token to redeem"),
    responses(
        (status = 200, description = "New credential pair", body = RefreshResponse),
        (status = 400, description = "Malformed request body or token", body = AuthError),
        (status = 401, description = "Unknown, expired or already used refresh token", body = AuthError),
        (status = 500, description = "Internal server error", body = AuthError)
    )
)]
async fn refresh(
    Extension(resources): Extension<AppResources>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<RefreshResponse>, AuthError> {
    let Json(payload) = payload.map_err(|e| {
        tracing::debug!(error = %e, "Rejected refresh request body");
        AuthError::invalid_request("Body must be {\"refresh_token\": \"<uuid>\"}")
    })?;

    let token_id = Uuid::parse_str(payload.refresh_token.trim())
        .map_err(|_| AuthError::invalid_request("refresh_token must be a UUID"))?;

    match resources.sessions.refresh(token_id).await {
        Ok(tokens) => Ok(Json(RefreshResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        })),
        Err(err) => {
            match err.kind() {
                ErrorKind::Unauthenticated => {
                    tracing::warn!(token_id = %token_id, error = %err, "Refresh rejected")
                }
                _ => tracing::error!(token_id = %token_id, error = %err, "Refresh failed"),
            }
            Err(AuthError::from(&err))
        }
    }
}
