//! Authenticated user endpoints (/api/users/*).

use crate::AppResources;
use crate::api::auth::{AuthError, BearerAuth, GENERIC_TOKEN_ERROR};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};
use uuid::Uuid;

/// Tag for OpenAPI documentation.
pub const USERS_TAG: &str = "Users";

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new().routes(routes!(me))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[tracing::instrument(skip(resources, user), fields(user_id = %user.user_id))]
#[utoipa::path(
    get,
    path = "/me",
    tag = USERS_TAG,
    operation_id = "Current User",
    summary = "Return the user named by the access token",
    security(("Authorization" = [])),
    responses(
        (status = 200, description = "Authenticated user", body = UserResponse),
        (status = 401, description = "Missing, invalid or expired access token", body = AuthError)
    )
)]
async fn me(
    Extension(resources): Extension<AppResources>,
    BearerAuth(user): BearerAuth,
) -> Result<Json<UserResponse>, AuthError> {
    let record = resources
        .sessions
        .identities()
        .get_by_id(user.user_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to load user");
            AuthError::server_error()
        })?
        .ok_or_else(|| {
            tracing::warn!("Valid access token for a user that does not exist");
            AuthError::invalid_token(GENERIC_TOKEN_ERROR)
        })?;

    Ok(Json(UserResponse {
        id: record.id,
        email: record.email,
        created_at: record.created_at,
    }))
}
