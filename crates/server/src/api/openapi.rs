//! OpenAPI/Utoipa configuration.

use crate::api::{
    health::MISC_TAG, oauth::OAUTH_TAG, refresh::AUTH_TAG, users::USERS_TAG,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

/// Security addon for OpenAPI documentation.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            let bearer = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("JWT")
                .description(Some(
                    "Access token handed out by the login callback or `/api/auth/refresh`.",
                ))
                .build();
            components.add_security_scheme("Authorization", SecurityScheme::Http(bearer));
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Credential Server API",
        version = "1.0.0",
        description = "Login through external identity providers, short-lived access tokens and rotating refresh tokens."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = OAUTH_TAG, description = "Browser login through an identity provider"),
        (name = AUTH_TAG, description = "Credential refresh"),
        (name = USERS_TAG, description = "Endpoints requiring an access token")
    )
)]
pub struct ApiDoc;
