//! HTTP surface of the credential service.
//!
//! - `oauth` - browser login flow (/api/oauth/*)
//! - `refresh` - refresh token redemption (/api/auth/*)
//! - `users` - bearer-authenticated endpoints (/api/users/*)
//! - `health` - health check endpoint (/healthz)
//! - `auth` - bearer extractor and error body
//! - `openapi` - OpenAPI/Utoipa configuration

pub mod auth;
pub mod health;
pub mod oauth;
pub mod openapi;
pub mod refresh;
pub mod users;

use crate::AppResources;
use std::time::Duration;
use axum::Router;
use tower_http::{
    catch_panic::CatchPanicLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

/// Build the application router with all routes and middleware attached.
pub fn router(app_resources: AppResources) -> Router {
    let timeout = app_resources.config.request_timeout();

    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .nest("/api/oauth", oauth::router())
        .nest("/api/auth", refresh::router())
        .nest("/api/users", users::router())
        .routes(routes!(health::health))
        .layer(axum::Extension(app_resources))
        .split_for_parts();

    with_middleware(router.merge(Redoc::with_url("/api-docs", api)), timeout)
}

/// CORS, request deadline, panic recovery and request tracing, outermost last.
fn with_middleware(router: Router, timeout: Duration) -> Router {
    router
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(timeout))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Starts the web server with all configured routes.
#[tracing::instrument(skip(app_resources))]
pub async fn start_webserver(app_resources: AppResources) -> color_eyre::Result<()> {
    let bind_address = app_resources.config.bind_address.clone();
    let router = router(app_resources);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(addr = %bind_address, "Server running");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}
