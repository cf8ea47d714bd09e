//! Credential lifecycle service.
//!
//! Users sign in through an external OAuth2 identity provider and receive a
//! short-lived signed access token plus a single-use, rotating refresh token.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::{AppConfig, ConfigError};
use crate::identity::IdentityResolver;
use crate::provider::ProviderRegistry;
use crate::refresh::RefreshTokenStore;
use crate::session::SessionService;
use crate::token::AccessTokenCodec;

pub mod api;
pub mod config;
pub mod entity;
pub mod error;
pub mod identity;
pub mod provider;
pub mod refresh;
pub mod session;
pub mod token;

/// Path of the landing page used when a login names no target.
pub const DEBUG_TOKEN_PATH: &str = "/api/oauth/debug/token";

#[derive(Clone)]
pub struct AppResources {
    pub config: Arc<AppConfig>,
    pub sessions: SessionService,
}

impl AppResources {
    /// Wire the credential components together from configuration.
    ///
    /// `http` is the client used for every outbound provider call.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        http: reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let base_url = config.base_url()?;
        let providers = ProviderRegistry::from_config(&config.providers, &base_url, http)?;

        let mut default_target = base_url.clone();
        default_target.set_path(&format!(
            "{}{DEBUG_TOKEN_PATH}",
            base_url.path().trim_end_matches('/')
        ));

        let sessions = SessionService::new(
            providers,
            IdentityResolver::new(db.clone()),
            AccessTokenCodec::new(&config.jwt),
            RefreshTokenStore::new(db, config.jwt.refresh_token_lifetime()),
            default_target,
        );

        Ok(Self { config, sessions })
    }
}
