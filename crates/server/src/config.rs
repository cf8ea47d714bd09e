use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Signing and lifetime settings for issued credentials.
#[derive(Clone, Deserialize)]
pub struct JwtConfig {
    /// HMAC secret shared by every instance. Must be at least 32 bytes.
    pub secret: String,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime_secs: i64,
    #[serde(default = "default_refresh_token_lifetime")]
    pub refresh_token_lifetime_secs: i64,
}

impl JwtConfig {
    pub fn access_token_lifetime(&self) -> time::Duration {
        time::Duration::seconds(self.access_token_lifetime_secs)
    }

    pub fn refresh_token_lifetime(&self) -> time::Duration {
        time::Duration::seconds(self.refresh_token_lifetime_secs)
    }
}

/// OAuth2 client registration with one external identity provider.
#[derive(Clone, Deserialize)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_google_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_google_token_url")]
    pub token_url: String,
    #[serde(default = "default_google_userinfo_url")]
    pub userinfo_url: String,
    #[serde(default = "default_google_scopes")]
    pub scopes: Vec<String>,
}

#[derive(Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub google: Option<OAuthProviderConfig>,
}

#[derive(Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    /// Public origin of this service, used for provider callbacks and the default landing page.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Deadline applied to every request, including the store and provider calls it makes.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl AppConfig {
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Validation(format!("base_url is not a valid URL: {e}")))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::Validation(
                "jwt.secret must be at least 32 bytes".into(),
            ));
        }
        if self.jwt.access_token_lifetime_secs <= 0 {
            return Err(ConfigError::Validation(
                "jwt.access_token_lifetime_secs must be > 0".into(),
            ));
        }
        if self.jwt.refresh_token_lifetime_secs <= 0 {
            return Err(ConfigError::Validation(
                "jwt.refresh_token_lifetime_secs must be > 0".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "request_timeout_secs must be > 0".into(),
            ));
        }
        self.base_url()?;
        if let Some(google) = &self.providers.google {
            for (key, value) in [
                ("auth_url", &google.auth_url),
                ("token_url", &google.token_url),
                ("userinfo_url", &google.userinfo_url),
            ] {
                Url::parse(value).map_err(|e| {
                    ConfigError::Validation(format!("providers.google.{key} is invalid: {e}"))
                })?;
            }
        }
        Ok(())
    }
}

fn default_issuer() -> String {
    "credential-server".to_string()
}

fn default_access_token_lifetime() -> i64 {
    15 * 60
}

fn default_refresh_token_lifetime() -> i64 {
    30 * 60
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_google_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_google_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_google_userinfo_url() -> String {
    "https://www.googleapis.com/oauth2/v3/userinfo".to_string()
}

fn default_google_scopes() -> Vec<String> {
    vec![
        "https://www.googleapis.com/auth/userinfo.email".to_string(),
        "https://www.googleapis.com/auth/userinfo.profile".to_string(),
    ]
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Environment variables use the key path separated by double underscores
/// (e.g. `JWT__SECRET`, `PROVIDERS__GOOGLE__CLIENT_ID`) and override file values.
/// A `.env` file in the working directory is loaded first when present.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_config_from("config.yaml")
}

/// Same as [`load_config`] but reads the given file instead of `config.yaml`.
pub fn load_config_from(path: &str) -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name(path))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

/// Convenience helper for binaries wanting panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Config, File, FileFormat};

    fn parse(yaml: &str) -> AppConfig {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .expect("build config")
            .try_deserialize()
            .expect("deserialize config")
    }

    const MINIMAL: &str = r#"
database_url: "postgres://localhost/credentials"
jwt:
  secret: "0123456789abcdef0123456789abcdef"
"#;

    #[test]
    fn defaults_apply_to_minimal_config() {
        let config = parse(MINIMAL);
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.jwt.access_token_lifetime(), time::Duration::minutes(15));
        assert_eq!(config.jwt.refresh_token_lifetime(), time::Duration::minutes(30));
        assert!(config.providers.google.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn google_provider_gets_public_endpoints_by_default() {
        let config = parse(
            r#"
database_url: "sqlite::memory:"
jwt:
  secret: "0123456789abcdef0123456789abcdef"
providers:
  google:
    client_id: "client"
    client_secret: "shh"
"#,
        );
        let google = config.providers.google.expect("google configured");
        assert_eq!(google.token_url, "https://oauth2.googleapis.com/token");
        assert_eq!(google.scopes.len(), 2);
    }

    #[test]
    fn short_secret_is_rejected() {
        let mut config = parse(MINIMAL);
        config.jwt.secret = "too-short".into();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn non_positive_lifetimes_are_rejected() {
        let mut config = parse(MINIMAL);
        config.jwt.refresh_token_lifetime_secs = 0;
        assert!(config.validate().is_err());

        let mut config = parse(MINIMAL);
        config.jwt.access_token_lifetime_secs = -5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let mut config = parse(MINIMAL);
        config.base_url = "not a url".into();
        assert!(config.validate().is_err());
    }
}
