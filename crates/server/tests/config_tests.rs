use credential_server::config::{ConfigError, load_config_from};
use std::env;
use std::fs;

fn write_temp_config(name: &str, content: &str) -> std::path::PathBuf {
    let path = env::temp_dir().join(format!("{name}-{}.yaml", uuid::Uuid::new_v4()));
    fs::write(&path, content).expect("Failed to write temp config");
    path
}

#[test]
fn test_load_config_from_file_with_env_override() {
    let path = write_temp_config(
        "credential-config",
        r#"
database_url: "postgres://file/credentials"
base_url: "https://auth.example.com"
jwt:
  secret: "0123456789abcdef0123456789abcdef"
  access_token_lifetime_secs: 600
providers:
  google:
    client_id: "file-client"
    client_secret: "file-secret"
"#,
    );

    unsafe {
        env::set_var("JWT__REFRESH_TOKEN_LIFETIME_SECS", "3600");
    }

    let result = load_config_from(path.to_str().unwrap());

    unsafe {
        env::remove_var("JWT__REFRESH_TOKEN_LIFETIME_SECS");
    }
    let _ = fs::remove_file(&path);

    let config = result.expect("config loads");
    assert_eq!(config.database_url, "postgres://file/credentials");
    assert_eq!(config.base_url().unwrap().host_str(), Some("auth.example.com"));
    assert_eq!(config.jwt.access_token_lifetime_secs, 600);
    assert_eq!(config.jwt.refresh_token_lifetime_secs, 3600);
    assert_eq!(config.jwt.issuer, "credential-server");

    let google = config.providers.google.expect("google configured");
    assert_eq!(google.client_id, "file-client");
    assert_eq!(google.auth_url, "https://accounts.google.com/o/oauth2/auth");
}

#[test]
fn test_load_config_rejects_weak_secret() {
    let path = write_temp_config(
        "credential-config-weak",
        r#"
database_url: "sqlite::memory:"
jwt:
  secret: "short"
"#,
    );

    let result = load_config_from(path.to_str().unwrap());
    let _ = fs::remove_file(&path);

    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_load_config_missing_file_is_an_error() {
    let missing = env::temp_dir().join(format!("missing-{}", uuid::Uuid::new_v4()));
    let result = load_config_from(missing.to_str().unwrap());
    assert!(matches!(result, Err(ConfigError::Build(_))));
}
