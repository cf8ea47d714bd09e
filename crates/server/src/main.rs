use credential_server::AppResources;
use credential_server::api::start_webserver;
use credential_server::config::load_config_or_panic;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_standard_tracing() {
    let default_directives = "credential_server=info,tower_http=info,sea_orm=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;

    initialize_standard_tracing();

    // Load config
    let config = Arc::new(load_config_or_panic());

    // Set up SeaORM database connection
    let mut options = ConnectOptions::new(config.database_url.clone());
    options
        .connect_timeout(config.request_timeout())
        .sqlx_logging(false);
    let db = Database::connect(options).await?;

    Migrator::up(&db, None).await?;
    tracing::info!("Database migrations applied");

    // Outbound provider calls share the request deadline
    let http = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()?;

    let resources = AppResources::new(Arc::new(db), config, http)?;
    tracing::info!(
        base_url = %resources.config.base_url,
        google_enabled = resources.config.providers.google.is_some(),
        access_token_lifetime_secs = resources.config.jwt.access_token_lifetime_secs,
        refresh_token_lifetime_secs = resources.config.jwt.refresh_token_lifetime_secs,
        "credential configuration"
    );

    start_webserver(resources).await?;
    Ok(())
}
