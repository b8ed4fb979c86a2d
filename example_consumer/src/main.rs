//! Example consumer: a separate Rust project that serves the data-api administration surface.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Or from this directory: `cargo run`
//!
//! When `DATAAPI_CONFIG_FILE` exists it is applied at boot; otherwise the process starts
//! unconfigured and waits for `POST /configuration`.

use dataapi_sdk::{
    app, AppState, ConfigProvider, EnvVarReplacement, MetadataProviderFactory, PgIntrospector, Settings, SqlDialect,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dataapi_sdk=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let provider = if tokio::fs::try_exists(&settings.config_file).await? {
        let provider = ConfigProvider::from_file(&settings.config_file, &EnvVarReplacement::default()).await?;
        if let Some(conn) = settings.connection_string.as_deref() {
            if let Some(snapshot) = provider.try_get_config() {
                provider.hot_reload(Arc::new((*snapshot).clone().with_connection_override(Some(conn), None)));
            }
        }
        tracing::info!(path = %settings.config_file.display(), "configuration loaded from file");
        provider
    } else {
        tracing::info!(path = %settings.config_file.display(), "no configuration file; waiting for POST /configuration");
        ConfigProvider::new()
    };

    let factory = MetadataProviderFactory::new().with_introspector(SqlDialect::PostgreSql, Arc::new(PgIntrospector::new()));
    let listen_addr = settings.listen_addr;
    let state = AppState::new(settings, Arc::new(provider), factory);
    if state.config_provider.is_configured() && !state.apply_current().await {
        tracing::warn!("boot configuration was rejected; POST /configuration/reload to replace it");
    }

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("data api listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app(state)).await?;
    Ok(())
}
