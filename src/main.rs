use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use keypool_rs::config::Config;
use keypool_rs::routes;
use keypool_rs::services::{backup_service, proxy_service, spend_monitor};
use keypool_rs::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (ignore if missing)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load config
    let config = Config::from_env()?;
    tracing::info!("Starting key pool service on {}", config.listen_addr);

    // Open the embedded database
    let opts = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));
    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(opts)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("Database migrations applied");

    // The webhook needs its default binding target to exist
    proxy_service::ensure_proxy(
        &db,
        &config.default_proxy_id,
        "Default proxy",
        &config.default_proxy_endpoint,
    )
    .await?;

    // Background jobs: spend monitor and backup retention sweep
    spend_monitor::spawn(db.clone(), config.clone());
    backup_service::spawn_retention_sweep(db.clone(), config.clone());

    // Build shared state and routes
    let state = Arc::new(AppState {
        db,
        config: config.clone(),
    });
    let app = routes::app(state);

    // Start server
    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("Listening on {}", config.listen_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
