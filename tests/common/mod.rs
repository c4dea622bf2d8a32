#![allow(dead_code)]

use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use keypool_rs::config::Config;
use keypool_rs::services::proxy_service;
use keypool_rs::services::reconciler::RepairStrategy;
use keypool_rs::state::AppState;

/// Fresh in-memory database with the schema applied. One connection so the
/// memory database survives for the whole test.
pub async fn setup_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");

    pool
}

pub fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".into(),
        listen_addr: "127.0.0.1:0".into(),
        admin_key: "test-admin-key".into(),
        webhook_secret: Some("test-webhook-secret".into()),
        cors_origin: "*".into(),
        spend_threshold: 9.8,
        monitor_interval_secs: 300,
        sweep_interval_secs: 600,
        backup_retention_hours: 6,
        default_proxy_id: "default".into(),
        default_proxy_endpoint: "direct://".into(),
        repair_strategy: RepairStrategy::Delete,
    }
}

/// Full application state with the default proxy seeded, as `main` does.
pub async fn setup_state() -> Arc<AppState> {
    let db = setup_pool().await;
    proxy_service::ensure_proxy(&db, "default", "Default proxy", "direct://")
        .await
        .expect("seed default proxy");

    Arc::new(AppState {
        db,
        config: test_config(),
    })
}
