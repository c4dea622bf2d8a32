use std::env;

use crate::services::reconciler::RepairStrategy;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub listen_addr: String,
    pub admin_key: String,
    /// Shared secret for the webhook and router surfaces. When unset, those
    /// surfaces answer 500: the rotation script must not run against a
    /// misconfigured instance.
    pub webhook_secret: Option<String>,
    /// Comma-separated list of allowed CORS origins, or "*" for any.
    pub cors_origin: String,
    /// Spend level at which a key is retired and a backup promoted.
    pub spend_threshold: f64,
    /// Cadence of the spend monitor, in seconds.
    pub monitor_interval_secs: u64,
    /// Cadence of the backup retention sweep, in seconds.
    pub sweep_interval_secs: u64,
    /// How long a used backup key is kept before the sweep purges it.
    /// Clamped to 6..=12 hours.
    pub backup_retention_hours: i64,
    /// Proxy the webhook binds freshly injected keys to.
    pub default_proxy_id: String,
    /// Endpoint seeded for the default proxy when it does not exist yet.
    pub default_proxy_endpoint: String,
    /// What the reconciler does with an orphaned binding.
    pub repair_strategy: RepairStrategy,
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or(default),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let retention: i64 = parse_env("BACKUP_RETENTION_HOURS", 6);

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL is required"))?,
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into()),
            admin_key: env::var("ADMIN_KEY")
                .map_err(|_| anyhow::anyhow!("ADMIN_KEY is required"))?,
            webhook_secret: env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
            cors_origin: env::var("CORS_ORIGIN").unwrap_or_else(|_| "*".into()),
            spend_threshold: parse_env("SPEND_THRESHOLD", 9.8),
            monitor_interval_secs: parse_env("MONITOR_INTERVAL_SECS", 300),
            sweep_interval_secs: parse_env("SWEEP_INTERVAL_SECS", 600),
            backup_retention_hours: retention.clamp(6, 12),
            default_proxy_id: env::var("DEFAULT_PROXY_ID").unwrap_or_else(|_| "default".into()),
            default_proxy_endpoint: env::var("DEFAULT_PROXY_ENDPOINT")
                .unwrap_or_else(|_| "direct://".into()),
            repair_strategy: env::var("REPAIR_STRATEGY")
                .ok()
                .and_then(|s| RepairStrategy::from_str(&s))
                .unwrap_or(RepairStrategy::Delete),
        })
    }
}
