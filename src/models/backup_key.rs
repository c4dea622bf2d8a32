use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use super::key::mask_secret;

/// A credential held in reserve. Invariant: `is_used` implies `used_at` and
/// `used_for` are set; once used, the record is purged by the retention
/// sweep after the configured window and never returns to the idle pool.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BackupKey {
    pub id: String,
    pub secret: String,
    pub provider: String,
    pub is_used: bool,
    pub activated: bool,
    pub used_for: Option<String>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct BackupKeyInfo {
    pub id: String,
    pub secret_preview: String,
    pub provider: String,
    pub is_used: bool,
    pub activated: bool,
    pub used_for: Option<String>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<BackupKey> for BackupKeyInfo {
    fn from(b: BackupKey) -> Self {
        Self {
            id: b.id,
            secret_preview: mask_secret(&b.secret),
            provider: b.provider,
            is_used: b.is_used,
            activated: b.activated,
            used_for: b.used_for,
            used_at: b.used_at,
            created_at: b.created_at,
        }
    }
}

/// Reserve health at a glance: how many keys are left to rotate onto.
#[derive(Debug, Serialize, FromRow)]
pub struct BackupKeyStats {
    pub total: i64,
    pub idle: i64,
    pub used: i64,
    pub activated: i64,
}
