use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::error::AppError;
use crate::models::backup_key::{BackupKey, BackupKeyInfo, BackupKeyStats};
use crate::models::key::ProviderKind;

/// Add a credential to the reserve.
pub async fn create_backup_key(
    db: &SqlitePool,
    id: &str,
    secret: &str,
    provider: ProviderKind,
) -> Result<BackupKey, AppError> {
    if id.trim().is_empty() {
        return Err(AppError::BadRequest("backup key id is required".into()));
    }
    if secret.trim().is_empty() {
        return Err(AppError::BadRequest("backup key secret is required".into()));
    }

    let exists: Option<String> = sqlx::query_scalar("SELECT id FROM backup_keys WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    if exists.is_some() {
        return Err(AppError::DuplicateId(id.to_string()));
    }

    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO backup_keys (id, secret, provider, is_used, activated, created_at)
        VALUES (?, ?, ?, 0, 0, ?)
        "#,
    )
    .bind(id)
    .bind(secret)
    .bind(provider.as_str())
    .bind(now)
    .execute(db)
    .await?;

    get_backup_key(db, id).await
}

/// Delete a backup key. Idempotent: deleting an absent id reports `false`
/// instead of erroring.
pub async fn delete_backup_key(db: &SqlitePool, id: &str) -> Result<bool, AppError> {
    let result = sqlx::query("DELETE FROM backup_keys WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// List the reserve with secrets masked.
pub async fn list_backup_keys(db: &SqlitePool) -> Result<Vec<BackupKeyInfo>, AppError> {
    let keys =
        sqlx::query_as::<_, BackupKey>("SELECT * FROM backup_keys ORDER BY created_at")
            .fetch_all(db)
            .await?;

    Ok(keys.into_iter().map(BackupKeyInfo::from).collect())
}

pub async fn get_backup_key(db: &SqlitePool, id: &str) -> Result<BackupKey, AppError> {
    sqlx::query_as::<_, BackupKey>("SELECT * FROM backup_keys WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)
}

/// Return a used backup key to the idle pool. Refused once the retention
/// instant has passed: a backup scheduled for purge must never be reused,
/// even if the sweep has not physically deleted it yet.
pub async fn restore_backup_key(
    db: &SqlitePool,
    id: &str,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<BackupKey, AppError> {
    let existing = get_backup_key(db, id).await?;

    if existing.is_used {
        if let Some(used_at) = existing.used_at {
            let deletes_at = used_at + Duration::hours(config.backup_retention_hours);
            if deletes_at <= now {
                return Err(AppError::BadRequest(format!(
                    "backup key {id} passed its retention window and is scheduled for deletion"
                )));
            }
        }
    }

    sqlx::query(
        r#"
        UPDATE backup_keys
        SET is_used = 0, activated = 0, used_for = NULL, used_at = NULL
        WHERE id = ?
        "#,
    )
    .bind(id)
    .execute(db)
    .await?;

    get_backup_key(db, id).await
}

/// Idle vs. used vs. activated counts for the admin dashboard.
pub async fn backup_key_stats(db: &SqlitePool) -> Result<BackupKeyStats, AppError> {
    let stats = sqlx::query_as::<_, BackupKeyStats>(
        r#"
        SELECT COUNT(*) AS total,
               COALESCE(SUM(CASE WHEN is_used = 0 THEN 1 ELSE 0 END), 0) AS idle,
               COALESCE(SUM(CASE WHEN is_used = 1 THEN 1 ELSE 0 END), 0) AS used,
               COALESCE(SUM(CASE WHEN activated = 1 THEN 1 ELSE 0 END), 0) AS activated
        FROM backup_keys
        "#,
    )
    .fetch_one(db)
    .await?;

    Ok(stats)
}

/// Consume the first idle backup key for `used_for`. First-available is the
/// whole selection policy; the reserve is not ranked.
pub async fn promote_next_idle(
    db: &SqlitePool,
    used_for: &str,
    now: DateTime<Utc>,
) -> Result<BackupKey, AppError> {
    let candidate = sqlx::query_as::<_, BackupKey>(
        "SELECT * FROM backup_keys WHERE is_used = 0 ORDER BY created_at LIMIT 1",
    )
    .fetch_optional(db)
    .await?
    .ok_or(AppError::NoBackupAvailable)?;

    sqlx::query(
        r#"
        UPDATE backup_keys
        SET is_used = 1, activated = 1, used_for = ?, used_at = ?
        WHERE id = ?
        "#,
    )
    .bind(used_for)
    .bind(now)
    .bind(&candidate.id)
    .execute(db)
    .await?;

    get_backup_key(db, &candidate.id).await
}

/// Retention sweep tick: purge used backups whose `used_at + retention`
/// instant has passed. Idempotent — an already-purged id is simply not
/// matched again.
pub async fn purge_expired(
    db: &SqlitePool,
    retention_hours: i64,
    now: DateTime<Utc>,
) -> Result<u64, AppError> {
    let cutoff = now - Duration::hours(retention_hours);

    let result = sqlx::query(
        "DELETE FROM backup_keys WHERE is_used = 1 AND used_at IS NOT NULL AND used_at <= ?",
    )
    .bind(cutoff)
    .execute(db)
    .await?;

    Ok(result.rows_affected())
}

/// Spawn the retention sweep on its own timer, independent of the spend
/// monitor.
pub fn spawn_retention_sweep(db: SqlitePool, config: Config) {
    let interval = std::time::Duration::from_secs(config.sweep_interval_secs);
    let retention_hours = config.backup_retention_hours;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match purge_expired(&db, retention_hours, Utc::now()).await {
                Ok(n) if n > 0 => {
                    tracing::info!("purged {} expired backup keys", n);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("backup retention sweep error: {}", e);
                }
            }
        }
    });
}
