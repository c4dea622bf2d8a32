use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::error::AppError;
use crate::locks::key_lock;
use crate::models::backup_key::BackupKey;
use crate::models::binding::Binding;
use crate::models::key::{mask_secret, Key, KeyStatus};
use crate::models::spend_history::{HistoryListResponse, SpendHistoryRecord, SpendSummaryEntry};
use crate::services::{backup_service, key_service};

pub const ROTATION_REASON_SPEND: &str = "spend_threshold_exceeded";

/// What one monitor tick did. `resumed` counts rotations that were promoted
/// on an earlier tick and finished on this one.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct TickReport {
    pub checked: u64,
    pub rotated: u64,
    pub resumed: u64,
}

/// Spawn the periodic spend check. The tick body takes an explicit `now` so
/// tests drive it directly without wall-clock timers.
pub fn spawn(db: SqlitePool, config: Config) {
    let interval = std::time::Duration::from_secs(config.monitor_interval_secs);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match process_tick(&db, &config, Utc::now()).await {
                Ok(report) if report.rotated > 0 || report.resumed > 0 => {
                    tracing::info!(
                        checked = report.checked,
                        rotated = report.rotated,
                        resumed = report.resumed,
                        "spend monitor tick"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("spend monitor tick failed: {}", e);
                }
            }
        }
    });
}

/// One monitor pass: first finish any rotation interrupted after promotion,
/// then check every healthy key against the threshold.
pub async fn process_tick(
    db: &SqlitePool,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<TickReport, AppError> {
    let mut report = TickReport {
        resumed: resume_incomplete(db, config, now).await?,
        ..Default::default()
    };

    let healthy = sqlx::query_as::<_, Key>(
        "SELECT * FROM keys WHERE status = ? ORDER BY created_at",
    )
    .bind(KeyStatus::Healthy.as_str())
    .fetch_all(db)
    .await?;

    for key in healthy {
        let lock = key_lock(&key.id);
        let _guard = lock.lock().await;

        // Re-read under the lock: an admin delete or reset may have landed
        // between the listing and here.
        let key = match sqlx::query_as::<_, Key>("SELECT * FROM keys WHERE id = ?")
            .bind(&key.id)
            .fetch_optional(db)
            .await?
        {
            Some(k) if k.status == KeyStatus::Healthy.as_str() => k,
            _ => continue,
        };

        report.checked += 1;

        sqlx::query("UPDATE keys SET last_spend_check = ? WHERE id = ?")
            .bind(now)
            .bind(&key.id)
            .execute(db)
            .await?;

        if key.total_spend >= config.spend_threshold {
            match rotate(db, &key, config, now).await {
                Ok(Some(_)) => report.rotated += 1,
                Ok(None) => {}
                Err(e) => {
                    // Promotion is never rolled back: whatever step failed,
                    // the next tick picks the rotation back up.
                    tracing::warn!(key_id = %key.id, "rotation failed mid-flight: {}", e);
                    let _ = key_service::record_key_error(db, &key.id, &e.to_string()).await;
                }
            }
        } else {
            append_history(db, &key, config.spend_threshold, now, true, None).await?;
        }
    }

    Ok(report)
}

/// Retire `key` and promote a reserve credential in its place. Returns the
/// promoted backup id, or `None` when the reserve is empty and the key is
/// left degraded-but-safe in `need_refresh` for the rotation script.
async fn rotate(
    db: &SqlitePool,
    key: &Key,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<Option<String>, AppError> {
    // Retire first so the key stops being selectable even if a later step
    // fails.
    sqlx::query("UPDATE keys SET status = ? WHERE id = ?")
        .bind(KeyStatus::NeedRefresh.as_str())
        .bind(&key.id)
        .execute(db)
        .await?;

    let backup = match backup_service::promote_next_idle(db, &key.id, now).await {
        Ok(b) => b,
        Err(AppError::NoBackupAvailable) => {
            tracing::warn!(
                key_id = %key.id,
                spend = key.total_spend,
                "spend threshold crossed but the reserve is empty; waiting for replacement"
            );
            append_history(db, key, config.spend_threshold, now, true, None).await?;
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    complete_rotation(db, key, &backup, config, now, true).await?;

    Ok(Some(backup.id))
}

/// The steps after promotion: insert the promoted credential as a fresh
/// key, mirror the retired key's active bindings, deactivate them, and
/// append the finalizing history record. Every step skips work already done
/// so a retried rotation converges instead of erroring.
async fn complete_rotation(
    db: &SqlitePool,
    old_key: &Key,
    backup: &BackupKey,
    config: &Config,
    now: DateTime<Utc>,
    was_active: bool,
) -> Result<(), AppError> {
    let exists: Option<String> = sqlx::query_scalar("SELECT id FROM keys WHERE id = ?")
        .bind(&backup.id)
        .fetch_optional(db)
        .await?;
    if exists.is_none() {
        sqlx::query(
            r#"
            INSERT INTO keys (id, secret, provider, status, total_spend, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&backup.id)
        .bind(&backup.secret)
        .bind(&backup.provider)
        .bind(KeyStatus::Healthy.as_str())
        .bind(now)
        .execute(db)
        .await?;
    }

    let old_bindings = sqlx::query_as::<_, Binding>(
        "SELECT * FROM bindings WHERE key_id = ? AND is_active = 1",
    )
    .bind(&old_key.id)
    .fetch_all(db)
    .await?;

    for binding in &old_bindings {
        let pair_exists: Option<String> = sqlx::query_scalar(
            "SELECT key_id FROM bindings WHERE proxy_id = ? AND key_id = ?",
        )
        .bind(&binding.proxy_id)
        .bind(&backup.id)
        .fetch_optional(db)
        .await?;
        if pair_exists.is_some() {
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO bindings (proxy_id, key_id, priority, is_active, created_at)
            VALUES (?, ?, ?, 1, ?)
            "#,
        )
        .bind(&binding.proxy_id)
        .bind(&backup.id)
        .bind(binding.priority)
        .bind(now)
        .execute(db)
        .await?;
    }

    sqlx::query("UPDATE bindings SET is_active = 0 WHERE key_id = ?")
        .bind(&old_key.id)
        .execute(db)
        .await?;

    append_history(db, old_key, config.spend_threshold, now, was_active, Some(&backup.id)).await?;

    tracing::info!(
        key_id = %old_key.id,
        new_key_id = %backup.id,
        bindings = old_bindings.len(),
        "rotated key onto promoted backup"
    );

    Ok(())
}

/// Finish rotations that were promoted but interrupted before rebinding.
/// Detected by a used+activated backup whose replaced key is still
/// `need_refresh` with active bindings — that state may persist for at most
/// one tick.
async fn resume_incomplete(
    db: &SqlitePool,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<u64, AppError> {
    let pending = sqlx::query_as::<_, BackupKey>(
        r#"
        SELECT b.*
        FROM backup_keys b
        JOIN keys k ON k.id = b.used_for
        WHERE b.is_used = 1
          AND b.activated = 1
          AND k.status = 'need_refresh'
          AND EXISTS (SELECT 1 FROM bindings WHERE key_id = k.id AND is_active = 1)
        "#,
    )
    .fetch_all(db)
    .await?;

    let mut resumed = 0;
    for backup in pending {
        let Some(old_id) = backup.used_for.clone() else {
            continue;
        };

        let lock = key_lock(&old_id);
        let _guard = lock.lock().await;

        let old_key = match sqlx::query_as::<_, Key>("SELECT * FROM keys WHERE id = ?")
            .bind(&old_id)
            .fetch_optional(db)
            .await?
        {
            Some(k) => k,
            None => continue,
        };

        tracing::info!(key_id = %old_id, new_key_id = %backup.id, "resuming interrupted rotation");
        complete_rotation(db, &old_key, &backup, config, now, false).await?;
        resumed += 1;
    }

    Ok(resumed)
}

async fn append_history(
    db: &SqlitePool,
    key: &Key,
    threshold: f64,
    now: DateTime<Utc>,
    was_active: bool,
    rotated_to: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO spend_history (
            key_id, masked_secret, spend, threshold, checked_at, was_active,
            rotated_at, rotation_reason, new_key_id
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&key.id)
    .bind(mask_secret(&key.secret))
    .bind(key.total_spend)
    .bind(threshold)
    .bind(now)
    .bind(was_active)
    .bind(rotated_to.map(|_| now))
    .bind(rotated_to.map(|_| ROTATION_REASON_SPEND))
    .bind(rotated_to)
    .execute(db)
    .await?;

    Ok(())
}

/// Per-key spend vs. threshold for the admin summary.
pub async fn spend_summary(
    db: &SqlitePool,
    threshold: f64,
) -> Result<Vec<SpendSummaryEntry>, AppError> {
    let keys = sqlx::query_as::<_, Key>("SELECT * FROM keys ORDER BY created_at")
        .fetch_all(db)
        .await?;

    Ok(keys
        .into_iter()
        .map(|k| {
            let percent_used = if threshold > 0.0 {
                k.total_spend / threshold * 100.0
            } else {
                0.0
            };
            SpendSummaryEntry {
                key_id: k.id,
                secret_preview: mask_secret(&k.secret),
                status: k.status,
                total_spend: k.total_spend,
                threshold,
                percent_used,
            }
        })
        .collect())
}

/// Paginated spend history, optionally filtered by key.
pub async fn spend_history(
    db: &SqlitePool,
    page: i64,
    per_page: i64,
    key_id: Option<String>,
) -> Result<HistoryListResponse, AppError> {
    let offset = (page - 1).max(0) * per_page;

    let where_clause = if key_id.is_some() {
        "WHERE key_id = ?"
    } else {
        ""
    };

    let count_query = format!("SELECT COUNT(*) FROM spend_history {where_clause}");
    let data_query = format!(
        "SELECT * FROM spend_history {where_clause} ORDER BY checked_at DESC, id DESC LIMIT ? OFFSET ?"
    );

    let total: i64 = {
        let mut q = sqlx::query_scalar::<_, i64>(&count_query);
        if let Some(ref kid) = key_id {
            q = q.bind(kid);
        }
        q.fetch_one(db).await?
    };

    let records: Vec<SpendHistoryRecord> = {
        let mut q = sqlx::query_as::<_, SpendHistoryRecord>(&data_query);
        if let Some(ref kid) = key_id {
            q = q.bind(kid);
        }
        q.bind(per_page).bind(offset).fetch_all(db).await?
    };

    Ok(HistoryListResponse {
        data: records,
        total,
        page,
        per_page,
    })
}
