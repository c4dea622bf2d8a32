use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::AppError;
use crate::locks::key_lock;
use crate::models::key::{Key, KeyInfo, KeyStatus, ProviderKind};

/// Create a new key. The id is operator- or webhook-assigned, so collisions
/// are a caller error, not something we paper over.
pub async fn create_key(
    db: &SqlitePool,
    id: &str,
    secret: &str,
    provider: ProviderKind,
) -> Result<Key, AppError> {
    if id.trim().is_empty() {
        return Err(AppError::BadRequest("key id is required".into()));
    }
    if secret.trim().is_empty() {
        return Err(AppError::BadRequest("key secret is required".into()));
    }

    let exists: Option<String> = sqlx::query_scalar("SELECT id FROM keys WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    if exists.is_some() {
        return Err(AppError::DuplicateId(id.to_string()));
    }

    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO keys (id, secret, provider, status, total_spend, created_at)
        VALUES (?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(id)
    .bind(secret)
    .bind(provider.as_str())
    .bind(KeyStatus::Healthy.as_str())
    .bind(now)
    .execute(db)
    .await?;

    get_key(db, id).await
}

/// Delete a key and every binding referencing it, in one transaction.
/// Returns whether the key existed.
pub async fn delete_key(db: &SqlitePool, id: &str) -> Result<bool, AppError> {
    let lock = key_lock(id);
    let _guard = lock.lock().await;

    let mut tx = db.begin().await?;

    let bindings_removed = sqlx::query("DELETE FROM bindings WHERE key_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let removed = sqlx::query("DELETE FROM keys WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;

    if removed > 0 {
        tracing::info!(
            key_id = id,
            bindings = bindings_removed,
            "deleted key and cascaded its bindings"
        );
    }

    Ok(removed > 0)
}

/// Zero the usage counters. Status is deliberately untouched: resetting
/// stats on a `need_refresh` key does not make it selectable again.
pub async fn reset_key_stats(db: &SqlitePool, id: &str) -> Result<Key, AppError> {
    let lock = key_lock(id);
    let _guard = lock.lock().await;

    let result = sqlx::query(
        r#"
        UPDATE keys
        SET total_spend = 0, last_spend_check = NULL, last_used_at = NULL, last_error = NULL
        WHERE id = ?
        "#,
    )
    .bind(id)
    .execute(db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    get_key(db, id).await
}

/// Fold externally accrued spend into the key. Spend is monotonically
/// non-decreasing outside of an explicit reset, so negative deltas are
/// rejected at the boundary.
pub async fn record_spend(
    db: &SqlitePool,
    id: &str,
    amount: f64,
    now: DateTime<Utc>,
) -> Result<Key, AppError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(AppError::BadRequest("spend amount must be non-negative".into()));
    }

    let lock = key_lock(id);
    let _guard = lock.lock().await;

    let result = sqlx::query(
        "UPDATE keys SET total_spend = total_spend + ?, last_used_at = ? WHERE id = ?",
    )
    .bind(amount)
    .bind(now)
    .bind(id)
    .execute(db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    get_key(db, id).await
}

/// Store the latest failure on the key. Missing key is a no-op: the caller
/// is usually the monitor reporting on a key that may have raced a delete.
pub async fn record_key_error(db: &SqlitePool, id: &str, message: &str) -> Result<(), AppError> {
    sqlx::query("UPDATE keys SET last_error = ? WHERE id = ?")
        .bind(message)
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

/// List all keys with secrets masked.
pub async fn list_keys(db: &SqlitePool) -> Result<Vec<KeyInfo>, AppError> {
    let keys = sqlx::query_as::<_, Key>("SELECT * FROM keys ORDER BY created_at DESC")
        .fetch_all(db)
        .await?;

    Ok(keys.into_iter().map(KeyInfo::from).collect())
}

/// Single-key reveal accessor — the one place a raw secret leaves the
/// registry outside the webhook and router surfaces.
pub async fn get_key(db: &SqlitePool, id: &str) -> Result<Key, AppError> {
    sqlx::query_as::<_, Key>("SELECT * FROM keys WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)
}

/// Keys waiting for a replacement. This is what the third-party rotation
/// script polls, so secrets are returned unmasked.
pub async fn keys_needing_refresh(db: &SqlitePool) -> Result<Vec<Key>, AppError> {
    let keys = sqlx::query_as::<_, Key>(
        "SELECT * FROM keys WHERE status = ? ORDER BY created_at",
    )
    .bind(KeyStatus::NeedRefresh.as_str())
    .fetch_all(db)
    .await?;

    Ok(keys)
}
