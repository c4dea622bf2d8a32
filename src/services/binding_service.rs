use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::AppError;
use crate::models::binding::{Binding, BindingView, KeyRoute};
use crate::services::reconciler::{self, RepairStrategy};

const MIN_PRIORITY: i64 = 1;
const MAX_PRIORITY: i64 = 10;

fn validate_priority(priority: i64) -> Result<(), AppError> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(AppError::BadRequest(format!(
            "priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}"
        )));
    }
    Ok(())
}

/// Bind a key to a proxy. Key existence and pair uniqueness are write-time
/// invariants: violations are rejected here, not left for the reconciler.
pub async fn create_binding(
    db: &SqlitePool,
    proxy_id: &str,
    key_id: &str,
    priority: i64,
) -> Result<Binding, AppError> {
    validate_priority(priority)?;

    let key_exists: Option<String> = sqlx::query_scalar("SELECT id FROM keys WHERE id = ?")
        .bind(key_id)
        .fetch_optional(db)
        .await?;
    if key_exists.is_none() {
        return Err(AppError::NotFound);
    }

    let proxy_exists: Option<String> = sqlx::query_scalar("SELECT id FROM proxies WHERE id = ?")
        .bind(proxy_id)
        .fetch_optional(db)
        .await?;
    if proxy_exists.is_none() {
        return Err(AppError::BadRequest(format!("proxy {proxy_id} does not exist")));
    }

    let pair_exists: Option<String> = sqlx::query_scalar(
        "SELECT key_id FROM bindings WHERE proxy_id = ? AND key_id = ?",
    )
    .bind(proxy_id)
    .bind(key_id)
    .fetch_optional(db)
    .await?;
    if pair_exists.is_some() {
        return Err(AppError::DuplicateBinding(
            proxy_id.to_string(),
            key_id.to_string(),
        ));
    }

    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO bindings (proxy_id, key_id, priority, is_active, created_at)
        VALUES (?, ?, ?, 1, ?)
        "#,
    )
    .bind(proxy_id)
    .bind(key_id)
    .bind(priority)
    .bind(now)
    .execute(db)
    .await?;

    get_binding(db, proxy_id, key_id).await
}

pub async fn get_binding(
    db: &SqlitePool,
    proxy_id: &str,
    key_id: &str,
) -> Result<Binding, AppError> {
    sqlx::query_as::<_, Binding>("SELECT * FROM bindings WHERE proxy_id = ? AND key_id = ?")
        .bind(proxy_id)
        .bind(key_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)
}

/// Update priority and/or the active flag of an existing binding.
pub async fn update_binding(
    db: &SqlitePool,
    proxy_id: &str,
    key_id: &str,
    priority: Option<i64>,
    is_active: Option<bool>,
) -> Result<Binding, AppError> {
    let existing = get_binding(db, proxy_id, key_id).await?;

    let new_priority = priority.unwrap_or(existing.priority);
    validate_priority(new_priority)?;
    let new_is_active = is_active.unwrap_or(existing.is_active);

    sqlx::query(
        "UPDATE bindings SET priority = ?, is_active = ? WHERE proxy_id = ? AND key_id = ?",
    )
    .bind(new_priority)
    .bind(new_is_active)
    .bind(proxy_id)
    .bind(key_id)
    .execute(db)
    .await?;

    get_binding(db, proxy_id, key_id).await
}

pub async fn delete_binding(
    db: &SqlitePool,
    proxy_id: &str,
    key_id: &str,
) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM bindings WHERE proxy_id = ? AND key_id = ?")
        .bind(proxy_id)
        .bind(key_id)
        .execute(db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    Ok(())
}

/// Drop every binding for a proxy. Returns the number removed.
pub async fn delete_all_for_proxy(db: &SqlitePool, proxy_id: &str) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM bindings WHERE proxy_id = ?")
        .bind(proxy_id)
        .execute(db)
        .await?;

    Ok(result.rows_affected())
}

/// Bindings for one proxy in ascending priority order — the selection order
/// the external router is contractually expected to honor.
pub async fn bindings_for_proxy(
    db: &SqlitePool,
    proxy_id: &str,
) -> Result<Vec<Binding>, AppError> {
    let bindings = sqlx::query_as::<_, Binding>(
        "SELECT * FROM bindings WHERE proxy_id = ? ORDER BY priority, key_id",
    )
    .bind(proxy_id)
    .fetch_all(db)
    .await?;

    Ok(bindings)
}

async fn fetch_annotated(db: &SqlitePool) -> Result<Vec<BindingView>, AppError> {
    let views = sqlx::query_as::<_, BindingView>(
        r#"
        SELECT b.proxy_id,
               p.name AS proxy_name,
               b.key_id,
               k.status AS key_status,
               k.total_spend AS key_spend,
               b.priority,
               b.is_active,
               b.created_at
        FROM bindings b
        LEFT JOIN proxies p ON p.id = b.proxy_id
        LEFT JOIN keys k ON k.id = b.key_id
        ORDER BY b.proxy_id, b.priority, b.key_id
        "#,
    )
    .fetch_all(db)
    .await?;

    Ok(views)
}

/// List all bindings annotated with proxy names and key status. This read
/// path is also where orphan detection happens: when at least one binding
/// points at a missing key, the reconciler runs synchronously and the
/// caller gets the post-repair state. If the repair itself fails, the stale
/// list is returned and the failure only logged — a read never turns into a
/// failed request because healing did.
pub async fn list_bindings(
    db: &SqlitePool,
    strategy: RepairStrategy,
) -> Result<Vec<BindingView>, AppError> {
    let views = fetch_annotated(db).await?;

    if !views.iter().any(|v| v.is_orphaned()) {
        return Ok(views);
    }

    match reconciler::repair_bindings(db, strategy).await {
        Ok(report) => {
            tracing::info!(
                repaired = report.repaired,
                deleted = report.deleted,
                "auto-repaired orphaned bindings during listing"
            );
            fetch_annotated(db).await
        }
        Err(e) => {
            tracing::warn!("binding auto-repair failed, returning stale listing: {}", e);
            Ok(views)
        }
    }
}

/// The external router's read: active bindings for a proxy ordered by
/// priority, each with the key's secret and current status. Plain read of
/// committed rows — never blocks on an in-flight rotation.
pub async fn routes_for_proxy(
    db: &SqlitePool,
    proxy_id: &str,
) -> Result<Vec<KeyRoute>, AppError> {
    let routes = sqlx::query_as::<_, KeyRoute>(
        r#"
        SELECT b.key_id, k.secret, k.status, b.priority
        FROM bindings b
        JOIN keys k ON k.id = b.key_id
        WHERE b.proxy_id = ? AND b.is_active = 1
        ORDER BY b.priority, b.key_id
        "#,
    )
    .bind(proxy_id)
    .fetch_all(db)
    .await?;

    Ok(routes)
}
