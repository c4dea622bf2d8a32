use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::AppError;
use crate::models::proxy::Proxy;

pub async fn create_proxy(
    db: &SqlitePool,
    id: &str,
    name: &str,
    endpoint: &str,
) -> Result<Proxy, AppError> {
    if id.trim().is_empty() {
        return Err(AppError::BadRequest("proxy id is required".into()));
    }

    let exists: Option<String> = sqlx::query_scalar("SELECT id FROM proxies WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    if exists.is_some() {
        return Err(AppError::DuplicateId(id.to_string()));
    }

    let now = Utc::now();
    sqlx::query("INSERT INTO proxies (id, name, endpoint, created_at) VALUES (?, ?, ?, ?)")
        .bind(id)
        .bind(name)
        .bind(endpoint)
        .bind(now)
        .execute(db)
        .await?;

    get_proxy(db, id).await
}

pub async fn get_proxy(db: &SqlitePool, id: &str) -> Result<Proxy, AppError> {
    sqlx::query_as::<_, Proxy>("SELECT * FROM proxies WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn list_proxies(db: &SqlitePool) -> Result<Vec<Proxy>, AppError> {
    let proxies = sqlx::query_as::<_, Proxy>("SELECT * FROM proxies ORDER BY created_at")
        .fetch_all(db)
        .await?;

    Ok(proxies)
}

/// Delete a proxy and its bindings in one transaction.
pub async fn delete_proxy(db: &SqlitePool, id: &str) -> Result<(), AppError> {
    let mut tx = db.begin().await?;

    sqlx::query("DELETE FROM bindings WHERE proxy_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let removed = sqlx::query("DELETE FROM proxies WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;

    if removed == 0 {
        return Err(AppError::NotFound);
    }

    Ok(())
}

/// Create the proxy if it is missing. Used on startup for the webhook's
/// default binding target.
pub async fn ensure_proxy(
    db: &SqlitePool,
    id: &str,
    name: &str,
    endpoint: &str,
) -> Result<Proxy, AppError> {
    match get_proxy(db, id).await {
        Ok(p) => Ok(p),
        Err(AppError::NotFound) => create_proxy(db, id, name, endpoint).await,
        Err(e) => Err(e),
    }
}
