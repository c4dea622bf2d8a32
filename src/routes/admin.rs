use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::AppError;
use crate::models::backup_key::{BackupKeyInfo, BackupKeyStats};
use crate::models::binding::{Binding, BindingView};
use crate::models::key::{Key, KeyInfo, ProviderKind};
use crate::models::proxy::Proxy;
use crate::models::spend_history::{HistoryListResponse, SpendSummaryEntry};
use crate::services::reconciler::RepairReport;
use crate::services::{
    backup_service, binding_service, key_service, proxy_service, reconciler, spend_monitor,
};
use crate::state::AppState;

fn parse_provider(provider: Option<&str>) -> Result<ProviderKind, AppError> {
    match provider {
        None => Ok(ProviderKind::OneApi),
        Some(s) => ProviderKind::from_str(s).ok_or_else(|| {
            AppError::BadRequest(format!(
                "Unknown provider kind: {s}. Supported: one_api, new_api"
            ))
        }),
    }
}

// ── Key endpoints ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub id: String,
    pub secret: String,
    pub provider: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SpendReportRequest {
    /// Spend accrued since the last report, in the same currency unit as
    /// the threshold.
    pub amount: f64,
}

/// POST /admin/keys — register an upstream provider key
async fn create_key(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateKeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let provider = parse_provider(body.provider.as_deref())?;
    let key = key_service::create_key(&state.db, &body.id, &body.secret, provider).await?;
    Ok((StatusCode::CREATED, Json(key)))
}

/// GET /admin/keys — list all keys, secrets masked
async fn list_keys(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<KeyInfo>>, AppError> {
    let keys = key_service::list_keys(&state.db).await?;
    Ok(Json(keys))
}

/// GET /admin/keys/:id — single-key reveal accessor
async fn get_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Key>, AppError> {
    let key = key_service::get_key(&state.db, &id).await?;
    Ok(Json(key))
}

/// DELETE /admin/keys/:id — delete a key, cascading its bindings
async fn delete_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if !key_service::delete_key(&state.db, &id).await? {
        return Err(AppError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/keys/:id/reset — zero the usage counters
async fn reset_key_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<KeyInfo>, AppError> {
    let key = key_service::reset_key_stats(&state.db, &id).await?;
    Ok(Json(KeyInfo::from(key)))
}

/// POST /admin/keys/:id/spend — fold externally accrued spend into the key
async fn record_spend(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SpendReportRequest>,
) -> Result<Json<KeyInfo>, AppError> {
    let key = key_service::record_spend(&state.db, &id, body.amount, Utc::now()).await?;
    Ok(Json(KeyInfo::from(key)))
}

// ── Backup key endpoints ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateBackupKeyRequest {
    pub id: String,
    pub secret: String,
    pub provider: Option<String>,
}

/// POST /admin/backup-keys — add a credential to the reserve
async fn create_backup_key(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBackupKeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let provider = parse_provider(body.provider.as_deref())?;
    let backup =
        backup_service::create_backup_key(&state.db, &body.id, &body.secret, provider).await?;
    Ok((StatusCode::CREATED, Json(BackupKeyInfo::from(backup))))
}

/// GET /admin/backup-keys — list the reserve, secrets masked
async fn list_backup_keys(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BackupKeyInfo>>, AppError> {
    let keys = backup_service::list_backup_keys(&state.db).await?;
    Ok(Json(keys))
}

/// DELETE /admin/backup-keys/:id
async fn delete_backup_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if !backup_service::delete_backup_key(&state.db, &id).await? {
        return Err(AppError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/backup-keys/:id/restore — return a used backup to the pool
async fn restore_backup_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BackupKeyInfo>, AppError> {
    let backup =
        backup_service::restore_backup_key(&state.db, &id, &state.config, Utc::now()).await?;
    Ok(Json(BackupKeyInfo::from(backup)))
}

/// GET /admin/backup-keys/stats
async fn backup_key_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BackupKeyStats>, AppError> {
    let stats = backup_service::backup_key_stats(&state.db).await?;
    Ok(Json(stats))
}

// ── Proxy endpoints ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateProxyRequest {
    pub id: String,
    pub name: String,
    pub endpoint: String,
}

/// POST /admin/proxies
async fn create_proxy(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateProxyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let proxy =
        proxy_service::create_proxy(&state.db, &body.id, &body.name, &body.endpoint).await?;
    Ok((StatusCode::CREATED, Json(proxy)))
}

/// GET /admin/proxies
async fn list_proxies(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Proxy>>, AppError> {
    let proxies = proxy_service::list_proxies(&state.db).await?;
    Ok(Json(proxies))
}

/// DELETE /admin/proxies/:id — delete a proxy and its bindings
async fn delete_proxy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    proxy_service::delete_proxy(&state.db, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Binding endpoints ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateBindingRequest {
    pub proxy_id: String,
    pub key_id: String,
    pub priority: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBindingRequest {
    pub priority: Option<i64>,
    pub is_active: Option<bool>,
}

/// POST /admin/bindings
async fn create_binding(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBindingRequest>,
) -> Result<impl IntoResponse, AppError> {
    let binding =
        binding_service::create_binding(&state.db, &body.proxy_id, &body.key_id, body.priority)
            .await?;
    Ok((StatusCode::CREATED, Json(binding)))
}

/// GET /admin/bindings — annotated listing; orphans are healed before the
/// response is built
async fn list_bindings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BindingView>>, AppError> {
    let bindings =
        binding_service::list_bindings(&state.db, state.config.repair_strategy).await?;
    Ok(Json(bindings))
}

/// GET /admin/proxies/:id/bindings — selection order for one proxy
async fn bindings_for_proxy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Binding>>, AppError> {
    let bindings = binding_service::bindings_for_proxy(&state.db, &id).await?;
    Ok(Json(bindings))
}

/// DELETE /admin/proxies/:id/bindings — drop every binding for a proxy
async fn delete_proxy_bindings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let deleted = binding_service::delete_all_for_proxy(&state.db, &id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

/// PUT /admin/bindings/:proxy_id/:key_id
async fn update_binding(
    State(state): State<Arc<AppState>>,
    Path((proxy_id, key_id)): Path<(String, String)>,
    Json(body): Json<UpdateBindingRequest>,
) -> Result<Json<Binding>, AppError> {
    let binding = binding_service::update_binding(
        &state.db,
        &proxy_id,
        &key_id,
        body.priority,
        body.is_active,
    )
    .await?;
    Ok(Json(binding))
}

/// DELETE /admin/bindings/:proxy_id/:key_id
async fn delete_binding(
    State(state): State<Arc<AppState>>,
    Path((proxy_id, key_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    binding_service::delete_binding(&state.db, &proxy_id, &key_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Reconciliation & spend endpoints ──────────────────────────────────

/// POST /admin/repair-bindings — explicit repair action
async fn repair_bindings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RepairReport>, AppError> {
    let report =
        reconciler::repair_bindings(&state.db, state.config.repair_strategy).await?;
    Ok(Json(report))
}

/// GET /admin/spend/summary — per-key spend vs. threshold
async fn spend_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SpendSummaryEntry>>, AppError> {
    let summary =
        spend_monitor::spend_summary(&state.db, state.config.spend_threshold).await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub key_id: Option<String>,
}

/// GET /admin/spend/history — paginated audit trail
async fn spend_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryListResponse>, AppError> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(50).clamp(1, 200);
    let result = spend_monitor::spend_history(&state.db, page, per_page, query.key_id).await?;
    Ok(Json(result))
}

// ── Router ────────────────────────────────────────────────────────────

/// Build the admin router (to be nested under /admin)
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Keys
        .route("/keys", post(create_key).get(list_keys))
        .route("/keys/{id}", get(get_key).delete(delete_key))
        .route("/keys/{id}/reset", post(reset_key_stats))
        .route("/keys/{id}/spend", post(record_spend))
        // Backup keys
        .route("/backup-keys", post(create_backup_key).get(list_backup_keys))
        .route("/backup-keys/stats", get(backup_key_stats))
        .route("/backup-keys/{id}", delete(delete_backup_key))
        .route("/backup-keys/{id}/restore", post(restore_backup_key))
        // Proxies
        .route("/proxies", post(create_proxy).get(list_proxies))
        .route("/proxies/{id}", delete(delete_proxy))
        .route(
            "/proxies/{id}/bindings",
            get(bindings_for_proxy).delete(delete_proxy_bindings),
        )
        // Bindings
        .route("/bindings", post(create_binding).get(list_bindings))
        .route(
            "/bindings/{proxy_id}/{key_id}",
            put(update_binding).delete(delete_binding),
        )
        // Reconciliation & spend
        .route("/repair-bindings", post(repair_bindings))
        .route("/spend/summary", get(spend_summary))
        .route("/spend/history", get(spend_history))
}
