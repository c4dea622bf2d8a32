use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::binding::Binding;
use crate::models::key::{Key, ProviderKind};
use crate::services::{binding_service, key_service};
use crate::state::AppState;

/// Keys waiting for replacement. Secrets are intentionally unmasked: the
/// rotation script needs them to identify which upstream account to top up.
#[derive(Debug, Serialize)]
pub struct RefreshStatusResponse {
    pub count: usize,
    pub keys: Vec<Key>,
}

#[derive(Debug, Deserialize)]
pub struct InjectKeyRequest {
    pub api_key: String,
    pub replace_key_id: Option<String>,
    pub name: Option<String>,
    pub provider: Option<String>,
}

/// A failed default binding is reported in `warning`, never as a request
/// failure: the created key is the guarantee of this endpoint.
#[derive(Debug, Serialize)]
pub struct InjectKeyResponse {
    pub key: Key,
    pub binding: Option<Binding>,
    pub warning: Option<String>,
    pub replaced_key: Option<String>,
}

/// GET /webhook/status
async fn refresh_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshStatusResponse>, AppError> {
    let keys = key_service::keys_needing_refresh(&state.db).await?;
    Ok(Json(RefreshStatusResponse {
        count: keys.len(),
        keys,
    }))
}

/// POST /webhook/keys — inject a fresh key, optionally replacing an old one
async fn inject_key(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InjectKeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    if body.api_key.trim().is_empty() {
        return Err(AppError::BadRequest("api_key is required".into()));
    }

    let provider = match body.provider.as_deref() {
        None => ProviderKind::OneApi,
        Some(s) => ProviderKind::from_str(s).ok_or_else(|| {
            AppError::BadRequest(format!(
                "Unknown provider kind: {s}. Supported: one_api, new_api"
            ))
        })?,
    };

    // Best-effort replacement: a missing or stubborn old key is logged, not
    // fatal — the fresh key must land regardless.
    let mut replaced_key = None;
    if let Some(old_id) = body.replace_key_id.as_deref() {
        match key_service::delete_key(&state.db, old_id).await {
            Ok(true) => replaced_key = Some(old_id.to_string()),
            Ok(false) => {
                tracing::warn!(key_id = old_id, "replace target not found, continuing");
            }
            Err(e) => {
                tracing::warn!(key_id = old_id, "failed to delete replaced key: {}", e);
            }
        }
    }

    let id = generate_key_id(body.name.as_deref(), Utc::now());
    let key = key_service::create_key(&state.db, &id, &body.api_key, provider).await?;

    let (binding, warning) = match binding_service::create_binding(
        &state.db,
        &state.config.default_proxy_id,
        &key.id,
        1,
    )
    .await
    {
        Ok(b) => (Some(b), None),
        Err(e) => {
            tracing::warn!(key_id = %key.id, "default binding failed: {}", e);
            (
                None,
                Some(format!(
                    "key created, but binding to proxy {} failed: {e}",
                    state.config.default_proxy_id
                )),
            )
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(InjectKeyResponse {
            key,
            binding,
            warning,
            replaced_key,
        }),
    ))
}

/// Webhook-assigned key ids: caller-supplied name (or a fixed prefix), a
/// timestamp, and a random suffix for uniqueness.
fn generate_key_id(name: Option<&str>, now: DateTime<Utc>) -> String {
    let prefix = name
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("wh");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, now.format("%Y%m%d%H%M%S"), &suffix[..8])
}

/// Build the webhook router (to be nested under /webhook)
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(refresh_status))
        .route("/keys", post(inject_key))
}
