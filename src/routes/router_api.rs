use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::error::AppError;
use crate::models::binding::KeyRoute;
use crate::services::binding_service;
use crate::state::AppState;

/// GET /router/proxies/:id/keys — the external router's read contract:
/// active bindings in priority order with each key's secret and status.
/// An unknown proxy yields an empty list; the router treats "no usable
/// keys" uniformly.
async fn proxy_keys(
    State(state): State<Arc<AppState>>,
    Path(proxy_id): Path<String>,
) -> Result<Json<Vec<KeyRoute>>, AppError> {
    let routes = binding_service::routes_for_proxy(&state.db, &proxy_id).await?;
    Ok(Json(routes))
}

/// Build the router-collaborator router (to be nested under /router)
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/proxies/{proxy_id}/keys", get(proxy_keys))
}
