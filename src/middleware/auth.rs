use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::state::AppState;

/// Header carrying the shared secret on the webhook and router surfaces.
pub const SHARED_SECRET_HEADER: &str = "x-webhook-secret";

/// Extract a Bearer token from the Authorization header.
fn extract_bearer(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn unauthenticated(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": { "code": "unauthenticated", "message": message } })),
    )
        .into_response()
}

/// Middleware that validates the admin key from env config.
pub async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let token = match extract_bearer(&req) {
        Some(t) => t,
        None => return unauthenticated("Missing Authorization header"),
    };

    if token != state.config.admin_key {
        return unauthenticated("Invalid admin key");
    }

    next.run(req).await
}

/// Middleware for the machine-to-machine surfaces: the rotation webhook and
/// the router read path. A missing server-side secret answers 500, not 401.
pub async fn shared_secret_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let expected = match state.config.webhook_secret.as_deref() {
        Some(s) => s,
        None => {
            tracing::error!("webhook shared secret is not configured");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": { "code": "internal", "message": "Webhook secret is not configured" }
                })),
            )
                .into_response();
        }
    };

    let provided = req
        .headers()
        .get(SHARED_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(p) if p == expected => next.run(req).await,
        Some(_) => unauthenticated("Invalid webhook secret"),
        None => unauthenticated("Missing webhook secret header"),
    }
}
