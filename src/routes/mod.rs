pub mod admin;
pub mod router_api;
pub mod webhook;

use std::sync::Arc;

use axum::{http::HeaderValue, middleware as axum_mw, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::middleware;
use crate::state::AppState;

/// Assemble the full application router. Shared by `main` and the
/// integration tests.
pub fn app(state: Arc<AppState>) -> Router {
    let admin_routes = admin::router().route_layer(axum_mw::from_fn_with_state(
        state.clone(),
        middleware::auth::admin_auth,
    ));

    let webhook_routes = webhook::router().route_layer(axum_mw::from_fn_with_state(
        state.clone(),
        middleware::auth::shared_secret_auth,
    ));

    let router_routes = router_api::router().route_layer(axum_mw::from_fn_with_state(
        state.clone(),
        middleware::auth::shared_secret_auth,
    ));

    let allow_origin = if state.config.cors_origin == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .cors_origin
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        AllowOrigin::list(origins)
    };

    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    Router::new()
        .nest("/admin", admin_routes)
        .nest("/webhook", webhook_routes)
        .nest("/router", router_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
