mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use keypool_rs::models::key::ProviderKind;
use keypool_rs::routes;
use keypool_rs::services::{binding_service, key_service, proxy_service, spend_monitor};

const ADMIN_BEARER: &str = "Bearer test-admin-key";

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn admin_get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, ADMIN_BEARER)
        .body(Body::empty())
        .unwrap()
}

fn admin_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, ADMIN_BEARER)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn admin_surface_requires_the_admin_key() {
    let state = common::setup_state().await;
    let app = routes::app(state);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/admin/keys").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "unauthenticated");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/admin/keys")
                .header(header::AUTHORIZATION, "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn key_lifecycle_over_http() {
    let state = common::setup_state().await;
    let app = routes::app(state);

    let response = app
        .clone()
        .oneshot(admin_post(
            "/admin/keys",
            json!({ "id": "k1", "secret": "sk-abcdef1234567890" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // Duplicate creation reports a stable error code.
    let response = app
        .clone()
        .oneshot(admin_post(
            "/admin/keys",
            json!({ "id": "k1", "secret": "sk-abcdef1234567890" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "duplicate_id");

    // Listing masks, the reveal accessor does not.
    let response = app.clone().oneshot(admin_get("/admin/keys")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body[0]["secret_preview"], "sk-abcde...7890");
    assert!(body[0].get("secret").is_none());

    let response = app.clone().oneshot(admin_get("/admin/keys/k1")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["secret"], "sk-abcdef1234567890");

    // Delete, then the key is gone.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/admin/keys/k1")
                .header(header::AUTHORIZATION, ADMIN_BEARER)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.oneshot(admin_get("/admin/keys/k1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn repair_endpoint_reports_the_outcome() {
    let state = common::setup_state().await;

    key_service::create_key(&state.db, "doomed", "sk-doomed-key-1234567", ProviderKind::OneApi)
        .await
        .unwrap();
    binding_service::create_binding(&state.db, "default", "doomed", 1)
        .await
        .unwrap();
    sqlx::query("DELETE FROM keys WHERE id = 'doomed'")
        .execute(&state.db)
        .await
        .unwrap();

    let app = routes::app(state);
    let response = app
        .clone()
        .oneshot(admin_post("/admin/repair-bindings", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["checked"], 1);
    assert_eq!(body["deleted"], 1);
    assert_eq!(body["repaired"], 0);

    // Second run is a no-op.
    let response = app
        .oneshot(admin_post("/admin/repair-bindings", json!({})))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["deleted"], 0);
    assert_eq!(body["repaired"], 0);
}

#[tokio::test]
async fn listing_bindings_never_exposes_an_orphan() {
    let state = common::setup_state().await;

    key_service::create_key(&state.db, "doomed", "sk-doomed-key-1234567", ProviderKind::OneApi)
        .await
        .unwrap();
    key_service::create_key(&state.db, "alive", "sk-alive-key-1234567", ProviderKind::OneApi)
        .await
        .unwrap();
    binding_service::create_binding(&state.db, "default", "doomed", 1)
        .await
        .unwrap();
    binding_service::create_binding(&state.db, "default", "alive", 2)
        .await
        .unwrap();
    sqlx::query("DELETE FROM keys WHERE id = 'doomed'")
        .execute(&state.db)
        .await
        .unwrap();

    let app = routes::app(state);
    let response = app.oneshot(admin_get("/admin/bindings")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let views = body.as_array().unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0]["key_id"], "alive");
    assert_eq!(views[0]["key_status"], "healthy");
}

#[tokio::test]
async fn spend_summary_and_history_over_http() {
    let state = common::setup_state().await;
    let config = state.config.clone();

    key_service::create_key(&state.db, "k1", "sk-abcdef1234567890", ProviderKind::OneApi)
        .await
        .unwrap();
    key_service::record_spend(&state.db, "k1", 4.9, chrono::Utc::now())
        .await
        .unwrap();

    // Three monitor ticks, three history records.
    for _ in 0..3 {
        spend_monitor::process_tick(&state.db, &config, chrono::Utc::now())
            .await
            .unwrap();
    }

    let app = routes::app(state);
    let response = app
        .clone()
        .oneshot(admin_get("/admin/spend/summary"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body[0]["key_id"], "k1");
    assert_eq!(body[0]["total_spend"], 4.9);
    assert_eq!(body[0]["threshold"], 9.8);
    assert_eq!(body[0]["percent_used"], 50.0);

    let response = app
        .clone()
        .oneshot(admin_get("/admin/spend/history?page=1&per_page=2&key_id=k1"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["total"], 3);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["page"], 1);

    let response = app
        .oneshot(admin_get("/admin/spend/history?page=2&per_page=2&key_id=k1"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn router_surface_serves_the_selection_order() {
    let state = common::setup_state().await;

    proxy_service::create_proxy(&state.db, "p1", "Proxy one", "socks5://10.0.0.1:1080")
        .await
        .unwrap();
    key_service::create_key(&state.db, "k1", "sk-abcdef1234567890", ProviderKind::OneApi)
        .await
        .unwrap();
    key_service::create_key(&state.db, "k2", "sk-other-key-9876543", ProviderKind::OneApi)
        .await
        .unwrap();
    binding_service::create_binding(&state.db, "p1", "k1", 5).await.unwrap();
    binding_service::create_binding(&state.db, "p1", "k2", 1).await.unwrap();

    let app = routes::app(state);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/router/proxies/p1/keys")
                .header("x-webhook-secret", "test-webhook-secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let routes_list = body.as_array().unwrap();
    assert_eq!(routes_list.len(), 2);
    assert_eq!(routes_list[0]["key_id"], "k2");
    assert_eq!(routes_list[0]["secret"], "sk-other-key-9876543");
    assert_eq!(routes_list[1]["key_id"], "k1");
}
