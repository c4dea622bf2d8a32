use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Assignment of a key to a proxy. `key_id` is a weak reference: the key
/// registry owns the key lifecycle, and a binding left behind after a key
/// deletion is an orphan until the reconciler heals it.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Binding {
    pub proxy_id: String,
    pub key_id: String,
    pub priority: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Admin listing view, annotated at read time with the owning proxy's
/// display name and the key's current status and spend. `key_status = None`
/// means the referenced key no longer exists — an orphan.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BindingView {
    pub proxy_id: String,
    pub proxy_name: Option<String>,
    pub key_id: String,
    pub key_status: Option<String>,
    pub key_spend: Option<f64>,
    pub priority: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl BindingView {
    pub fn is_orphaned(&self) -> bool {
        self.key_status.is_none()
    }
}

/// One entry of the external router's read contract: active bindings for a
/// proxy in ascending priority order, with the credential it needs to call
/// upstream. A key whose status is not `healthy` is unusable to the router.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct KeyRoute {
    pub key_id: String,
    pub secret: String,
    pub status: String,
    pub priority: i64,
}
