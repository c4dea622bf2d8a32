use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// An outbound proxy endpoint traffic is routed through. Owned lightly
/// here: the pool only needs enough to annotate bindings and to give the
/// webhook a default target.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Proxy {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub created_at: DateTime<Utc>,
}
