use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Append-only audit entry, one per spend check. A non-null `rotated_at`
/// marks the record that finalized a rotation.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SpendHistoryRecord {
    pub id: i64,
    pub key_id: String,
    pub masked_secret: String,
    pub spend: f64,
    pub threshold: f64,
    pub checked_at: DateTime<Utc>,
    pub was_active: bool,
    pub rotated_at: Option<DateTime<Utc>>,
    pub rotation_reason: Option<String>,
    pub new_key_id: Option<String>,
}

/// Per-key spend vs. threshold for the admin summary.
#[derive(Debug, Serialize)]
pub struct SpendSummaryEntry {
    pub key_id: String,
    pub secret_preview: String,
    pub status: String,
    pub total_spend: f64,
    pub threshold: f64,
    pub percent_used: f64,
}

#[derive(Debug, Serialize)]
pub struct HistoryListResponse {
    pub data: Vec<SpendHistoryRecord>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}
