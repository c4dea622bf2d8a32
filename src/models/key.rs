use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The two interchangeable gateway integrations a key can belong to.
/// Both speak the same admin protocol, so the pool treats them uniformly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OneApi,
    NewApi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OneApi => "one_api",
            ProviderKind::NewApi => "new_api",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "one_api" => Some(ProviderKind::OneApi),
            "new_api" => Some(ProviderKind::NewApi),
            _ => None,
        }
    }
}

/// Key lifecycle: healthy -> need_refresh (spend crossed the threshold, do
/// not select for new bindings) -> replaced and deleted. `disabled` is an
/// operator-imposed terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Healthy,
    NeedRefresh,
    Disabled,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Healthy => "healthy",
            KeyStatus::NeedRefresh => "need_refresh",
            KeyStatus::Disabled => "disabled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "healthy" => Some(KeyStatus::Healthy),
            "need_refresh" => Some(KeyStatus::NeedRefresh),
            "disabled" => Some(KeyStatus::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Key {
    pub id: String,
    pub secret: String,
    pub provider: String,
    pub status: String,
    pub total_spend: f64,
    pub last_spend_check: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Listing view — the secret is always masked here. The full secret is only
/// returned by single-key reveal accessors and the webhook surface.
#[derive(Debug, Serialize)]
pub struct KeyInfo {
    pub id: String,
    pub secret_preview: String,
    pub provider: String,
    pub status: String,
    pub total_spend: f64,
    pub last_spend_check: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Key> for KeyInfo {
    fn from(k: Key) -> Self {
        Self {
            id: k.id,
            secret_preview: mask_secret(&k.secret),
            provider: k.provider,
            status: k.status,
            total_spend: k.total_spend,
            last_spend_check: k.last_spend_check,
            last_used_at: k.last_used_at,
            last_error: k.last_error,
            created_at: k.created_at,
        }
    }
}

/// Mask a credential for display: `first8...last4`. Anything short enough
/// that masking would leak most of it collapses to `****`.
pub fn mask_secret(secret: &str) -> String {
    if secret.len() > 12 {
        format!("{}...{}", &secret[..8], &secret[secret.len() - 4..])
    } else {
        "****".to_string()
    }
}
