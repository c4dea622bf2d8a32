use std::collections::HashSet;

use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::AppError;
use crate::models::binding::Binding;

/// What to do with an orphaned binding. `Delete` is the safe default;
/// `Reassign` substitutes a healthy key when one can be named without
/// violating the (proxy, key) uniqueness invariant, and deletes otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStrategy {
    Delete,
    Reassign,
}

impl RepairStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairStrategy::Delete => "delete",
            RepairStrategy::Reassign => "reassign",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "delete" => Some(RepairStrategy::Delete),
            "reassign" => Some(RepairStrategy::Reassign),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RepairReport {
    pub checked: u64,
    pub repaired: u64,
    pub deleted: u64,
}

/// Substitute candidate for an orphan on `proxy_id`: a healthy key that is
/// not already bound to that proxy, so the rewrite cannot collide with an
/// existing pair. Oldest first keeps the choice deterministic.
async fn find_substitute(db: &SqlitePool, proxy_id: &str) -> Result<Option<String>, AppError> {
    let candidate: Option<String> = sqlx::query_scalar(
        r#"
        SELECT k.id
        FROM keys k
        WHERE k.status = 'healthy'
          AND k.id NOT IN (SELECT key_id FROM bindings WHERE proxy_id = ?)
        ORDER BY k.created_at
        LIMIT 1
        "#,
    )
    .bind(proxy_id)
    .fetch_optional(db)
    .await?;

    Ok(candidate)
}

/// Detect and heal bindings whose key no longer exists. Idempotent: with no
/// intervening mutation a second run reports `repaired = 0, deleted = 0`.
pub async fn repair_bindings(
    db: &SqlitePool,
    strategy: RepairStrategy,
) -> Result<RepairReport, AppError> {
    let bindings = sqlx::query_as::<_, Binding>("SELECT * FROM bindings")
        .fetch_all(db)
        .await?;

    let key_ids: HashSet<String> = sqlx::query_scalar::<_, String>("SELECT id FROM keys")
        .fetch_all(db)
        .await?
        .into_iter()
        .collect();

    let mut report = RepairReport {
        checked: bindings.len() as u64,
        repaired: 0,
        deleted: 0,
    };

    for binding in bindings.iter().filter(|b| !key_ids.contains(&b.key_id)) {
        if strategy == RepairStrategy::Reassign {
            if let Some(substitute) = find_substitute(db, &binding.proxy_id).await? {
                sqlx::query(
                    "UPDATE bindings SET key_id = ? WHERE proxy_id = ? AND key_id = ?",
                )
                .bind(&substitute)
                .bind(&binding.proxy_id)
                .bind(&binding.key_id)
                .execute(db)
                .await?;

                tracing::info!(
                    proxy_id = %binding.proxy_id,
                    orphan = %binding.key_id,
                    substitute = %substitute,
                    "reassigned orphaned binding"
                );
                report.repaired += 1;
                continue;
            }
        }

        sqlx::query("DELETE FROM bindings WHERE proxy_id = ? AND key_id = ?")
            .bind(&binding.proxy_id)
            .bind(&binding.key_id)
            .execute(db)
            .await?;

        tracing::info!(
            proxy_id = %binding.proxy_id,
            orphan = %binding.key_id,
            "deleted orphaned binding"
        );
        report.deleted += 1;
    }

    if strategy == RepairStrategy::Reassign && report.deleted > 0 {
        tracing::warn!(
            deleted = report.deleted,
            "partial repair: some orphans had no substitute and were deleted"
        );
    }

    Ok(report)
}
