mod common;

use chrono::{Duration, Utc};

use keypool_rs::error::AppError;
use keypool_rs::models::key::ProviderKind;
use keypool_rs::services::{
    backup_service, binding_service, key_service, proxy_service, spend_monitor,
};

async fn seed_pool_with_backup(db: &sqlx::SqlitePool) {
    proxy_service::create_proxy(db, "p1", "Proxy one", "socks5://10.0.0.1:1080")
        .await
        .unwrap();
    key_service::create_key(db, "k1", "sk-live-key-123456789", ProviderKind::OneApi)
        .await
        .unwrap();
    backup_service::create_backup_key(db, "b1", "sk-backup-key-9876543", ProviderKind::OneApi)
        .await
        .unwrap();
    binding_service::create_binding(db, "p1", "k1", 1).await.unwrap();
}

#[tokio::test]
async fn crossing_the_threshold_rotates_onto_the_backup() {
    let db = common::setup_pool().await;
    let config = common::test_config();
    seed_pool_with_backup(&db).await;

    key_service::record_spend(&db, "k1", 9.9, Utc::now())
        .await
        .unwrap();

    let report = spend_monitor::process_tick(&db, &config, Utc::now())
        .await
        .unwrap();
    assert_eq!(report.rotated, 1);

    // Retired key is out of rotation but still queryable.
    let old = key_service::get_key(&db, "k1").await.unwrap();
    assert_eq!(old.status, "need_refresh");

    // The backup was consumed and promoted to a first-class key.
    let backup = backup_service::get_backup_key(&db, "b1").await.unwrap();
    assert!(backup.is_used);
    assert!(backup.activated);
    assert_eq!(backup.used_for.as_deref(), Some("k1"));
    assert!(backup.used_at.is_some());

    let promoted = key_service::get_key(&db, "b1").await.unwrap();
    assert_eq!(promoted.status, "healthy");
    assert_eq!(promoted.secret, "sk-backup-key-9876543");

    // Bindings mirrored at the same priority, old ones deactivated.
    let routes = binding_service::routes_for_proxy(&db, "p1").await.unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].key_id, "b1");
    assert_eq!(routes[0].priority, 1);

    let old_binding = binding_service::get_binding(&db, "p1", "k1").await.unwrap();
    assert!(!old_binding.is_active);

    // The finalizing audit record points at the replacement.
    let history = spend_monitor::spend_history(&db, 1, 50, Some("k1".into()))
        .await
        .unwrap();
    let rotated: Vec<_> = history
        .data
        .iter()
        .filter(|r| r.rotated_at.is_some())
        .collect();
    assert_eq!(rotated.len(), 1);
    assert_eq!(rotated[0].new_key_id.as_deref(), Some("b1"));
    assert_eq!(
        rotated[0].rotation_reason.as_deref(),
        Some("spend_threshold_exceeded")
    );
    assert!(rotated[0].masked_secret.contains("..."));
}

#[tokio::test]
async fn rotation_happens_exactly_once_per_crossing() {
    let db = common::setup_pool().await;
    let config = common::test_config();
    seed_pool_with_backup(&db).await;

    key_service::record_spend(&db, "k1", 9.9, Utc::now())
        .await
        .unwrap();

    for _ in 0..3 {
        spend_monitor::process_tick(&db, &config, Utc::now())
            .await
            .unwrap();
    }

    let rotated_records: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM spend_history WHERE key_id = 'k1' AND rotated_at IS NOT NULL",
    )
    .fetch_one(&db)
    .await
    .unwrap();
    assert_eq!(rotated_records, 1);

    // Later ticks keep auditing the replacement key, below threshold.
    let below: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM spend_history WHERE key_id = 'b1' AND rotated_at IS NULL",
    )
    .fetch_one(&db)
    .await
    .unwrap();
    assert!(below >= 1);
}

#[tokio::test]
async fn empty_reserve_leaves_the_key_degraded_but_safe() {
    let db = common::setup_pool().await;
    let config = common::test_config();

    proxy_service::create_proxy(&db, "p1", "Proxy one", "socks5://10.0.0.1:1080")
        .await
        .unwrap();
    key_service::create_key(&db, "k1", "sk-live-key-123456789", ProviderKind::OneApi)
        .await
        .unwrap();
    binding_service::create_binding(&db, "p1", "k1", 1).await.unwrap();
    key_service::record_spend(&db, "k1", 9.9, Utc::now())
        .await
        .unwrap();

    let report = spend_monitor::process_tick(&db, &config, Utc::now())
        .await
        .unwrap();
    assert_eq!(report.rotated, 0);

    let key = key_service::get_key(&db, "k1").await.unwrap();
    assert_eq!(key.status, "need_refresh");

    // Surfaced to the rotation script.
    let waiting = key_service::keys_needing_refresh(&db).await.unwrap();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].id, "k1");

    // The crossing was audited but nothing claims a rotation happened.
    let rotated_records: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM spend_history WHERE rotated_at IS NOT NULL",
    )
    .fetch_one(&db)
    .await
    .unwrap();
    assert_eq!(rotated_records, 0);
}

#[tokio::test]
async fn interrupted_rotation_is_resumed_on_the_next_tick() {
    let db = common::setup_pool().await;
    let config = common::test_config();
    seed_pool_with_backup(&db).await;

    // A rotation that stopped right after promotion: backup consumed, key
    // retired, bindings untouched, no key row for the backup yet.
    let now = Utc::now();
    sqlx::query("UPDATE keys SET status = 'need_refresh', total_spend = 9.9 WHERE id = 'k1'")
        .execute(&db)
        .await
        .unwrap();
    sqlx::query(
        "UPDATE backup_keys SET is_used = 1, activated = 1, used_for = 'k1', used_at = ? WHERE id = 'b1'",
    )
    .bind(now)
    .execute(&db)
    .await
    .unwrap();

    let report = spend_monitor::process_tick(&db, &config, Utc::now())
        .await
        .unwrap();
    assert_eq!(report.resumed, 1);

    let promoted = key_service::get_key(&db, "b1").await.unwrap();
    assert_eq!(promoted.status, "healthy");

    let routes = binding_service::routes_for_proxy(&db, "p1").await.unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].key_id, "b1");

    let old_binding = binding_service::get_binding(&db, "p1", "k1").await.unwrap();
    assert!(!old_binding.is_active);

    // The resume finalized the audit trail for the original crossing.
    let rotated_records: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM spend_history WHERE key_id = 'k1' AND rotated_at IS NOT NULL",
    )
    .fetch_one(&db)
    .await
    .unwrap();
    assert_eq!(rotated_records, 1);

    // And a second tick has nothing left to resume.
    let report = spend_monitor::process_tick(&db, &config, Utc::now())
        .await
        .unwrap();
    assert_eq!(report.resumed, 0);
}

#[tokio::test]
async fn backup_is_single_use_until_restored() {
    let db = common::setup_pool().await;
    let config = common::test_config();

    backup_service::create_backup_key(&db, "b1", "sk-backup-key-9876543", ProviderKind::OneApi)
        .await
        .unwrap();

    backup_service::promote_next_idle(&db, "k1", Utc::now())
        .await
        .unwrap();

    // Consumed: a second promotion finds the reserve empty.
    let err = backup_service::promote_next_idle(&db, "k2", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NoBackupAvailable));

    let stats = backup_service::backup_key_stats(&db).await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.used, 1);
    assert_eq!(stats.activated, 1);

    // Restore clears the usage markers and the key is promotable again.
    let restored = backup_service::restore_backup_key(&db, "b1", &config, Utc::now())
        .await
        .unwrap();
    assert!(!restored.is_used);
    assert!(!restored.activated);
    assert!(restored.used_for.is_none());
    assert!(restored.used_at.is_none());

    let again = backup_service::promote_next_idle(&db, "k3", Utc::now())
        .await
        .unwrap();
    assert_eq!(again.id, "b1");
    assert_eq!(again.used_for.as_deref(), Some("k3"));
}

#[tokio::test]
async fn retention_sweep_purges_expired_backups() {
    let db = common::setup_pool().await;

    backup_service::create_backup_key(&db, "old", "sk-old-backup-1234567", ProviderKind::OneApi)
        .await
        .unwrap();
    backup_service::create_backup_key(&db, "fresh", "sk-new-backup-1234567", ProviderKind::OneApi)
        .await
        .unwrap();

    let now = Utc::now();
    backup_service::promote_next_idle(&db, "k-old", now - Duration::hours(7))
        .await
        .unwrap();
    backup_service::promote_next_idle(&db, "k-new", now - Duration::hours(5))
        .await
        .unwrap();

    let purged = backup_service::purge_expired(&db, 6, now).await.unwrap();
    assert_eq!(purged, 1);
    assert!(matches!(
        backup_service::get_backup_key(&db, "old").await.unwrap_err(),
        AppError::NotFound
    ));
    backup_service::get_backup_key(&db, "fresh").await.unwrap();

    // Idempotent: a second sweep has nothing left to purge.
    let purged = backup_service::purge_expired(&db, 6, now).await.unwrap();
    assert_eq!(purged, 0);
}

#[tokio::test]
async fn expired_backup_cannot_be_restored() {
    let db = common::setup_pool().await;
    let config = common::test_config();

    backup_service::create_backup_key(&db, "b1", "sk-old-backup-1234567", ProviderKind::OneApi)
        .await
        .unwrap();

    let now = Utc::now();
    backup_service::promote_next_idle(&db, "k1", now - Duration::hours(7))
        .await
        .unwrap();

    // Past its retention instant but not yet physically purged: still not
    // allowed back into the pool.
    let err = backup_service::restore_backup_key(&db, "b1", &config, now)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn rotation_mirrors_every_active_binding() {
    let db = common::setup_pool().await;
    let config = common::test_config();

    proxy_service::create_proxy(&db, "p1", "Proxy one", "socks5://10.0.0.1:1080")
        .await
        .unwrap();
    proxy_service::create_proxy(&db, "p2", "Proxy two", "socks5://10.0.0.2:1080")
        .await
        .unwrap();
    key_service::create_key(&db, "k1", "sk-live-key-123456789", ProviderKind::OneApi)
        .await
        .unwrap();
    backup_service::create_backup_key(&db, "b1", "sk-backup-key-9876543", ProviderKind::OneApi)
        .await
        .unwrap();

    binding_service::create_binding(&db, "p1", "k1", 2).await.unwrap();
    binding_service::create_binding(&db, "p2", "k1", 5).await.unwrap();
    // An already-inactive binding is not part of the mirror.
    binding_service::update_binding(&db, "p2", "k1", None, Some(false))
        .await
        .unwrap();

    key_service::record_spend(&db, "k1", 10.0, Utc::now())
        .await
        .unwrap();
    spend_monitor::process_tick(&db, &config, Utc::now())
        .await
        .unwrap();

    let p1_routes = binding_service::routes_for_proxy(&db, "p1").await.unwrap();
    assert_eq!(p1_routes.len(), 1);
    assert_eq!(p1_routes[0].key_id, "b1");
    assert_eq!(p1_routes[0].priority, 2);

    let p2_routes = binding_service::routes_for_proxy(&db, "p2").await.unwrap();
    assert!(p2_routes.is_empty());
}
