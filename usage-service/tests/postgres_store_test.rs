//! PostgreSQL store tests. Require a running database:
//!
//! ```sh
//! TEST_DATABASE_URL=postgres://... cargo test -p usage-service -- --ignored
//! ```

mod common;

use chrono::Duration;
use common::{utc, TestDatabase, PRO_PLAN_ID, STUDIO_PLAN_ID};
use serial_test::serial;
use std::sync::Arc;
use usage_service::models::{CreateAccess, CycleLookup, FeatureKey, UpsertCycleRecord, FREE_PLAN_ID};
use usage_service::services::{LedgerError, UsageLedger, UsageStore};
use uuid::Uuid;

fn april(user_id: Uuid, feature: FeatureKey) -> UpsertCycleRecord {
    UpsertCycleRecord {
        user_id,
        feature,
        cycle_started_at: utc(2024, 4, 15, 0, 0, 0),
        cycle_ends_at: utc(2024, 5, 15, 0, 0, 0) - Duration::milliseconds(1),
    }
}

async fn grant(db: &TestDatabase, user_id: Uuid, plan_id: &str, subscription: Option<&str>) {
    db.db
        .create_access(&CreateAccess {
            user_id,
            plan_id: plan_id.to_string(),
            external_subscription_id: subscription.map(str::to_string),
            expires_at: utc(2099, 1, 1, 0, 0, 0),
        })
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn upsert_creates_then_refreshes_end_only() {
    let app = TestDatabase::spawn().await;
    let user_id = Uuid::new_v4();

    let mut input = april(user_id, FeatureKey::AiCredits);
    input.cycle_ends_at = utc(2024, 5, 1, 0, 0, 0);
    let created = app.db.upsert_cycle_record(&input).await.unwrap();
    assert_eq!(created.used_amount, 0);

    assert_eq!(
        app.db.increment_usage(created.record_id, 40, Some(500)).await.unwrap(),
        Some(40)
    );

    let refreshed = app
        .db
        .upsert_cycle_record(&april(user_id, FeatureKey::AiCredits))
        .await
        .unwrap();
    assert_eq!(refreshed.record_id, created.record_id);
    assert_eq!(refreshed.used_amount, 40);
    assert_eq!(
        refreshed.cycle_ends_at,
        utc(2024, 5, 15, 0, 0, 0) - Duration::milliseconds(1)
    );

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
#[serial]
async fn conditional_increment_respects_quota() {
    let app = TestDatabase::spawn().await;
    let record = app
        .db
        .upsert_cycle_record(&april(Uuid::new_v4(), FeatureKey::AiCredits))
        .await
        .unwrap();

    assert_eq!(
        app.db.increment_usage(record.record_id, 10, Some(10)).await.unwrap(),
        Some(10)
    );
    assert_eq!(
        app.db.increment_usage(record.record_id, 1, Some(10)).await.unwrap(),
        None
    );
    assert_eq!(
        app.db.increment_usage(record.record_id, 1_000, None).await.unwrap(),
        Some(1_010)
    );

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
#[serial]
async fn lookups_pick_the_right_cycle() {
    let app = TestDatabase::spawn().await;
    let user_id = Uuid::new_v4();

    let april_record = app
        .db
        .upsert_cycle_record(&april(user_id, FeatureKey::AiCredits))
        .await
        .unwrap();
    app.db
        .upsert_cycle_record(&UpsertCycleRecord {
            user_id,
            feature: FeatureKey::AiCredits,
            cycle_started_at: utc(2024, 5, 15, 0, 0, 0),
            cycle_ends_at: utc(2024, 6, 15, 0, 0, 0) - Duration::milliseconds(1),
        })
        .await
        .unwrap();

    let latest = app
        .db
        .find_usage_record(
            user_id,
            FeatureKey::AiCredits,
            CycleLookup::LatestStartedBy(utc(2024, 5, 1, 0, 0, 0)),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.record_id, april_record.record_id);

    let exact = app
        .db
        .find_usage_record(
            user_id,
            FeatureKey::AiCredits,
            CycleLookup::StartingAt(utc(2024, 4, 16, 0, 0, 0)),
        )
        .await
        .unwrap();
    assert!(exact.is_none());

    let other_feature = app
        .db
        .find_usage_record(
            user_id,
            FeatureKey::StorageMb,
            CycleLookup::LatestStartedBy(utc(2024, 5, 1, 0, 0, 0)),
        )
        .await
        .unwrap();
    assert!(other_feature.is_none());

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
#[serial]
async fn active_accesses_exclude_free_and_unmetered_plans() {
    let app = TestDatabase::spawn().await;
    let paid = Uuid::new_v4();
    grant(&app, paid, PRO_PLAN_ID, Some("sub_1")).await;
    grant(&app, Uuid::new_v4(), FREE_PLAN_ID, None).await;
    grant(&app, Uuid::new_v4(), STUDIO_PLAN_ID, Some("sub_2")).await;

    // Moved from PRO to FREE: the superseded PRO access must not be listed.
    let downgraded = Uuid::new_v4();
    grant(&app, downgraded, PRO_PLAN_ID, Some("sub_3")).await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    grant(&app, downgraded, FREE_PLAN_ID, None).await;

    let active = app
        .db
        .list_active_accesses(utc(2024, 4, 20, 0, 0, 0))
        .await
        .unwrap();

    assert_eq!(active.len(), 1);
    assert_eq!(active[0].access.user_id, paid);
    assert_eq!(active[0].plan.monthly_quota_credits, Some(500));

    app.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
#[serial]
async fn concurrent_charges_never_overshoot_quota() {
    let app = TestDatabase::spawn().await;
    let user_id = Uuid::new_v4();
    grant(&app, user_id, PRO_PLAN_ID, Some("sub_1")).await;
    let record = app
        .db
        .upsert_cycle_record(&april(user_id, FeatureKey::AiCredits))
        .await
        .unwrap();
    sqlx::query("UPDATE usage_records SET used_amount = 410 WHERE record_id = $1")
        .bind(record.record_id)
        .execute(app.db.pool())
        .await
        .unwrap();

    let ledger = Arc::new(UsageLedger::new(Arc::new(app.db.clone())));
    let now = utc(2024, 4, 20, 12, 0, 0);
    let handles: Vec<_> = (0..50)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .charge_at(user_id, FeatureKey::AiCredits, 3, now)
                    .await
            })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(LedgerError::QuotaExceeded { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let final_used = app
        .db
        .find_usage_record(
            user_id,
            FeatureKey::AiCredits,
            CycleLookup::StartingAt(record.cycle_started_at),
        )
        .await
        .unwrap()
        .unwrap()
        .used_amount;

    assert_eq!(admitted, 30);
    assert_eq!(final_used, 500);

    app.cleanup().await;
}
