//! Usage record model.

use super::FeatureKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Ledger entry for one (user, feature, cycle). Unique on
/// `(user_id, feature_key, cycle_started_at)`; never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UsageRecord {
    pub record_id: Uuid,
    pub user_id: Uuid,
    pub feature_key: String,
    pub used_amount: i64,
    pub cycle_started_at: DateTime<Utc>,
    pub cycle_ends_at: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl UsageRecord {
    pub fn feature(&self) -> Option<FeatureKey> {
        FeatureKey::parse(&self.feature_key)
    }
}

/// How to pick "the current record" for a user and feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleLookup {
    /// Exactly this cycle start (free-tier day key).
    StartingAt(DateTime<Utc>),
    /// Most recent cycle whose start is at or before this instant.
    LatestStartedBy(DateTime<Utc>),
}

/// Input for the keyed cycle upsert.
#[derive(Debug, Clone)]
pub struct UpsertCycleRecord {
    pub user_id: Uuid,
    pub feature: FeatureKey,
    pub cycle_started_at: DateTime<Utc>,
    pub cycle_ends_at: DateTime<Utc>,
}

/// Outcome of a committed charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub record_id: Uuid,
    pub user_id: Uuid,
    pub feature: FeatureKey,
    pub cost: i64,
    pub used_amount: i64,
    pub quota: Option<i64>,
    pub remaining: Option<i64>,
    pub cycle_started_at: DateTime<Utc>,
    pub cycle_ends_at: DateTime<Utc>,
}

/// Read-only view of a principal's current cycle for one feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSummary {
    pub user_id: Uuid,
    pub plan_id: String,
    pub feature: FeatureKey,
    pub used_amount: i64,
    pub quota: Option<i64>,
    pub remaining: Option<i64>,
    pub cycle_started_at: DateTime<Utc>,
    pub cycle_ends_at: DateTime<Utc>,
}

/// Credits left under `quota`, or `None` when unlimited.
pub fn remaining(quota: Option<i64>, used_amount: i64) -> Option<i64> {
    quota.map(|q| (q - used_amount).max(0))
}
