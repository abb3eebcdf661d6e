//! Persistence boundary for usage metering.

use crate::models::{AccessGrant, CycleLookup, FeatureKey, UpsertCycleRecord, UsageRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use uuid::Uuid;

/// The three primitives the metering core needs from storage: keyed lookups,
/// a conditional update and a keyed upsert.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    /// Latest access for `user_id`, joined with its plan.
    async fn find_access(&self, user_id: Uuid) -> Result<Option<AccessGrant>, AppError>;

    /// Each user's latest access, kept when it has `expires_at > now` and is on
    /// a paid plan metering at least one monthly feature. Superseded accesses
    /// are never returned.
    async fn list_active_accesses(&self, now: DateTime<Utc>)
        -> Result<Vec<AccessGrant>, AppError>;

    async fn find_usage_record(
        &self,
        user_id: Uuid,
        feature: FeatureKey,
        lookup: CycleLookup,
    ) -> Result<Option<UsageRecord>, AppError>;

    /// Add `cost` to the record only if the result stays within `quota`
    /// (`None` = unbounded). One atomic statement. Returns the new
    /// `used_amount`, or `None` when no row qualified.
    async fn increment_usage(
        &self,
        record_id: Uuid,
        cost: i64,
        quota: Option<i64>,
    ) -> Result<Option<i64>, AppError>;

    /// Create the record with `used_amount = 0`, or refresh `cycle_ends_at`
    /// on the existing one. Never resets usage.
    async fn upsert_cycle_record(&self, input: &UpsertCycleRecord)
        -> Result<UsageRecord, AppError>;
}
