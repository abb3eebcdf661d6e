//! Usage ledger: admission control for metered features.

use crate::models::{
    day_window, remaining, AccessGrant, ChargeReceipt, CycleKind, CycleLookup, FeatureKey,
    UpsertCycleRecord, UsageRecord, UsageSummary,
};
use crate::services::metrics::{record_charge, record_credits_charged};
use crate::services::store::UsageStore;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("No active plan binding for user {0}")]
    AccessNotFound(Uuid),

    #[error("No usage record for user {user_id} feature {feature} in the current cycle")]
    UsageRecordMissing { user_id: Uuid, feature: FeatureKey },

    #[error("Quota exceeded for {feature}: cost {cost}, quota {quota:?}")]
    QuotaExceeded {
        feature: FeatureKey,
        cost: i64,
        quota: Option<i64>,
    },

    #[error("Cost must be a positive integer, got {0}")]
    InvalidCost(i64),

    #[error("Plan {0} is not metered daily")]
    NotDailyMetered(String),

    #[error(transparent)]
    Store(#[from] AppError),
}

impl LedgerError {
    fn outcome(&self) -> &'static str {
        match self {
            LedgerError::AccessNotFound(_) => "access_not_found",
            LedgerError::UsageRecordMissing { .. } => "record_missing",
            LedgerError::QuotaExceeded { .. } => "quota_exceeded",
            LedgerError::InvalidCost(_) => "invalid_cost",
            LedgerError::NotDailyMetered(_) => "not_daily_metered",
            LedgerError::Store(_) => "store_error",
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AccessNotFound(_) => AppError::Forbidden(anyhow::anyhow!(err.to_string())),
            LedgerError::UsageRecordMissing { .. } => {
                AppError::InternalError(anyhow::anyhow!(err.to_string()))
            }
            LedgerError::QuotaExceeded { .. } => AppError::TooManyRequests(err.to_string(), None),
            LedgerError::InvalidCost(_) | LedgerError::NotDailyMetered(_) => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            LedgerError::Store(inner) => inner,
        }
    }
}

/// Gates and accounts for metered feature consumption.
///
/// `charge` must be called before the paid action; any error means the action
/// must not run. A successful charge is durable and has no refund path.
#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn UsageStore>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    pub async fn charge(
        &self,
        user_id: Uuid,
        feature: FeatureKey,
        cost: i64,
    ) -> Result<ChargeReceipt, LedgerError> {
        self.charge_at(user_id, feature, cost, Utc::now()).await
    }

    #[instrument(skip(self), fields(user_id = %user_id, feature = %feature))]
    pub async fn charge_at(
        &self,
        user_id: Uuid,
        feature: FeatureKey,
        cost: i64,
        now: DateTime<Utc>,
    ) -> Result<ChargeReceipt, LedgerError> {
        let result = self.try_charge(user_id, feature, cost, now).await;

        match &result {
            Ok(receipt) => {
                record_charge(feature.as_str(), "admitted");
                record_credits_charged(feature.as_str(), cost);
                tracing::info!(
                    record_id = %receipt.record_id,
                    cost = cost,
                    used_amount = receipt.used_amount,
                    "Charge admitted"
                );
            }
            Err(e) => {
                record_charge(feature.as_str(), e.outcome());
                match e {
                    LedgerError::UsageRecordMissing { .. } => {
                        tracing::error!(error = %e, "Current cycle record missing; reset scheduler lagging or cycle computation wrong");
                    }
                    LedgerError::Store(inner) => {
                        tracing::error!(error = %e, error_kind = inner.kind(), "Charge failed")
                    }
                    _ => tracing::info!(error = %e, "Charge denied"),
                }
            }
        }

        result
    }

    async fn try_charge(
        &self,
        user_id: Uuid,
        feature: FeatureKey,
        cost: i64,
        now: DateTime<Utc>,
    ) -> Result<ChargeReceipt, LedgerError> {
        if cost <= 0 {
            return Err(LedgerError::InvalidCost(cost));
        }

        let grant = self.active_grant(user_id, now).await?;
        let record = self.current_record(&grant, feature, now).await?;
        let quota = grant.plan.quota_for(feature);

        let used_amount = self
            .store
            .increment_usage(record.record_id, cost, quota)
            .await?
            .ok_or(LedgerError::QuotaExceeded {
                feature,
                cost,
                quota,
            })?;

        Ok(ChargeReceipt {
            record_id: record.record_id,
            user_id,
            feature,
            cost,
            used_amount,
            quota,
            remaining: remaining(quota, used_amount),
            cycle_started_at: record.cycle_started_at,
            cycle_ends_at: record.cycle_ends_at,
        })
    }

    /// Current cycle usage for one feature. Read-only.
    #[instrument(skip(self), fields(user_id = %user_id, feature = %feature))]
    pub async fn usage_summary(
        &self,
        user_id: Uuid,
        feature: FeatureKey,
    ) -> Result<UsageSummary, LedgerError> {
        let now = Utc::now();
        let grant = self.active_grant(user_id, now).await?;
        let record = self.current_record(&grant, feature, now).await?;
        let quota = grant.plan.quota_for(feature);

        Ok(UsageSummary {
            user_id,
            plan_id: grant.plan.plan_id,
            feature,
            used_amount: record.used_amount,
            quota,
            remaining: remaining(quota, record.used_amount),
            cycle_started_at: record.cycle_started_at,
            cycle_ends_at: record.cycle_ends_at,
        })
    }

    pub async fn open_daily_cycle(
        &self,
        user_id: Uuid,
        feature: FeatureKey,
    ) -> Result<UsageRecord, LedgerError> {
        self.open_daily_cycle_at(user_id, feature, Utc::now()).await
    }

    /// Materialize today's record for a daily-metered (free tier) principal.
    /// Idempotent; existing usage is kept. `charge` never calls this.
    #[instrument(skip(self), fields(user_id = %user_id, feature = %feature))]
    pub async fn open_daily_cycle_at(
        &self,
        user_id: Uuid,
        feature: FeatureKey,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord, LedgerError> {
        let grant = self.active_grant(user_id, now).await?;
        if grant.plan.cycle_kind() != CycleKind::Daily {
            return Err(LedgerError::NotDailyMetered(grant.plan.plan_id));
        }

        let window = day_window(now);
        let record = self
            .store
            .upsert_cycle_record(&UpsertCycleRecord {
                user_id,
                feature,
                cycle_started_at: window.start,
                cycle_ends_at: window.end.min(grant.access.expires_at),
            })
            .await?;

        tracing::debug!(record_id = %record.record_id, "Daily cycle opened");
        Ok(record)
    }

    async fn active_grant(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AccessGrant, LedgerError> {
        self.store
            .find_access(user_id)
            .await?
            .filter(|g| g.access.is_active_at(now))
            .ok_or(LedgerError::AccessNotFound(user_id))
    }

    async fn current_record(
        &self,
        grant: &AccessGrant,
        feature: FeatureKey,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord, LedgerError> {
        let lookup = match grant.plan.cycle_kind() {
            CycleKind::Daily => CycleLookup::StartingAt(day_window(now).start),
            CycleKind::Monthly => CycleLookup::LatestStartedBy(now),
        };

        self.store
            .find_usage_record(grant.access.user_id, feature, lookup)
            .await?
            .ok_or(LedgerError::UsageRecordMissing {
                user_id: grant.access.user_id,
                feature,
            })
    }
}
