//! In-process `UsageStore` with the same admission and upsert semantics as
//! the PostgreSQL store. Used by tests and local runs without a database.

use crate::models::{
    AccessGrant, CreateAccess, CreatePlan, CycleLookup, FeatureKey, Plan, UpsertCycleRecord,
    UsageRecord, UserAccess,
};
use crate::services::store::UsageStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct State {
    plans: HashMap<String, Plan>,
    accesses: Vec<UserAccess>,
    records: Vec<UsageRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("memory store lock poisoned")))
    }

    pub fn create_plan(&self, input: &CreatePlan) -> Result<Plan, AppError> {
        let mut state = self.lock()?;
        if state.plans.contains_key(&input.plan_id) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Plan {} already exists",
                input.plan_id
            )));
        }
        let plan = Plan {
            plan_id: input.plan_id.clone(),
            daily_quota_credits: input.daily_quota_credits,
            monthly_quota_credits: input.monthly_quota_credits,
            storage_quota_mb: input.storage_quota_mb,
            created_utc: Utc::now(),
        };
        state.plans.insert(plan.plan_id.clone(), plan.clone());
        Ok(plan)
    }

    pub fn create_access(&self, input: &CreateAccess) -> Result<UserAccess, AppError> {
        let mut state = self.lock()?;
        if !state.plans.contains_key(&input.plan_id) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Unknown plan {}",
                input.plan_id
            )));
        }
        let access = UserAccess {
            access_id: Uuid::new_v4(),
            user_id: input.user_id,
            plan_id: input.plan_id.clone(),
            external_subscription_id: input.external_subscription_id.clone(),
            created_utc: Utc::now(),
            expires_at: input.expires_at,
        };
        state.accesses.push(access.clone());
        Ok(access)
    }

    /// Overwrite a record's usage, bypassing quota checks. For seeding.
    pub fn set_used_amount(&self, record_id: Uuid, used_amount: i64) -> Result<(), AppError> {
        let mut state = self.lock()?;
        let record = state
            .records
            .iter_mut()
            .find(|r| r.record_id == record_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Record {} not found", record_id)))?;
        record.used_amount = used_amount;
        Ok(())
    }

    /// Snapshot of every record, oldest first.
    pub fn records(&self) -> Vec<UsageRecord> {
        self.lock().map(|s| s.records.clone()).unwrap_or_default()
    }

    /// Latest access by `created_utc`; later pushes win ties.
    fn latest_access(state: &State, user_id: Uuid) -> Option<&UserAccess> {
        state
            .accesses
            .iter()
            .enumerate()
            .filter(|(_, a)| a.user_id == user_id)
            .max_by_key(|(i, a)| (a.created_utc, *i))
            .map(|(_, a)| a)
    }

    fn grant(state: &State, access: &UserAccess) -> Option<AccessGrant> {
        state.plans.get(&access.plan_id).map(|plan| AccessGrant {
            access: access.clone(),
            plan: plan.clone(),
        })
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.lock().map(|_| ())
    }

    async fn find_access(&self, user_id: Uuid) -> Result<Option<AccessGrant>, AppError> {
        let state = self.lock()?;
        Ok(Self::latest_access(&state, user_id).and_then(|a| Self::grant(&state, a)))
    }

    async fn list_active_accesses(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AccessGrant>, AppError> {
        let guard = self.lock()?;
        let state: &State = &guard;
        let users: BTreeSet<Uuid> = state.accesses.iter().map(|a| a.user_id).collect();
        Ok(users
            .into_iter()
            .filter_map(|user_id| Self::latest_access(state, user_id))
            .filter(|a| a.is_active_at(now))
            .filter_map(|a| Self::grant(state, a))
            .filter(|g| !g.plan.monthly_metered_features().is_empty())
            .collect())
    }

    async fn find_usage_record(
        &self,
        user_id: Uuid,
        feature: FeatureKey,
        lookup: CycleLookup,
    ) -> Result<Option<UsageRecord>, AppError> {
        let state = self.lock()?;
        let mut candidates = state
            .records
            .iter()
            .filter(|r| r.user_id == user_id && r.feature_key == feature.as_str());

        let found = match lookup {
            CycleLookup::StartingAt(ts) => candidates.find(|r| r.cycle_started_at == ts),
            CycleLookup::LatestStartedBy(ts) => candidates
                .filter(|r| r.cycle_started_at <= ts)
                .max_by_key(|r| r.cycle_started_at),
        };
        Ok(found.cloned())
    }

    async fn increment_usage(
        &self,
        record_id: Uuid,
        cost: i64,
        quota: Option<i64>,
    ) -> Result<Option<i64>, AppError> {
        let mut state = self.lock()?;
        let Some(record) = state.records.iter_mut().find(|r| r.record_id == record_id) else {
            return Ok(None);
        };

        if let Some(quota) = quota {
            if record.used_amount > quota - cost {
                return Ok(None);
            }
        }

        record.used_amount = record.used_amount.checked_add(cost).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "Usage for record {} would overflow",
                record_id
            ))
        })?;
        record.updated_utc = Utc::now();
        Ok(Some(record.used_amount))
    }

    async fn upsert_cycle_record(
        &self,
        input: &UpsertCycleRecord,
    ) -> Result<UsageRecord, AppError> {
        let mut state = self.lock()?;
        let now = Utc::now();

        if let Some(existing) = state.records.iter_mut().find(|r| {
            r.user_id == input.user_id
                && r.feature_key == input.feature.as_str()
                && r.cycle_started_at == input.cycle_started_at
        }) {
            existing.cycle_ends_at = input.cycle_ends_at;
            existing.updated_utc = now;
            return Ok(existing.clone());
        }

        let record = UsageRecord {
            record_id: Uuid::new_v4(),
            user_id: input.user_id,
            feature_key: input.feature.as_str().to_string(),
            used_amount: 0,
            cycle_started_at: input.cycle_started_at,
            cycle_ends_at: input.cycle_ends_at,
            created_utc: now,
            updated_utc: now,
        };
        state.records.push(record.clone());
        Ok(record)
    }
}
