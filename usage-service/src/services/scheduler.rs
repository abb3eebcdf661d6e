//! Monthly cycle reset scheduler.
//!
//! Every run walks the active paid accesses and makes sure each metered
//! feature has a record for the cycle containing "now", anchored to the
//! subscription's real start date. Usage is reset only by virtue of a new
//! cycle start producing a new row; existing rows only get their end refreshed.

use crate::config::SchedulerConfig;
use crate::models::{
    cycle_anchor, cycle_containing, AccessGrant, BillingCycle, FeatureKey, UpsertCycleRecord,
    UsageRecord,
};
use crate::services::billing_provider::BillingProvider;
use crate::services::metrics::{record_cycle_reset, record_cycle_run};
use crate::services::store::UsageStore;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

/// Summary of one scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleRunReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub records_ensured: usize,
}

enum AccessOutcome {
    Reset { records: usize },
    Skipped,
    Failed,
}

pub struct CycleResetScheduler {
    store: Arc<dyn UsageStore>,
    billing: Arc<dyn BillingProvider>,
    config: SchedulerConfig,
}

impl CycleResetScheduler {
    pub fn new(
        store: Arc<dyn UsageStore>,
        billing: Arc<dyn BillingProvider>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            billing,
            config,
        }
    }

    pub async fn run(&self) -> Result<CycleRunReport, AppError> {
        self.run_at(Utc::now()).await
    }

    /// One pass over all active paid accesses. Only the initial listing can
    /// fail the run; per-access failures are logged and counted.
    #[instrument(skip(self))]
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<CycleRunReport, AppError> {
        let started = Instant::now();

        let accesses = self.store.list_active_accesses(now).await.map_err(|e| {
            record_cycle_run("failed");
            tracing::error!(error = %e, "Failed to list active accesses");
            e
        })?;

        tracing::info!(accesses = accesses.len(), "Cycle reset run started");

        let outcomes: Vec<AccessOutcome> = stream::iter(accesses)
            .map(|grant| async move { self.reset_access(grant, now).await })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let mut report = CycleRunReport::default();
        for outcome in outcomes {
            report.processed += 1;
            match outcome {
                AccessOutcome::Reset { records } => {
                    report.succeeded += 1;
                    report.records_ensured += records;
                }
                AccessOutcome::Skipped => report.skipped += 1,
                AccessOutcome::Failed => report.failed += 1,
            }
        }

        record_cycle_run(if report.failed == 0 {
            "completed"
        } else {
            "completed_with_failures"
        });
        tracing::info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            records_ensured = report.records_ensured,
            duration_ms = started.elapsed().as_millis() as u64,
            "Cycle reset run finished"
        );

        Ok(report)
    }

    async fn reset_access(&self, grant: AccessGrant, now: DateTime<Utc>) -> AccessOutcome {
        let user_id = grant.access.user_id;

        let Some(subscription_id) = grant.access.external_subscription_id.as_deref() else {
            tracing::warn!(user_id = %user_id, plan_id = %grant.plan.plan_id, "Paid access has no external subscription; skipping");
            return AccessOutcome::Skipped;
        };

        let cycle = match self
            .resolve_cycle(subscription_id, now, grant.access.expires_at)
            .await
        {
            Ok(cycle) => cycle,
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    subscription_id = %subscription_id,
                    error = %e,
                    error_kind = e.kind(),
                    "Could not resolve billing cycle; will retry next run"
                );
                return AccessOutcome::Failed;
            }
        };

        let mut records = 0;
        let mut failed = false;
        for feature in grant.plan.monthly_metered_features() {
            match self.upsert_cycle(user_id, feature, cycle).await {
                Ok(_) => records += 1,
                Err(e) => {
                    failed = true;
                    tracing::error!(
                        user_id = %user_id,
                        feature = %feature,
                        error = %e,
                        "Failed to ensure cycle record"
                    );
                }
            }
        }

        if failed {
            AccessOutcome::Failed
        } else {
            AccessOutcome::Reset { records }
        }
    }

    /// Ensure the record for the cycle containing `now` exists.
    #[instrument(skip(self), fields(user_id = %user_id, feature = %feature))]
    pub async fn ensure_cycle_record(
        &self,
        user_id: Uuid,
        feature: FeatureKey,
        subscription_id: &str,
        now: DateTime<Utc>,
        overall_expiry: DateTime<Utc>,
    ) -> Result<UsageRecord, AppError> {
        let cycle = self
            .resolve_cycle(subscription_id, now, overall_expiry)
            .await?;
        self.upsert_cycle(user_id, feature, cycle).await
    }

    async fn resolve_cycle(
        &self,
        subscription_id: &str,
        now: DateTime<Utc>,
        overall_expiry: DateTime<Utc>,
    ) -> Result<BillingCycle, AppError> {
        let started_at = self.billing.subscription_start(subscription_id).await?;
        Ok(cycle_containing(
            cycle_anchor(started_at),
            now,
            overall_expiry,
        ))
    }

    async fn upsert_cycle(
        &self,
        user_id: Uuid,
        feature: FeatureKey,
        cycle: BillingCycle,
    ) -> Result<UsageRecord, AppError> {
        let result = self
            .store
            .upsert_cycle_record(&UpsertCycleRecord {
                user_id,
                feature,
                cycle_started_at: cycle.start,
                cycle_ends_at: cycle.end,
            })
            .await;

        match &result {
            Ok(record) => {
                record_cycle_reset(feature.as_str(), "ok");
                tracing::debug!(
                    user_id = %user_id,
                    feature = %feature,
                    record_id = %record.record_id,
                    cycle_started_at = %record.cycle_started_at,
                    cycle_ends_at = %record.cycle_ends_at,
                    "Cycle record ensured"
                );
            }
            Err(_) => record_cycle_reset(feature.as_str(), "error"),
        }

        result
    }

    /// Run on a fixed interval until `shutdown` fires. Runs never overlap:
    /// the next tick is awaited only after the current run returns.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !self.config.enabled {
                tracing::info!("Cycle reset scheduler disabled by configuration");
                return;
            }

            let period = Duration::from_secs(self.config.interval_secs.max(1));
            let mut interval = if self.config.run_on_startup {
                tokio::time::interval(period)
            } else {
                tokio::time::interval_at(tokio::time::Instant::now() + period, period)
            };
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                interval_secs = period.as_secs(),
                max_concurrency = self.config.max_concurrency,
                "Cycle reset scheduler started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Cycle reset scheduler shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.run().await {
                            tracing::error!(error = %e, "Cycle reset run failed");
                        }
                    }
                }
            }
        })
    }
}
