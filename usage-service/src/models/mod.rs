//! Domain models for usage-service.

mod access;
mod cycle;
mod plan;
mod usage;

pub use access::{AccessGrant, CreateAccess, UserAccess};
pub use cycle::{current_cycle_start, cycle_anchor, cycle_containing, day_window, BillingCycle};
pub use plan::{CreatePlan, CycleKind, FeatureKey, Plan, FREE_PLAN_ID};
pub use usage::{
    remaining, ChargeReceipt, CycleLookup, UpsertCycleRecord, UsageRecord, UsageSummary,
};
