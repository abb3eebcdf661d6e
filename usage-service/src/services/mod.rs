//! Services module for usage-service.

pub mod billing_provider;
pub mod database;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod scheduler;
pub mod store;

pub use billing_provider::{BillingProvider, StripeClient};
pub use database::Database;
pub use ledger::{LedgerError, UsageLedger};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use scheduler::{CycleResetScheduler, CycleRunReport};
pub use store::UsageStore;
