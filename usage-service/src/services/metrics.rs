//! Metrics module for usage-service.
//! Provides Prometheus metrics for credit charges and cycle resets.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!("usage_db_query_duration_seconds", "Database query duration"),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Charge attempts by feature and outcome
pub static CHARGES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Credits admitted by feature
pub static CREDITS_CHARGED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Scheduler runs by status
pub static CYCLE_RUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Per-access cycle reset outcomes
pub static CYCLE_RESETS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Billing provider lookups by outcome
pub static BILLING_PROVIDER_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    CHARGES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "usage_charges_total",
                "Total charge attempts by feature and outcome"
            ),
            &["feature", "outcome"]
        )
        .expect("Failed to register CHARGES_TOTAL")
    });

    CREDITS_CHARGED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "usage_credits_charged_total",
                "Total credits admitted by feature"
            ),
            &["feature"]
        )
        .expect("Failed to register CREDITS_CHARGED_TOTAL")
    });

    CYCLE_RUNS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("usage_cycle_runs_total", "Total cycle reset runs by status"),
            &["status"]
        )
        .expect("Failed to register CYCLE_RUNS_TOTAL")
    });

    CYCLE_RESETS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "usage_cycle_resets_total",
                "Cycle record upserts by feature and outcome"
            ),
            &["feature", "outcome"]
        )
        .expect("Failed to register CYCLE_RESETS_TOTAL")
    });

    BILLING_PROVIDER_REQUESTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "usage_billing_provider_requests_total",
                "Subscription start lookups by outcome"
            ),
            &["outcome"]
        )
        .expect("Failed to register BILLING_PROVIDER_REQUESTS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a charge attempt.
pub fn record_charge(feature: &str, outcome: &str) {
    if let Some(counter) = CHARGES_TOTAL.get() {
        counter.with_label_values(&[feature, outcome]).inc();
    }
}

/// Record admitted credits.
pub fn record_credits_charged(feature: &str, cost: i64) {
    if let Some(counter) = CREDITS_CHARGED_TOTAL.get() {
        counter
            .with_label_values(&[feature])
            .inc_by(cost.max(0) as u64);
    }
}

/// Record a finished scheduler run.
pub fn record_cycle_run(status: &str) {
    if let Some(counter) = CYCLE_RUNS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

/// Record a cycle record upsert.
pub fn record_cycle_reset(feature: &str, outcome: &str) {
    if let Some(counter) = CYCLE_RESETS_TOTAL.get() {
        counter.with_label_values(&[feature, outcome]).inc();
    }
}

/// Record a billing provider lookup.
pub fn record_billing_provider_request(outcome: &str) {
    if let Some(counter) = BILLING_PROVIDER_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}
