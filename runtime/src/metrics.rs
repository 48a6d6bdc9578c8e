//! Prometheus metrics for admission transitions.
//!
//! Operations record through the `metrics` facade; the server installs the
//! Prometheus recorder once at start-up and renders it on `/metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use admission_runtime::metrics::install_recorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = install_recorder()?;
//! println!("{}", handle.render());
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::Once;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the global Prometheus recorder and register metric descriptions.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if a recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_metrics();
    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// Register all metric descriptions. Safe to call more than once.
pub fn register_metrics() {
    static REGISTER: Once = Once::new();

    REGISTER.call_once(|| {
        describe_counter!(
            "admission_transitions_total",
            "Committed admission transactions by operation and outcome"
        );
        describe_counter!(
            "admission_conflicts_total",
            "Optimistic concurrency conflicts that triggered a retry"
        );
        describe_counter!(
            "admission_notifications_failed_total",
            "Notifications that could not be delivered"
        );
        describe_counter!(
            "admission_reclaimed_total",
            "Expired reservations reclaimed"
        );
        describe_counter!(
            "admission_promotions_total",
            "Waitlisted users promoted into a reservation"
        );
        describe_histogram!(
            "admission_transaction_duration_seconds",
            "Time taken by an admission transaction, retries included"
        );
    });
}

/// Admission metrics recorder.
pub struct AdmissionMetrics;

impl AdmissionMetrics {
    /// Record a finished transaction.
    pub fn record_transition(operation: &'static str, outcome: &'static str) {
        counter!("admission_transitions_total", "operation" => operation, "outcome" => outcome)
            .increment(1);
    }

    /// Record how long a transaction took.
    pub fn record_duration(operation: &'static str, duration: Duration) {
        histogram!("admission_transaction_duration_seconds", "operation" => operation)
            .record(duration.as_secs_f64());
    }

    /// Record a conflict that will be retried.
    pub fn record_conflict(operation: &'static str) {
        counter!("admission_conflicts_total", "operation" => operation).increment(1);
    }

    /// Record a failed notification.
    pub fn record_notification_failure(kind: &'static str) {
        counter!("admission_notifications_failed_total", "kind" => kind).increment(1);
    }

    /// Record reclaimed reservations.
    pub fn record_reclaimed(count: u32) {
        counter!("admission_reclaimed_total").increment(u64::from(count));
    }

    /// Record a waitlist promotion.
    pub fn record_promotion() {
        counter!("admission_promotions_total").increment(1);
    }
}
