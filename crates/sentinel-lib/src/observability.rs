//! Observability infrastructure for the cost sentinel
//!
//! Provides:
//! - Prometheus metrics (run latency, anomalies, skipped services, deliveries)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::anomaly::DispatchReport;
use crate::models::{Anomaly, AnomalySeverity};

/// Histogram buckets for detection pass latency (in seconds)
const RUN_LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SentinelMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct SentinelMetricsInner {
    run_latency_seconds: Histogram,
    runs_completed: IntCounter,
    runs_failed: IntCounter,
    services_evaluated: IntGauge,
    services_skipped: IntGauge,
    observations_rejected: IntCounter,
    anomalies_detected: IntCounter,
    alert_deliveries: IntCounterVec,
}

impl SentinelMetricsInner {
    fn new() -> Self {
        Self {
            run_latency_seconds: register_histogram!(
                "cost_sentinel_run_latency_seconds",
                "Time spent on one detection pass, including alert dispatch",
                RUN_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register run_latency_seconds"),

            runs_completed: register_int_counter!(
                "cost_sentinel_runs_completed_total",
                "Total number of detection passes that completed"
            )
            .expect("Failed to register runs_completed"),

            runs_failed: register_int_counter!(
                "cost_sentinel_runs_failed_total",
                "Total number of detection passes aborted by a data source failure"
            )
            .expect("Failed to register runs_failed"),

            services_evaluated: register_int_gauge!(
                "cost_sentinel_services_evaluated",
                "Services with enough history to be evaluated in the last pass"
            )
            .expect("Failed to register services_evaluated"),

            services_skipped: register_int_gauge!(
                "cost_sentinel_services_skipped",
                "Services skipped for insufficient history in the last pass"
            )
            .expect("Failed to register services_skipped"),

            observations_rejected: register_int_counter!(
                "cost_sentinel_observations_rejected_total",
                "Total number of observations dropped for an invalid cost"
            )
            .expect("Failed to register observations_rejected"),

            anomalies_detected: register_int_counter!(
                "cost_sentinel_anomalies_detected_total",
                "Total number of cost anomalies detected"
            )
            .expect("Failed to register anomalies_detected"),

            alert_deliveries: register_int_counter_vec!(
                "cost_sentinel_alert_deliveries_total",
                "Alert delivery attempts by channel and outcome",
                &["channel", "outcome"]
            )
            .expect("Failed to register alert_deliveries"),
        }
    }
}

/// Sentinel metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct SentinelMetrics {
    _private: (),
}

impl Default for SentinelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SentinelMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SentinelMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SentinelMetricsInner {
        GLOBAL_METRICS.get_or_init(SentinelMetricsInner::new)
    }

    /// Record a completed pass
    pub fn observe_run(&self, duration_secs: f64) {
        self.inner().run_latency_seconds.observe(duration_secs);
        self.inner().runs_completed.inc();
    }

    /// Record a pass aborted by its data source
    pub fn inc_runs_failed(&self) {
        self.inner().runs_failed.inc();
    }

    /// Update per-pass service counts
    pub fn set_services(&self, evaluated: usize, skipped: usize) {
        self.inner().services_evaluated.set(evaluated as i64);
        self.inner().services_skipped.set(skipped as i64);
    }

    pub fn add_observations_rejected(&self, count: usize) {
        self.inner().observations_rejected.inc_by(count as u64);
    }

    pub fn add_anomalies_detected(&self, count: usize) {
        self.inner().anomalies_detected.inc_by(count as u64);
    }

    /// Record delivery outcomes from one dispatch
    pub fn record_dispatch(&self, report: &DispatchReport) {
        let deliveries = &self.inner().alert_deliveries;
        for (channel, tally) in &report.by_channel {
            deliveries
                .with_label_values(&[channel.as_str(), "delivered"])
                .inc_by(tally.delivered as u64);
            deliveries
                .with_label_values(&[channel.as_str(), "skipped"])
                .inc_by(tally.skipped as u64);
            deliveries
                .with_label_values(&[channel.as_str(), "failed"])
                .inc_by(tally.failed as u64);
        }
    }
}

/// Structured logger for sentinel events
///
/// Provides consistent JSON-formatted logging for anomalies, runs and
/// lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log a detected cost anomaly
    pub fn log_anomaly(&self, anomaly: &Anomaly) {
        let severity = anomaly.severity();
        match severity {
            AnomalySeverity::Critical => {
                warn!(
                    event = "anomaly_detected",
                    instance = %self.instance,
                    service = %anomaly.service,
                    hour = %anomaly.hour_display(),
                    observed_cost = anomaly.observed_cost,
                    threshold = anomaly.threshold,
                    z_score = anomaly.z_score(),
                    severity = %severity,
                    "Critical cost anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    instance = %self.instance,
                    service = %anomaly.service,
                    hour = %anomaly.hour_display(),
                    observed_cost = anomaly.observed_cost,
                    threshold = anomaly.threshold,
                    z_score = anomaly.z_score(),
                    severity = %severity,
                    "Cost anomaly detected"
                );
            }
        }
    }

    /// Log the summary of a completed pass
    pub fn log_run_completed(
        &self,
        source: &str,
        observations: usize,
        services_evaluated: usize,
        services_skipped: usize,
        anomalies: usize,
        dispatch: &DispatchReport,
        elapsed_ms: u128,
    ) {
        info!(
            event = "run_completed",
            instance = %self.instance,
            source = %source,
            observations = observations,
            services_evaluated = services_evaluated,
            services_skipped = services_skipped,
            anomalies = anomalies,
            alerts_delivered = dispatch.delivered,
            alerts_skipped = dispatch.skipped,
            alerts_failed = dispatch.failed,
            elapsed_ms = elapsed_ms as u64,
            "Detection pass complete"
        );
    }

    /// Log a pass aborted by its data source
    pub fn log_run_failed(&self, source: &str, error: &str) {
        warn!(
            event = "run_failed",
            instance = %self.instance,
            source = %source,
            error = %error,
            "Detection pass aborted"
        );
    }

    /// Log sentinel startup
    pub fn log_startup(&self, version: &str, channels: &[&str]) {
        info!(
            event = "sentinel_started",
            instance = %self.instance,
            version = %version,
            channels = ?channels,
            "Cost sentinel started"
        );
    }

    /// Log sentinel shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "sentinel_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Cost sentinel shutting down"
        );
    }
}
