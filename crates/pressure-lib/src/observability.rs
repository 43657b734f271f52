//! Observability for the pressure agent
//!
//! Provides:
//! - Prometheus metrics for threshold transitions, evictions and failures
//! - Structured `event = "..."` log records for significant state changes

use crate::models::ThresholdEvent;
use crate::scorer::PodCandidate;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    threshold_exceeded: IntGauge,
    threshold_exceeded_total: IntCounter,
    recovered_total: IntCounter,
    pods_evicted_total: IntCounter,
    enabled: IntGauge,
    acquisition_errors_total: IntCounter,
    platform_errors_total: IntCounterVec,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            threshold_exceeded: register_int_gauge!(
                "pressure_agent_threshold_exceeded",
                "1 while the node carries the overload taint"
            )
            .expect("Failed to register threshold_exceeded"),

            threshold_exceeded_total: register_int_counter!(
                "pressure_agent_threshold_exceeded_total",
                "Number of times the node was tainted for high CPU pressure"
            )
            .expect("Failed to register threshold_exceeded_total"),

            recovered_total: register_int_counter!(
                "pressure_agent_recovered_total",
                "Number of times the overload taint was removed"
            )
            .expect("Failed to register recovered_total"),

            pods_evicted_total: register_int_counter!(
                "pressure_agent_pods_evicted_total",
                "Number of pods evicted to relieve CPU pressure"
            )
            .expect("Failed to register pods_evicted_total"),

            enabled: register_int_gauge!(
                "pressure_agent_enabled",
                "0 if the controller is disabled on this node by label"
            )
            .expect("Failed to register enabled"),

            acquisition_errors_total: register_int_counter!(
                "pressure_agent_acquisition_errors_total",
                "Number of failed load samples"
            )
            .expect("Failed to register acquisition_errors_total"),

            platform_errors_total: register_int_counter_vec!(
                "pressure_agent_platform_errors_total",
                "Number of failed Kubernetes API calls",
                &["kind"]
            )
            .expect("Failed to register platform_errors_total"),
        }
    }
}

/// Handle to the controller's Prometheus metrics
///
/// Every clone points at the same globally registered metrics.
#[derive(Clone, Copy)]
pub struct ControllerMetrics {
    inner: &'static ControllerMetricsInner,
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    /// Create a handle, registering the metrics on first use
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new),
        }
    }

    /// Reflect the current taint state in the exceeded gauge
    pub fn set_threshold_exceeded(&self, exceeded: bool) {
        self.inner.threshold_exceeded.set(i64::from(exceeded));
    }

    pub fn inc_threshold_exceeded(&self) {
        self.inner.threshold_exceeded_total.inc();
    }

    pub fn inc_recovered(&self) {
        self.inner.recovered_total.inc();
    }

    pub fn inc_pods_evicted(&self) {
        self.inner.pods_evicted_total.inc();
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.set(i64::from(enabled));
    }

    pub fn inc_acquisition_errors(&self) {
        self.inner.acquisition_errors_total.inc();
    }

    /// Count a failed API call; `kind` is `read`, `write` or `conflict`
    pub fn inc_platform_errors(&self, kind: &str) {
        self.inner
            .platform_errors_total
            .with_label_values(&[kind])
            .inc();
    }
}

/// Structured logger for controller events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, source: &str, initially_tainted: bool) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            load_source = %source,
            initially_tainted = initially_tainted,
            "Pressure agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Pressure agent shutting down"
        );
    }

    /// Log a threshold transition as seen by the controller
    pub fn log_threshold(&self, event: &ThresholdEvent) {
        if event.is_high() {
            warn!(
                event = "threshold_exceeded",
                node = %self.node_name,
                window = %event.load.source.window_name(event.window),
                value = event.value,
                threshold = event.threshold,
                "{}",
                event.summary
            );
        } else {
            info!(
                event = "threshold_deceeded",
                node = %self.node_name,
                window = %event.load.source.window_name(event.window),
                value = event.value,
                threshold = event.threshold,
                "{}",
                event.summary
            );
        }
    }

    pub fn log_taint_change(&self, tainted: bool, reason: &str) {
        let record = if tainted { "node_tainted" } else { "node_untainted" };
        info!(
            event = record,
            node = %self.node_name,
            reason = %reason,
            "Node taint changed"
        );
    }

    pub fn log_eviction(&self, candidate: &PodCandidate, event: &ThresholdEvent) {
        warn!(
            event = "pod_evicted",
            node = %self.node_name,
            pod = %candidate.workload.display_name(),
            score = candidate.score,
            value = event.value,
            threshold = event.threshold,
            "Evicted pod to relieve CPU pressure"
        );
    }

    pub fn log_enabled_change(&self, enabled: bool) {
        warn!(
            event = "controller_enabled_changed",
            node = %self.node_name,
            enabled = enabled,
            "Controller enablement changed by node label"
        );
    }
}
