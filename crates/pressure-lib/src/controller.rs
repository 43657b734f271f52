//! Controller loop
//!
//! Consumes threshold events from the watcher and decides what to do with
//! them: taint, evict, untaint, or nothing. All cluster writes of the agent
//! happen from this task.

use crate::error::{AcquisitionError, PlatformError};
use crate::evicter::{Evicter, EvicterConfig, EvictionOutcome};
use crate::health::{components, HealthRegistry};
use crate::models::{ThresholdEvent, ThresholdEventKind};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::platform::ClusterClient;
use crate::tainter::{TaintOutcome, Tainter, UntaintCause, UntaintOutcome};
use crate::watcher::WatcherOutputs;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Configuration for the controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Pressure above which a tainted node starts evicting pods
    pub evict_threshold: f64,
    /// How long a read of the enabled label stays valid
    pub disabled_check_interval: Duration,
    /// Reads of the initial taint state before giving up on it
    pub bootstrap_attempts: u32,
    pub bootstrap_retry_delay: Duration,
    pub evicter: EvicterConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            evict_threshold: 50.0,
            disabled_check_interval: Duration::from_secs(60),
            bootstrap_attempts: 3,
            bootstrap_retry_delay: Duration::from_secs(2),
            evicter: EvicterConfig::default(),
        }
    }
}

/// Cached value of the per-node disabled label
#[derive(Debug, Clone)]
pub struct DisabledFlagCache {
    value: bool,
    checked_at: Option<Instant>,
    ttl: Duration,
}

impl DisabledFlagCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            value: false,
            checked_at: None,
            ttl,
        }
    }

    pub fn value(&self) -> bool {
        self.value
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        match self.checked_at {
            None => true,
            Some(checked) => now.saturating_duration_since(checked) >= self.ttl,
        }
    }

    /// Re-read the flag if the cached value expired
    ///
    /// Returns `Some(new_value)` when a read happened. A failed read keeps
    /// the old value and leaves the cache stale so the next call retries.
    pub async fn refresh_if_stale<F, Fut>(
        &mut self,
        now: Instant,
        read: F,
    ) -> Result<Option<bool>, PlatformError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<bool, PlatformError>>,
    {
        if !self.is_stale(now) {
            return Ok(None);
        }

        let value = read().await?;
        self.value = value;
        self.checked_at = Some(now);
        Ok(Some(value))
    }
}

/// What the controller did with one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Controller is disabled on this node
    Disabled,
    Tainted,
    AlreadyTainted,
    Evicted,
    /// A pod was picked and counted but the eviction request failed
    EvictionFailed,
    EvictionBackedOff,
    NoEvictionCandidate,
    Untainted,
    /// Recovery for a node that was not tainted
    Ignored,
    /// A cluster call failed; state is unchanged
    Failed,
}

/// Node pressure controller
pub struct Controller {
    tainter: Tainter,
    evicter: Evicter,
    is_tainted: bool,
    /// False while the taint state could not be read from the node
    taint_known: bool,
    disabled: DisabledFlagCache,
    evict_threshold: f64,
    bootstrap_attempts: u32,
    bootstrap_retry_delay: Duration,
    metrics: ControllerMetrics,
    health: HealthRegistry,
    logger: StructuredLogger,
}

impl Controller {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        config: ControllerConfig,
        metrics: ControllerMetrics,
        health: HealthRegistry,
    ) -> Self {
        let logger = StructuredLogger::new(client.node_name());

        Self {
            tainter: Tainter::new(client.clone()),
            evicter: Evicter::new(client, config.evicter, metrics),
            is_tainted: false,
            taint_known: false,
            disabled: DisabledFlagCache::new(config.disabled_check_interval),
            evict_threshold: config.evict_threshold,
            bootstrap_attempts: config.bootstrap_attempts.max(1),
            bootstrap_retry_delay: config.bootstrap_retry_delay,
            metrics,
            health,
            logger,
        }
    }

    pub fn is_tainted(&self) -> bool {
        self.is_tainted
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.value()
    }

    /// Load the initial taint and disabled state from the cluster
    ///
    /// Returns the state the watcher should start in: `true` when the node
    /// is tainted or its taint state could not be read. An unknown state
    /// starts the watcher high, so the first low sample produces a recovery
    /// event that removes a leftover taint. A failed read of the enabled
    /// label is treated as "enabled" and retried on the next event.
    pub async fn bootstrap(&mut self) -> bool {
        self.health.register(components::CONTROLLER).await;
        self.health.register(components::CLUSTER_API).await;

        for attempt in 1..=self.bootstrap_attempts {
            match self.tainter.is_node_tainted().await {
                Ok(tainted) => {
                    self.is_tainted = tainted;
                    self.taint_known = true;
                    self.health.record_success(components::CLUSTER_API).await;
                    break;
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Could not read initial taint state");
                    self.record_platform_error(&e).await;
                    if attempt < self.bootstrap_attempts {
                        tokio::time::sleep(self.bootstrap_retry_delay).await;
                    }
                }
            }
        }
        if !self.taint_known {
            error!("Taint state unknown, starting high until the node can be read");
        }
        self.metrics.set_threshold_exceeded(self.is_tainted);

        self.refresh_disabled(Instant::now()).await;
        self.metrics.set_enabled(!self.disabled.value());

        self.health.set_ready(true).await;
        self.is_tainted || !self.taint_known
    }

    /// Consume watcher output until the event stream closes
    pub async fn run(mut self, mut outputs: WatcherOutputs) {
        info!(
            tainted = self.is_tainted,
            evict_threshold = self.evict_threshold,
            "Starting controller"
        );

        loop {
            tokio::select! {
                event = outputs.events.recv() => match event {
                    Some(event) => {
                        self.health.record_success(components::WATCHER).await;
                        self.handle_event(event, Instant::now()).await;
                    }
                    None => break,
                },
                Some(err) = outputs.errors.recv() => {
                    self.handle_acquisition_error(err).await;
                }
            }
        }

        info!("Event stream closed, controller stopped");
    }

    /// Apply the policy to one threshold event
    pub async fn handle_event(&mut self, event: ThresholdEvent, now: Instant) -> Decision {
        let event_kind = event.kind;
        let decision = self.apply_policy(event, now).await;

        if matches!(decision, Decision::Failed | Decision::EvictionFailed) {
            let message = format!("{} event not applied: {:?}", event_kind, decision);
            self.health.record_failure(components::CONTROLLER, message).await;
        } else {
            self.health.record_success(components::CONTROLLER).await;
        }
        decision
    }

    async fn apply_policy(&mut self, event: ThresholdEvent, now: Instant) -> Decision {
        if !self.taint_known {
            self.resync_taint().await;
        }
        self.refresh_disabled(now).await;

        if self.disabled.value() {
            if self.is_tainted || !self.taint_known {
                info!("Controller disabled on node, removing taint");
                self.untaint(UntaintCause::Disabled).await;
            }
            debug!(event = %event, "Controller disabled on node, ignoring event");
            return Decision::Disabled;
        }

        match event.kind {
            ThresholdEventKind::Exceed => self.on_exceed(&event).await,
            ThresholdEventKind::Deceed => self.on_deceed(&event).await,
        }
    }

    pub async fn handle_acquisition_error(&mut self, err: AcquisitionError) {
        warn!(error = %err, "Failed to sample node load, skipping cycle");
        self.metrics.inc_acquisition_errors();
        self.health
            .record_failure(components::WATCHER, err.to_string())
            .await;
    }

    async fn on_exceed(&mut self, event: &ThresholdEvent) -> Decision {
        self.logger.log_threshold(event);

        if self.is_tainted && event.value > self.evict_threshold {
            return self.evict(event).await;
        }

        match self.tainter.taint_node(event).await {
            Ok(TaintOutcome::Applied) => {
                self.health.record_success(components::CLUSTER_API).await;
                self.is_tainted = true;
                self.taint_known = true;
                self.metrics.inc_threshold_exceeded();
                self.metrics.set_threshold_exceeded(true);
                self.logger.log_taint_change(true, &event.summary);
                Decision::Tainted
            }
            Ok(TaintOutcome::AlreadyPresent) => {
                self.health.record_success(components::CLUSTER_API).await;
                self.is_tainted = true;
                self.taint_known = true;
                self.metrics.set_threshold_exceeded(true);
                Decision::AlreadyTainted
            }
            Err(e) => {
                error!(error = %e, "Failed to taint node");
                self.record_platform_error(&e).await;
                Decision::Failed
            }
        }
    }

    async fn evict(&mut self, event: &ThresholdEvent) -> Decision {
        match self.evicter.evict_pod(event).await {
            Ok(EvictionOutcome::Evicted(candidate)) => {
                self.health.record_success(components::CLUSTER_API).await;
                self.logger.log_eviction(&candidate, event);
                Decision::Evicted
            }
            Ok(EvictionOutcome::RequestFailed { candidate, error }) => {
                self.logger.log_eviction(&candidate, event);
                error!(
                    error = %error,
                    pod = %candidate.workload.display_name(),
                    "Eviction request failed"
                );
                self.record_platform_error(&error).await;
                Decision::EvictionFailed
            }
            Ok(EvictionOutcome::BackedOff) => Decision::EvictionBackedOff,
            Ok(EvictionOutcome::NoCandidate) => {
                self.health.record_success(components::CLUSTER_API).await;
                info!("No pod eligible for eviction");
                Decision::NoEvictionCandidate
            }
            Err(e) => {
                error!(error = %e, "Failed to evict pod");
                self.record_platform_error(&e).await;
                Decision::Failed
            }
        }
    }

    async fn on_deceed(&mut self, event: &ThresholdEvent) -> Decision {
        self.logger.log_threshold(event);

        if self.taint_known && !self.is_tainted {
            debug!("Node not tainted, nothing to recover");
            return Decision::Ignored;
        }

        self.untaint(UntaintCause::Recovered(event)).await
    }

    async fn untaint(&mut self, cause: UntaintCause<'_>) -> Decision {
        match self.tainter.untaint_node(cause).await {
            Ok(outcome) => {
                self.health.record_success(components::CLUSTER_API).await;
                self.is_tainted = false;
                self.taint_known = true;
                self.metrics.set_threshold_exceeded(false);

                if outcome == UntaintOutcome::Removed {
                    let reason = match cause {
                        UntaintCause::Recovered(event) => {
                            self.metrics.inc_recovered();
                            event.summary.clone()
                        }
                        UntaintCause::Disabled => "controller disabled".to_string(),
                    };
                    self.logger.log_taint_change(false, &reason);
                }
                Decision::Untainted
            }
            Err(e) if e.is_conflict() => {
                info!(error = %e, "Node changed while removing taint, re-reading taint state");
                self.metrics.inc_platform_errors(e.kind());
                self.resync_taint().await;
                Decision::Failed
            }
            Err(e) => {
                error!(error = %e, "Failed to remove taint from node");
                self.record_platform_error(&e).await;
                Decision::Failed
            }
        }
    }

    async fn resync_taint(&mut self) {
        match self.tainter.is_node_tainted().await {
            Ok(tainted) => {
                self.is_tainted = tainted;
                self.taint_known = true;
                self.health.record_success(components::CLUSTER_API).await;
                self.metrics.set_threshold_exceeded(tainted);
            }
            Err(e) => {
                warn!(error = %e, "Could not re-read taint state");
                self.record_platform_error(&e).await;
            }
        }
    }

    async fn refresh_disabled(&mut self, now: Instant) {
        let previous = self.disabled.value();
        let tainter = &self.tainter;

        match self
            .disabled
            .refresh_if_stale(now, || tainter.is_controller_disabled())
            .await
        {
            Ok(Some(disabled)) => {
                self.health.record_success(components::CLUSTER_API).await;
                self.metrics.set_enabled(!disabled);
                if disabled != previous {
                    self.logger.log_enabled_change(!disabled);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, disabled = previous, "Could not read enabled label, keeping last value");
                self.record_platform_error(&e).await;
            }
        }
    }

    async fn record_platform_error(&self, e: &PlatformError) {
        self.metrics.inc_platform_errors(e.kind());
        self.health
            .record_failure(components::CLUSTER_API, e.to_string())
            .await;
    }
}
