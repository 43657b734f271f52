//! Pressure watcher
//!
//! Periodically samples the node load source and runs it through a
//! hysteresis state machine. Transitions are handed to the controller over a
//! single-slot channel, so the watcher never runs ahead of the consumer.

use crate::error::AcquisitionError;
use crate::models::{Load, MetricWindow, ThresholdEvent, ThresholdEventKind};
use crate::source::LoadSource;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Configuration for the pressure watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Pressure value at which the node counts as overloaded
    pub threshold: f64,
    /// Window evaluated while pressure is low
    pub target_window: MetricWindow,
    /// Polling interval (default: 15 seconds)
    pub interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            threshold: 25.0,
            target_window: MetricWindow::Mid,
            interval: Duration::from_secs(15),
        }
    }
}

/// Hysteresis state machine over load samples
///
/// Entering `High` needs only the target window at or above the threshold.
/// Leaving it needs every window below the threshold. While `High` the target
/// narrows to the short window and an exceed event is produced every sample.
#[derive(Debug, Clone)]
pub struct Hysteresis {
    threshold: f64,
    default_window: MetricWindow,
    target: MetricWindow,
    is_high: bool,
}

impl Hysteresis {
    pub fn new(threshold: f64, default_window: MetricWindow, initially_high: bool) -> Self {
        Self {
            threshold,
            default_window,
            target: if initially_high {
                MetricWindow::Short
            } else {
                default_window
            },
            is_high: initially_high,
        }
    }

    pub fn is_high(&self) -> bool {
        self.is_high
    }

    /// Window the next sample will be judged on
    pub fn target(&self) -> MetricWindow {
        self.target
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Feed one sample; returns the event for this cycle, if any
    pub fn evaluate(&mut self, load: Load) -> Option<ThresholdEvent> {
        let window = self.target;
        let was_high = self.is_high;

        if load.get(window) >= self.threshold {
            self.is_high = true;
        } else if load.all_below(self.threshold) {
            self.is_high = false;
        }

        self.target = if self.is_high {
            MetricWindow::Short
        } else {
            self.default_window
        };

        if self.is_high {
            Some(ThresholdEvent::new(
                ThresholdEventKind::Exceed,
                load,
                window,
                self.threshold,
            ))
        } else if was_high {
            Some(ThresholdEvent::new(
                ThresholdEventKind::Deceed,
                load,
                window,
                self.threshold,
            ))
        } else {
            None
        }
    }
}

/// Receiving ends of the watcher's output channels
pub struct WatcherOutputs {
    pub events: mpsc::Receiver<ThresholdEvent>,
    pub errors: mpsc::Receiver<AcquisitionError>,
}

/// Timer-driven sampling loop
pub struct PressureWatcher {
    source: Arc<dyn LoadSource>,
    interval: Duration,
    state: Hysteresis,
    events_tx: mpsc::Sender<ThresholdEvent>,
    errors_tx: mpsc::Sender<AcquisitionError>,
}

impl PressureWatcher {
    /// Create a watcher; `initially_high` should reflect whether the node is
    /// already tainted so a restart does not emit a spurious recovery.
    pub fn new(
        source: Arc<dyn LoadSource>,
        config: WatcherConfig,
        initially_high: bool,
    ) -> (Self, WatcherOutputs) {
        let (events_tx, events) = mpsc::channel(1);
        let (errors_tx, errors) = mpsc::channel(1);

        let watcher = Self {
            source,
            interval: config.interval,
            state: Hysteresis::new(config.threshold, config.target_window, initially_high),
            events_tx,
            errors_tx,
        };

        (watcher, WatcherOutputs { events, errors })
    }

    /// Run until shutdown is signalled or the controller goes away
    ///
    /// Dropping the watcher on return closes both output channels.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            threshold = self.state.threshold(),
            target_window = ?self.state.target(),
            initially_high = self.state.is_high(),
            "Starting pressure watcher"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.poll(&mut shutdown).await.is_break() {
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down pressure watcher");
                    break;
                }
            }
        }
    }

    async fn poll(&mut self, shutdown: &mut broadcast::Receiver<()>) -> ControlFlow<()> {
        let load = match self.source.sample().await {
            Ok(load) => load,
            Err(e) => {
                return Self::hand_off(&self.errors_tx, e, shutdown).await;
            }
        };

        debug!(
            source = %load.source,
            state = %load.describe(self.state.target(), self.state.threshold()),
            high = self.state.is_high(),
            "Sampled node load"
        );

        match self.state.evaluate(load) {
            Some(event) => Self::hand_off(&self.events_tx, event, shutdown).await,
            None => ControlFlow::Continue(()),
        }
    }

    /// Block until the consumer takes `item`, giving up on shutdown
    async fn hand_off<T>(
        tx: &mpsc::Sender<T>,
        item: T,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> ControlFlow<()> {
        tokio::select! {
            sent = tx.send(item) => {
                if sent.is_err() {
                    info!("Controller stopped listening, stopping watcher");
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }
            _ = shutdown.recv() => {
                info!("Shutting down pressure watcher");
                ControlFlow::Break(())
            }
        }
    }
}
