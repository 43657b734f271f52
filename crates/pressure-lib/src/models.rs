//! Core data models for the pressure agent

use std::fmt;

use serde::{Deserialize, Serialize};

/// Smoothing window of a load sample, ordered fastest to slowest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricWindow {
    Short,
    #[default]
    Mid,
    Long,
}

impl MetricWindow {
    pub const ALL: [MetricWindow; 3] = [MetricWindow::Short, MetricWindow::Mid, MetricWindow::Long];
}

/// Which kernel interface produced a load sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSourceKind {
    /// CPU pressure stall information (`/proc/pressure/cpu`)
    Pressure,
    /// Classic load average (`/proc/loadavg`)
    LoadAverage,
}

impl LoadSourceKind {
    /// Name of a window as the kernel interface calls it
    pub fn window_name(&self, window: MetricWindow) -> &'static str {
        match (self, window) {
            (LoadSourceKind::Pressure, MetricWindow::Short) => "avg10",
            (LoadSourceKind::Pressure, MetricWindow::Mid) => "avg60",
            (LoadSourceKind::Pressure, MetricWindow::Long) => "avg300",
            (LoadSourceKind::LoadAverage, MetricWindow::Short) => "load1",
            (LoadSourceKind::LoadAverage, MetricWindow::Mid) => "load5",
            (LoadSourceKind::LoadAverage, MetricWindow::Long) => "load15",
        }
    }
}

impl fmt::Display for LoadSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadSourceKind::Pressure => write!(f, "Pressure"),
            LoadSourceKind::LoadAverage => write!(f, "LoadAvg"),
        }
    }
}

/// One load reading at three smoothing windows
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Load {
    pub source: LoadSourceKind,
    pub short: f64,
    pub mid: f64,
    pub long: f64,
}

impl Load {
    pub fn new(source: LoadSourceKind, short: f64, mid: f64, long: f64) -> Self {
        Self {
            source,
            short,
            mid,
            long,
        }
    }

    /// Value of the given window
    pub fn get(&self, window: MetricWindow) -> f64 {
        match window {
            MetricWindow::Short => self.short,
            MetricWindow::Mid => self.mid,
            MetricWindow::Long => self.long,
        }
    }

    /// True only if every window is strictly below the threshold
    pub fn all_below(&self, threshold: f64) -> bool {
        MetricWindow::ALL.iter().all(|w| self.get(*w) < threshold)
    }

    /// Render all windows, marking the threshold next to the target window
    pub fn describe(&self, target: MetricWindow, threshold: f64) -> String {
        let mut out = String::new();
        for window in MetricWindow::ALL {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&format!(
                "{}={:.2}",
                self.source.window_name(window),
                self.get(window)
            ));
            if window == target {
                out.push_str(&format!(" [threshold={:.2}]", threshold));
            }
        }
        out
    }
}

/// Direction of a threshold crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdEventKind {
    /// Pressure is above the threshold
    Exceed,
    /// Pressure fell below the threshold on all windows
    Deceed,
}

impl fmt::Display for ThresholdEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdEventKind::Exceed => write!(f, "exceeded"),
            ThresholdEventKind::Deceed => write!(f, "deceeded"),
        }
    }
}

/// Outcome of one polling decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEvent {
    pub kind: ThresholdEventKind,
    pub load: Load,
    /// Window the decision was made on
    pub window: MetricWindow,
    /// Value of `window` in `load`
    pub value: f64,
    pub threshold: f64,
    pub summary: String,
}

impl ThresholdEvent {
    pub fn new(kind: ThresholdEventKind, load: Load, window: MetricWindow, threshold: f64) -> Self {
        let value = load.get(window);
        let summary = format!(
            "{} metric {} {} ({:.2}) the threshold ({:.2})",
            load.source,
            load.source.window_name(window),
            kind,
            value,
            threshold
        );

        Self {
            kind,
            load,
            window,
            value,
            threshold,
            summary,
        }
    }

    pub fn is_high(&self) -> bool {
        self.kind == ThresholdEventKind::Exceed
    }
}

impl fmt::Display for ThresholdEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary)
    }
}
