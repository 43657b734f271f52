//! Node-local CPU pressure controller
//!
//! This crate provides the core functionality for:
//! - Sampling node CPU pressure (PSI) or load average
//! - Hysteresis over the smoothed windows
//! - Tainting overloaded nodes and evicting pods from them
//! - Health checks and observability

pub mod api;
pub mod controller;
pub mod error;
pub mod evicter;
pub mod health;
pub mod models;
pub mod observability;
pub mod platform;
pub mod scorer;
pub mod source;
pub mod tainter;
pub mod watcher;

pub use controller::{Controller, ControllerConfig};
pub use error::{AcquisitionError, PlatformError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger};
pub use watcher::{PressureWatcher, WatcherConfig};
