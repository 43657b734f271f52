//! Node load acquisition
//!
//! This module provides sources for the three smoothed CPU load figures the
//! watcher evaluates. It supports CPU pressure stall information (PSI) and
//! falls back to the classic load average when PSI is not available.

mod loadavg;
mod pressure;


pub use loadavg::LoadAverageSource;
pub use pressure::PressureSource;

use crate::error::AcquisitionError;
use crate::models::{Load, LoadSourceKind};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use async_trait::async_trait;

/// Trait for load sampling implementations
#[async_trait]
pub trait LoadSource: Send + Sync {
    /// Take a fresh sample, windows ordered fastest to slowest
    async fn sample(&self) -> Result<Load, AcquisitionError>;

    /// Which kernel interface this source reads
    fn kind(&self) -> LoadSourceKind;
}

/// Operator preference for the load source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSelection {
    /// Probe for PSI and fall back to load average
    #[default]
    Auto,
    Pressure,
    LoadAverage,
}

/// Probe which load source the node supports
pub async fn detect_load_source(proc_root: &Path) -> LoadSourceKind {
    let psi = PressureSource::new(proc_root);
    match psi.sample().await {
        Ok(_) => LoadSourceKind::Pressure,
        Err(e) => {
            tracing::debug!(error = %e, "CPU pressure not readable");
            LoadSourceKind::LoadAverage
        }
    }
}

/// Create the load source for this node
///
/// Probing happens once here; the returned source is used for the lifetime
/// of the process.
pub async fn create_load_source(
    selection: SourceSelection,
    proc_root: &Path,
) -> Result<Arc<dyn LoadSource>> {
    match selection {
        SourceSelection::Auto => match detect_load_source(proc_root).await {
            LoadSourceKind::Pressure => {
                tracing::info!("Detected CPU pressure stall information, using PSI source");
                Ok(Arc::new(PressureSource::new(proc_root)))
            }
            LoadSourceKind::LoadAverage => {
                tracing::warn!("CPU pressure not available, falling back to load average");
                Ok(Arc::new(LoadAverageSource::new(proc_root)))
            }
        },
        SourceSelection::Pressure => {
            let source = PressureSource::new(proc_root);
            if let Err(e) = source.sample().await {
                bail!("CPU pressure source requested but unusable: {}", e);
            }
            Ok(Arc::new(source))
        }
        SourceSelection::LoadAverage => {
            tracing::info!("Using load average source");
            Ok(Arc::new(LoadAverageSource::new(proc_root)))
        }
    }
}
