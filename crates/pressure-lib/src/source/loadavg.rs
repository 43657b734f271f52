//! Load average fallback
//!
//! Reads `/proc/loadavg` (`0.52 0.58 0.59 1/467 12345`).

use super::LoadSource;
use crate::error::AcquisitionError;
use crate::models::{Load, LoadSourceKind};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Load source backed by `/proc/loadavg`
pub struct LoadAverageSource {
    path: PathBuf,
}

impl LoadAverageSource {
    pub fn new(proc_root: impl AsRef<Path>) -> Self {
        Self {
            path: proc_root.as_ref().join("loadavg"),
        }
    }

    /// Parse the 1, 5 and 15 minute averages
    pub fn parse(path: &Path, content: &str) -> Result<(f64, f64, f64), AcquisitionError> {
        let fields: Vec<&str> = content.split_whitespace().take(3).collect();
        if fields.len() < 3 {
            return Err(AcquisitionError::malformed(path, "expected at least 3 fields"));
        }

        let mut values = [0.0f64; 3];
        for (slot, raw) in values.iter_mut().zip(&fields) {
            *slot = raw.parse().map_err(|_| {
                AcquisitionError::malformed(path, format!("invalid load value '{}'", raw))
            })?;
        }

        Ok((values[0], values[1], values[2]))
    }
}

#[async_trait]
impl LoadSource for LoadAverageSource {
    async fn sample(&self) -> Result<Load, AcquisitionError> {
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|source| AcquisitionError::Io {
                path: self.path.clone(),
                source,
            })?;

        let (load1, load5, load15) = Self::parse(&self.path, &content)?;
        Ok(Load::new(LoadSourceKind::LoadAverage, load1, load5, load15))
    }

    fn kind(&self) -> LoadSourceKind {
        LoadSourceKind::LoadAverage
    }
}
