//! CPU pressure stall information
//!
//! Reads the `some` line of `/proc/pressure/cpu`:
//!
//! ```text
//! some avg10=1.53 avg60=0.87 avg300=0.34 total=1234567
//! full avg10=0.00 avg60=0.00 avg300=0.00 total=0
//! ```

use super::LoadSource;
use crate::error::AcquisitionError;
use crate::models::{Load, LoadSourceKind};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Load source backed by `/proc/pressure/cpu`
pub struct PressureSource {
    path: PathBuf,
}

impl PressureSource {
    pub fn new(proc_root: impl AsRef<Path>) -> Self {
        Self {
            path: proc_root.as_ref().join("pressure").join("cpu"),
        }
    }

    /// Parse the averages of the `some` line
    pub fn parse(path: &Path, content: &str) -> Result<(f64, f64, f64), AcquisitionError> {
        let line = content
            .lines()
            .find(|l| l.starts_with("some "))
            .ok_or_else(|| AcquisitionError::malformed(path, "missing 'some' line"))?;

        let mut avg10 = None;
        let mut avg60 = None;
        let mut avg300 = None;

        for field in line.split_whitespace().skip(1) {
            let Some((key, value)) = field.split_once('=') else {
                continue;
            };
            let slot = match key {
                "avg10" => &mut avg10,
                "avg60" => &mut avg60,
                "avg300" => &mut avg300,
                _ => continue,
            };
            let parsed: f64 = value.parse().map_err(|_| {
                AcquisitionError::malformed(path, format!("invalid {} value '{}'", key, value))
            })?;
            *slot = Some(parsed);
        }

        match (avg10, avg60, avg300) {
            (Some(a), Some(b), Some(c)) => Ok((a, b, c)),
            _ => Err(AcquisitionError::malformed(
                path,
                "'some' line lacks avg10/avg60/avg300",
            )),
        }
    }
}

#[async_trait]
impl LoadSource for PressureSource {
    async fn sample(&self) -> Result<Load, AcquisitionError> {
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|source| AcquisitionError::Io {
                path: self.path.clone(),
                source,
            })?;

        let (avg10, avg60, avg300) = Self::parse(&self.path, &content)?;
        Ok(Load::new(LoadSourceKind::Pressure, avg10, avg60, avg300))
    }

    fn kind(&self) -> LoadSourceKind {
        LoadSourceKind::Pressure
    }
}
