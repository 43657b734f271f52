//! Error types shared across the controller

use std::path::PathBuf;

use thiserror::Error;

/// A load sample could not be taken this cycle
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
}

impl AcquisitionError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        AcquisitionError::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// A call to the Kubernetes API failed
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("failed to read {resource}: {source}")]
    Read {
        resource: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to write {resource}: {source}")]
    Write {
        resource: String,
        #[source]
        source: kube::Error,
    },

    /// A conditional write lost against a concurrent modification
    #[error("conflicting update on {resource}: {source}")]
    Conflict {
        resource: String,
        #[source]
        source: kube::Error,
    },
}

impl PlatformError {
    pub fn read(resource: impl Into<String>, source: kube::Error) -> Self {
        PlatformError::Read {
            resource: resource.into(),
            source,
        }
    }

    /// Classify a failed write; 409 and 422 mean a precondition did not hold
    pub fn write(resource: impl Into<String>, source: kube::Error) -> Self {
        let resource = resource.into();
        match &source {
            kube::Error::Api(response) if response.code == 409 || response.code == 422 => {
                PlatformError::Conflict { resource, source }
            }
            _ => PlatformError::Write { resource, source },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, PlatformError::Conflict { .. })
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PlatformError::Read { .. } => "read",
            PlatformError::Write { .. } => "write",
            PlatformError::Conflict { .. } => "conflict",
        }
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("injected failure {}", code),
        reason: "Injected".to_string(),
        code,
    })
}
