//! Kubernetes API access
//!
//! The controller talks to the cluster only through [`ClusterClient`], scoped
//! to the node it runs on. [`KubeClusterClient`] is the production
//! implementation; tests substitute an in-memory one.

mod kube_client;

pub use kube_client::{init_kube_client, KubeClusterClient};

use crate::error::PlatformError;
use k8s_openapi::api::core::v1::{Node, ObjectReference, Pod};
use std::fmt;
use tracing::warn;

pub use async_trait::async_trait;

/// Component name used as the event reporter
pub const COMPONENT_NAME: &str = "pressure-agent";

/// Severity of an operator-facing Kubernetes event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

/// Which part of the controller reports an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reporter {
    Tainter,
    Evicter,
}

impl fmt::Display for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reporter::Tainter => write!(f, "{}/tainter", COMPONENT_NAME),
            Reporter::Evicter => write!(f, "{}/evicter", COMPONENT_NAME),
        }
    }
}

/// Object an event is attached to
#[derive(Debug, Clone, PartialEq)]
pub enum EventTarget {
    /// The node this controller runs on
    Node,
    Pod(ObjectReference),
}

/// An operator-facing Kubernetes event
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterEvent {
    pub reporter: Reporter,
    pub target: EventTarget,
    pub severity: EventSeverity,
    pub reason: String,
    pub note: String,
}

impl ClusterEvent {
    pub fn warning(
        reporter: Reporter,
        target: EventTarget,
        reason: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            reporter,
            target,
            severity: EventSeverity::Warning,
            reason: reason.into(),
            note: note.into(),
        }
    }

    pub fn normal(
        reporter: Reporter,
        target: EventTarget,
        reason: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            reporter,
            target,
            severity: EventSeverity::Normal,
            reason: reason.into(),
            note: note.into(),
        }
    }
}

/// Node-scoped Kubernetes operations
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Name of the node this client is bound to
    fn node_name(&self) -> &str;

    /// Read the node object
    async fn get_node(&self) -> Result<Node, PlatformError>;

    /// Replace the node object with a modified copy
    async fn replace_node(&self, node: &Node) -> Result<(), PlatformError>;

    /// Remove the taint at `index`, but only if its key is still `key`
    async fn remove_taint_at(&self, index: usize, key: &str) -> Result<(), PlatformError>;

    /// List pods scheduled on the node
    async fn list_pods_on_node(&self) -> Result<Vec<Pod>, PlatformError>;

    /// Request eviction of a pod through the eviction subresource
    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), PlatformError>;

    /// Publish an event
    async fn publish_event(&self, event: ClusterEvent) -> Result<(), PlatformError>;
}

/// Publish an event, logging instead of failing
pub async fn emit_event(client: &dyn ClusterClient, event: ClusterEvent) {
    let reason = event.reason.clone();
    if let Err(e) = client.publish_event(event).await {
        warn!(reason = %reason, error = %e, "Failed to publish Kubernetes event");
    }
}

#[cfg(test)]
pub(crate) mod mock;
