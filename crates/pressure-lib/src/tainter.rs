//! Node tainting
//!
//! Adds and removes the overload taint on this node. Both directions are
//! idempotent and always start from a fresh read of the node.

use crate::error::PlatformError;
use crate::models::ThresholdEvent;
use crate::platform::{emit_event, ClusterClient, ClusterEvent, EventTarget, Reporter};
use k8s_openapi::api::core::v1::{Node, NodeSpec, Taint};
use std::sync::Arc;
use tracing::info;

/// Taint placed on overloaded nodes
pub const TAINT_KEY: &str = "pressure-agent/load-exceeded";

/// Soft exclusion: the scheduler avoids the node but may still use it
pub const TAINT_EFFECT: &str = "PreferNoSchedule";

/// Node label acting as a per-node kill switch
pub const ENABLED_LABEL: &str = "pressure-agent.enabled";

/// Result of a taint request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaintOutcome {
    Applied,
    AlreadyPresent,
}

/// Result of an untaint request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UntaintOutcome {
    Removed,
    AlreadyAbsent,
}

/// Why the taint is being removed
#[derive(Debug, Clone, Copy)]
pub enum UntaintCause<'a> {
    /// Pressure dropped below the threshold
    Recovered(&'a ThresholdEvent),
    /// An operator disabled the controller on this node
    Disabled,
}

fn taint_index(node: &Node) -> Option<usize> {
    node.spec
        .as_ref()
        .and_then(|s| s.taints.as_ref())
        .and_then(|taints| taints.iter().position(|t| t.key == TAINT_KEY))
}

/// Idempotent node-taint mutator
pub struct Tainter {
    client: Arc<dyn ClusterClient>,
}

impl Tainter {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    pub async fn is_node_tainted(&self) -> Result<bool, PlatformError> {
        let node = self.client.get_node().await?;
        Ok(taint_index(&node).is_some())
    }

    /// True if the node carries the enabled label set to "false" (any case)
    pub async fn is_controller_disabled(&self) -> Result<bool, PlatformError> {
        let node = self.client.get_node().await?;

        Ok(node
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(ENABLED_LABEL))
            .is_some_and(|v| v.eq_ignore_ascii_case("false")))
    }

    pub async fn taint_node(&self, event: &ThresholdEvent) -> Result<TaintOutcome, PlatformError> {
        let mut node = self.client.get_node().await?;

        if taint_index(&node).is_some() {
            info!(node = %self.client.node_name(), "Wanted to taint node, but taint already exists");
            return Ok(TaintOutcome::AlreadyPresent);
        }

        node.spec
            .get_or_insert_with(NodeSpec::default)
            .taints
            .get_or_insert_with(Vec::new)
            .push(Taint {
                key: TAINT_KEY.to_string(),
                value: Some("true".to_string()),
                effect: TAINT_EFFECT.to_string(),
                time_added: None,
            });

        if let Err(e) = self.client.replace_node(&node).await {
            self.emit_patch_error(&e).await;
            return Err(e);
        }

        emit_event(
            self.client.as_ref(),
            ClusterEvent::warning(
                Reporter::Tainter,
                EventTarget::Node,
                "CPUPressureExceeded",
                format!("{}, tainting node", event.summary),
            ),
        )
        .await;

        Ok(TaintOutcome::Applied)
    }

    pub async fn untaint_node(
        &self,
        cause: UntaintCause<'_>,
    ) -> Result<UntaintOutcome, PlatformError> {
        let node = self.client.get_node().await?;

        let Some(index) = taint_index(&node) else {
            info!(node = %self.client.node_name(), "Wanted to remove taint from node, but taint was already gone");
            return Ok(UntaintOutcome::AlreadyAbsent);
        };

        if let Err(e) = self.client.remove_taint_at(index, TAINT_KEY).await {
            if !e.is_conflict() {
                self.emit_patch_error(&e).await;
            }
            return Err(e);
        }

        let note = match cause {
            UntaintCause::Recovered(event) => format!("{}, untainting node", event.summary),
            UntaintCause::Disabled => "controller disabled on node, untainting node".to_string(),
        };

        emit_event(
            self.client.as_ref(),
            ClusterEvent::normal(
                Reporter::Tainter,
                EventTarget::Node,
                "LoadThresholdDeceeded",
                note,
            ),
        )
        .await;

        Ok(UntaintOutcome::Removed)
    }

    async fn emit_patch_error(&self, error: &PlatformError) {
        emit_event(
            self.client.as_ref(),
            ClusterEvent::warning(
                Reporter::Tainter,
                EventTarget::Node,
                "NodePatchError",
                format!("could not patch node: {}", error),
            ),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Load, LoadSourceKind, MetricWindow, ThresholdEventKind};
    use crate::platform::mock::MockCluster;
    use std::sync::atomic::Ordering;

    fn exceed() -> ThresholdEvent {
        ThresholdEvent::new(
            ThresholdEventKind::Exceed,
            Load::new(LoadSourceKind::Pressure, 40.0, 30.0, 20.0),
            MetricWindow::Mid,
            25.0,
        )
    }

    fn deceed() -> ThresholdEvent {
        ThresholdEvent::new(
            ThresholdEventKind::Deceed,
            Load::new(LoadSourceKind::Pressure, 10.0, 10.0, 10.0),
            MetricWindow::Short,
            25.0,
        )
    }

    fn setup(mock: MockCluster) -> (Arc<MockCluster>, Tainter) {
        let mock = Arc::new(mock);
        let tainter = Tainter::new(mock.clone());
        (mock, tainter)
    }

    #[tokio::test]
    async fn test_taint_twice_writes_once() {
        let (mock, tainter) = setup(MockCluster::new());

        assert_eq!(tainter.taint_node(&exceed()).await.unwrap(), TaintOutcome::Applied);
        assert_eq!(
            tainter.taint_node(&exceed()).await.unwrap(),
            TaintOutcome::AlreadyPresent
        );

        assert_eq!(mock.taint_count(TAINT_KEY), 1);
        assert_eq!(mock.writes(), 1);

        let taint = &mock.taints()[0];
        assert_eq!(taint.effect, TAINT_EFFECT);
        assert_eq!(mock.event_reasons(), vec!["CPUPressureExceeded"]);
    }

    #[tokio::test]
    async fn test_taint_preserves_foreign_taints() {
        let (mock, tainter) = setup(MockCluster::new().with_taint("example.com/other"));

        tainter.taint_node(&exceed()).await.unwrap();

        assert_eq!(mock.taints().len(), 2);
        assert!(tainter.is_node_tainted().await.unwrap());
    }

    #[tokio::test]
    async fn test_untaint_when_absent_is_noop() {
        let (mock, tainter) = setup(MockCluster::new());

        let outcome = tainter.untaint_node(UntaintCause::Recovered(&deceed())).await;

        assert_eq!(outcome.unwrap(), UntaintOutcome::AlreadyAbsent);
        assert_eq!(mock.writes(), 0);
        assert!(mock.event_reasons().is_empty());
    }

    #[tokio::test]
    async fn test_untaint_removes_only_our_taint() {
        let (mock, tainter) = setup(
            MockCluster::new()
                .with_taint("example.com/other")
                .with_taint(TAINT_KEY),
        );

        let outcome = tainter.untaint_node(UntaintCause::Recovered(&deceed())).await;

        assert_eq!(outcome.unwrap(), UntaintOutcome::Removed);
        let taints = mock.taints();
        assert_eq!(taints.len(), 1);
        assert_eq!(taints[0].key, "example.com/other");
        assert_eq!(mock.event_reasons(), vec!["LoadThresholdDeceeded"]);
    }

    #[tokio::test]
    async fn test_untaint_aborts_on_concurrent_edit() {
        let (mock, tainter) = setup(MockCluster::new().with_taint(TAINT_KEY));
        mock.edit_before_patch.store(true, Ordering::SeqCst);

        let result = tainter.untaint_node(UntaintCause::Recovered(&deceed())).await;

        assert!(result.unwrap_err().is_conflict());
        // the concurrent edit survives and our taint is untouched
        assert_eq!(mock.taints().len(), 2);
        assert_eq!(mock.taint_count(TAINT_KEY), 1);
        assert!(mock.event_reasons().is_empty());
    }

    #[tokio::test]
    async fn test_taint_write_failure_propagates() {
        let (mock, tainter) = setup(MockCluster::new());
        mock.fail_writes.store(true, Ordering::SeqCst);

        let result = tainter.taint_node(&exceed()).await;

        assert!(matches!(result, Err(PlatformError::Write { .. })));
        assert_eq!(mock.taint_count(TAINT_KEY), 0);
        assert_eq!(mock.event_reasons(), vec!["NodePatchError"]);
    }

    #[tokio::test]
    async fn test_disabled_label_is_case_insensitive() {
        for (value, disabled) in [("false", true), ("FALSE", true), ("False", true), ("true", false), ("no", false)] {
            let (_mock, tainter) = setup(MockCluster::new().with_label(ENABLED_LABEL, value));
            assert_eq!(
                tainter.is_controller_disabled().await.unwrap(),
                disabled,
                "label value {}",
                value
            );
        }

        let (_mock, tainter) = setup(MockCluster::new());
        assert!(!tainter.is_controller_disabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_read_failure_propagates() {
        let (mock, tainter) = setup(MockCluster::new());
        mock.fail_reads.store(true, Ordering::SeqCst);

        assert!(matches!(
            tainter.is_node_tainted().await,
            Err(PlatformError::Read { .. })
        ));
        assert!(tainter.taint_node(&exceed()).await.is_err());
        assert_eq!(mock.writes(), 0);
    }
}
