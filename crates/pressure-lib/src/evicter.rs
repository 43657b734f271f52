//! Pod eviction
//!
//! Evicts at most one pod per attempt and never two within the backoff
//! window. Which pod goes is decided by the [`Scorer`].

use crate::error::PlatformError;
use crate::models::ThresholdEvent;
use crate::observability::ControllerMetrics;
use crate::platform::{emit_event, ClusterClient, ClusterEvent, EventTarget, Reporter};
use crate::scorer::{PodCandidate, Scorer, Workload};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Configuration for the evicter
#[derive(Debug, Clone)]
pub struct EvicterConfig {
    /// Minimum time between two evictions (default: 10 minutes)
    pub backoff: Duration,
    /// Pods younger than this are never evicted (default: 5 minutes)
    pub min_pod_age: Duration,
}

impl Default for EvicterConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(10 * 60),
            min_pod_age: Duration::from_secs(5 * 60),
        }
    }
}

/// Result of an eviction attempt
#[derive(Debug)]
pub enum EvictionOutcome {
    Evicted(PodCandidate),
    /// A pod was chosen and counted, but the eviction request failed
    RequestFailed {
        candidate: PodCandidate,
        error: PlatformError,
    },
    /// A previous eviction is still inside the backoff window
    BackedOff,
    /// Every pod on the node is ineligible
    NoCandidate,
}

impl EvictionOutcome {
    /// True if an eviction was attempted, whether or not the request succeeded
    pub fn did_evict(&self) -> bool {
        matches!(
            self,
            EvictionOutcome::Evicted(_) | EvictionOutcome::RequestFailed { .. }
        )
    }
}

/// Rate-limited pod evicter
pub struct Evicter {
    client: Arc<dyn ClusterClient>,
    scorer: Scorer,
    backoff: Duration,
    last_eviction: Option<Instant>,
    metrics: ControllerMetrics,
}

impl Evicter {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        config: EvicterConfig,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            client,
            scorer: Scorer::new(config.min_pod_age),
            backoff: config.backoff,
            last_eviction: None,
            metrics,
        }
    }

    /// True if no eviction happened yet or the backoff has fully elapsed
    pub fn can_evict(&self, now: Instant) -> bool {
        match self.last_eviction {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.backoff,
        }
    }

    pub fn last_eviction(&self) -> Option<Instant> {
        self.last_eviction
    }

    /// Evict the best candidate on this node, if allowed
    ///
    /// The backoff clock starts before the eviction request is sent, so a
    /// failed or slow request still counts as an attempt and is reported as
    /// [`EvictionOutcome::RequestFailed`]. Only a failed pod listing is an
    /// `Err`.
    pub async fn evict_pod(
        &mut self,
        event: &ThresholdEvent,
    ) -> Result<EvictionOutcome, PlatformError> {
        if !self.can_evict(Instant::now()) {
            debug!("Eviction threshold exceeded, still in back-off");
            return Ok(EvictionOutcome::BackedOff);
        }

        info!(node = %self.client.node_name(), "Searching for pod to evict");

        let pods = self.client.list_pods_on_node().await?;
        let workloads: Vec<Workload> = pods.iter().map(Workload::from).collect();

        let Some(candidate) = self
            .scorer
            .select_for_eviction(workloads, chrono::Utc::now())
        else {
            emit_event(
                self.client.as_ref(),
                ClusterEvent::warning(
                    Reporter::Evicter,
                    EventTarget::Node,
                    "NoPodToEvict",
                    "wanted to evict pod, but no suitable candidate found",
                ),
            )
            .await;
            return Ok(EvictionOutcome::NoCandidate);
        };

        let workload = &candidate.workload;
        info!(
            pod = %workload.display_name(),
            score = candidate.score,
            "Evicting pod"
        );

        self.last_eviction = Some(Instant::now());
        self.metrics.inc_pods_evicted();

        emit_event(
            self.client.as_ref(),
            ClusterEvent::warning(
                Reporter::Evicter,
                EventTarget::Pod(workload.object_ref()),
                "EvictHighLoad",
                format!("evicting pod due to {}", event.summary),
            ),
        )
        .await;
        emit_event(
            self.client.as_ref(),
            ClusterEvent::warning(
                Reporter::Evicter,
                EventTarget::Node,
                "EvictHighLoad",
                format!(
                    "evicting pod {} due to high cpu pressure on node: {}",
                    workload.display_name(),
                    event.summary
                ),
            ),
        )
        .await;

        if let Err(error) = self
            .client
            .evict_pod(&workload.namespace, &workload.name)
            .await
        {
            return Ok(EvictionOutcome::RequestFailed { candidate, error });
        }

        Ok(EvictionOutcome::Evicted(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Load, LoadSourceKind, MetricWindow, ThresholdEventKind};
    use crate::platform::mock::MockCluster;
    use k8s_openapi::api::core::v1::{Pod, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
    use std::sync::atomic::Ordering;

    fn exceed() -> ThresholdEvent {
        ThresholdEvent::new(
            ThresholdEventKind::Exceed,
            Load::new(LoadSourceKind::Pressure, 80.0, 60.0, 40.0),
            MetricWindow::Short,
            25.0,
        )
    }

    fn pod(namespace: &str, name: &str, age: chrono::Duration, owner: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                owner_references: owner.map(|kind| {
                    vec![OwnerReference {
                        kind: kind.to_string(),
                        name: format!("{}-owner", name),
                        ..OwnerReference::default()
                    }]
                }),
                ..ObjectMeta::default()
            },
            spec: None,
            status: Some(PodStatus {
                qos_class: Some("Burstable".to_string()),
                start_time: Some(Time(chrono::Utc::now() - age)),
                ..PodStatus::default()
            }),
        }
    }

    fn setup(mock: MockCluster, backoff: Duration) -> (Arc<MockCluster>, Evicter) {
        let mock = Arc::new(mock);
        let evicter = Evicter::new(
            mock.clone(),
            EvicterConfig {
                backoff,
                min_pod_age: Duration::from_secs(300),
            },
            ControllerMetrics::new(),
        );
        (mock, evicter)
    }

    #[tokio::test]
    async fn test_evicts_best_candidate() {
        let mock = MockCluster::new().with_pods(vec![
            pod("default", "young", chrono::Duration::minutes(1), Some("ReplicaSet")),
            pod("default", "web", chrono::Duration::hours(1), Some("ReplicaSet")),
            pod("default", "db", chrono::Duration::hours(5), Some("StatefulSet")),
        ]);
        let (mock, mut evicter) = setup(mock, Duration::from_secs(600));

        let outcome = evicter.evict_pod(&exceed()).await.unwrap();

        match outcome {
            EvictionOutcome::Evicted(candidate) => assert_eq!(candidate.workload.name, "web"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(*mock.evictions.lock().unwrap(), vec!["default/web"]);
        assert_eq!(
            mock.event_reasons(),
            vec!["EvictHighLoad", "EvictHighLoad"]
        );
        assert!(evicter.last_eviction().is_some());
    }

    #[tokio::test]
    async fn test_second_attempt_within_backoff_skips_listing() {
        let mock = MockCluster::new().with_pods(vec![
            pod("default", "a", chrono::Duration::hours(1), Some("ReplicaSet")),
            pod("default", "b", chrono::Duration::hours(1), Some("ReplicaSet")),
        ]);
        let (mock, mut evicter) = setup(mock, Duration::from_secs(600));

        assert!(evicter.evict_pod(&exceed()).await.unwrap().did_evict());
        let outcome = evicter.evict_pod(&exceed()).await.unwrap();

        assert!(matches!(outcome, EvictionOutcome::BackedOff));
        assert_eq!(mock.pod_lists.load(Ordering::SeqCst), 1);
        assert_eq!(mock.evictions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_request_still_starts_backoff() {
        let mock = MockCluster::new().with_pods(vec![pod(
            "default",
            "a",
            chrono::Duration::hours(1),
            Some("ReplicaSet"),
        )]);
        let (mock, mut evicter) = setup(mock, Duration::from_secs(600));
        mock.fail_evictions.store(true, Ordering::SeqCst);

        let outcome = evicter.evict_pod(&exceed()).await.unwrap();

        assert!(outcome.did_evict());
        match outcome {
            EvictionOutcome::RequestFailed { candidate, error } => {
                assert_eq!(candidate.workload.name, "a");
                assert!(matches!(error, PlatformError::Write { .. }));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(evicter.last_eviction().is_some());
        assert!(matches!(
            evicter.evict_pod(&exceed()).await.unwrap(),
            EvictionOutcome::BackedOff
        ));
    }

    #[tokio::test]
    async fn test_no_candidate_is_not_an_error() {
        let mock = MockCluster::new().with_pods(vec![
            pod("kube-system", "dns", chrono::Duration::hours(1), Some("ReplicaSet")),
            pod("default", "static", chrono::Duration::hours(1), None),
        ]);
        let (mock, mut evicter) = setup(mock, Duration::from_secs(600));

        let outcome = evicter.evict_pod(&exceed()).await.unwrap();

        assert!(matches!(outcome, EvictionOutcome::NoCandidate));
        assert!(evicter.last_eviction().is_none());
        assert!(mock.evictions.lock().unwrap().is_empty());
        assert_eq!(mock.event_reasons(), vec!["NoPodToEvict"]);
    }

    #[tokio::test]
    async fn test_list_failure_propagates_without_backoff() {
        let (mock, mut evicter) = setup(MockCluster::new(), Duration::from_secs(600));
        mock.fail_reads.store(true, Ordering::SeqCst);

        assert!(matches!(
            evicter.evict_pod(&exceed()).await,
            Err(PlatformError::Read { .. })
        ));
        assert!(evicter.can_evict(Instant::now()));
    }

    #[test]
    fn test_can_evict_after_backoff_elapses() {
        let (_mock, mut evicter) = setup(MockCluster::new(), Duration::from_secs(600));
        let start = Instant::now();

        assert!(evicter.can_evict(start));

        evicter.last_eviction = Some(start);
        assert!(!evicter.can_evict(start + Duration::from_secs(300)));
        assert!(!evicter.can_evict(start + Duration::from_secs(600)));
        assert!(evicter.can_evict(start + Duration::from_secs(601)));
    }
}
