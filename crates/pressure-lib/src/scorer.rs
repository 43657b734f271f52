//! Eviction candidate scoring
//!
//! Ranks the pods on a node by how cheap they are to evict. Every pod starts
//! at zero and independent rules add or subtract from its score. Anything
//! that ends up below [`ELIGIBLE_MIN_SCORE`] must never be evicted.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ObjectReference, Pod};
use std::time::Duration;
use tracing::info;

/// Lowest score a pod may have and still be evicted
pub const ELIGIBLE_MIN_SCORE: i64 = 0;

/// Penalty large enough to outweigh every bonus combined
const DISQUALIFYING_PENALTY: i64 = 10_000;
const UNOWNED_PENALTY: i64 = 1_000;
const QOS_BONUS: i64 = 100;
const REPLICA_OWNER_BONUS: i64 = 100;

pub const SYSTEM_NAMESPACE: &str = "kube-system";
pub const CRITICAL_POD_ANNOTATION: &str = "scheduler.alpha.kubernetes.io/critical-pod";
const CRITICAL_PRIORITY_CLASSES: &[&str] = &["system-cluster-critical", "system-node-critical"];

/// Kubernetes quality of service class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosClass {
    Guaranteed,
    Burstable,
    BestEffort,
    Unknown,
}

impl QosClass {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("Guaranteed") => QosClass::Guaranteed,
            Some("Burstable") => QosClass::Burstable,
            Some("BestEffort") => QosClass::BestEffort,
            _ => QosClass::Unknown,
        }
    }
}

/// The parts of a pod that matter for eviction
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub qos_class: QosClass,
    /// Kinds of the owning controllers (`ReplicaSet`, `DaemonSet`, ...)
    pub owner_kinds: Vec<String>,
    pub priority_class: Option<String>,
    pub critical_annotation: bool,
}

impl Workload {
    /// Reference used when attaching Kubernetes events to the pod
    pub fn object_ref(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Pod".to_string()),
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            uid: self.uid.clone(),
            ..ObjectReference::default()
        }
    }

    pub fn display_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl From<&Pod> for Workload {
    fn from(pod: &Pod) -> Self {
        let metadata = &pod.metadata;
        let status = pod.status.as_ref();

        Self {
            namespace: metadata.namespace.clone().unwrap_or_default(),
            name: metadata.name.clone().unwrap_or_default(),
            uid: metadata.uid.clone(),
            start_time: status.and_then(|s| s.start_time.as_ref()).map(|t| t.0),
            qos_class: QosClass::parse(status.and_then(|s| s.qos_class.as_deref())),
            owner_kinds: metadata
                .owner_references
                .iter()
                .flatten()
                .map(|o| o.kind.clone())
                .collect(),
            priority_class: pod
                .spec
                .as_ref()
                .and_then(|s| s.priority_class_name.clone()),
            critical_annotation: metadata
                .annotations
                .as_ref()
                .map(|a| a.contains_key(CRITICAL_POD_ANNOTATION))
                .unwrap_or(false),
        }
    }
}

/// A workload and its score for one ranking pass
#[derive(Debug, Clone, PartialEq)]
pub struct PodCandidate {
    pub workload: Workload,
    pub score: i64,
}

impl PodCandidate {
    pub fn is_eligible(&self) -> bool {
        self.score >= ELIGIBLE_MIN_SCORE
    }
}

/// Scores workloads for eviction
#[derive(Debug, Clone)]
pub struct Scorer {
    min_pod_age: Duration,
}

impl Scorer {
    pub fn new(min_pod_age: Duration) -> Self {
        Self { min_pod_age }
    }

    /// Total score of a workload at time `now`
    pub fn score(&self, workload: &Workload, now: DateTime<Utc>) -> i64 {
        self.score_age(workload, now)
            + Self::score_qos(workload)
            + Self::score_owner(workload)
            + Self::score_criticality(workload)
    }

    /// Older pods are slightly preferred; young or unstarted pods are excluded
    fn score_age(&self, workload: &Workload, now: DateTime<Utc>) -> i64 {
        let Some(started) = workload.start_time else {
            return -DISQUALIFYING_PENALTY;
        };

        let age = (now - started).to_std().unwrap_or(Duration::ZERO);
        if age < self.min_pod_age {
            return -DISQUALIFYING_PENALTY;
        }

        let secs = age.as_secs().max(1) as f64;
        secs.ln_1p().floor() as i64
    }

    fn score_qos(workload: &Workload) -> i64 {
        match workload.qos_class {
            QosClass::BestEffort | QosClass::Burstable => QOS_BONUS,
            QosClass::Guaranteed | QosClass::Unknown => 0,
        }
    }

    /// Unowned pods are not recreated; per-node and stateful pods must stay put
    fn score_owner(workload: &Workload) -> i64 {
        if workload.owner_kinds.is_empty() {
            return -UNOWNED_PENALTY;
        }

        workload
            .owner_kinds
            .iter()
            .map(|kind| match kind.as_str() {
                "ReplicaSet" => REPLICA_OWNER_BONUS,
                "StatefulSet" | "DaemonSet" => -DISQUALIFYING_PENALTY,
                _ => 0,
            })
            .sum()
    }

    fn score_criticality(workload: &Workload) -> i64 {
        let mut score = 0;

        if workload.namespace == SYSTEM_NAMESPACE {
            score -= DISQUALIFYING_PENALTY;
        }
        if workload
            .priority_class
            .as_deref()
            .is_some_and(|p| CRITICAL_PRIORITY_CLASSES.contains(&p))
        {
            score -= DISQUALIFYING_PENALTY;
        }
        if workload.critical_annotation {
            score -= DISQUALIFYING_PENALTY;
        }

        score
    }

    /// Score every workload and order them best candidate first
    ///
    /// The sort is stable, so equal scores keep the order in which the pods
    /// were listed.
    pub fn rank(&self, workloads: Vec<Workload>, now: DateTime<Utc>) -> Vec<PodCandidate> {
        let mut candidates: Vec<PodCandidate> = workloads
            .into_iter()
            .map(|workload| {
                let score = self.score(&workload, now);
                PodCandidate { workload, score }
            })
            .collect();

        candidates.sort_by(|a, b| b.score.cmp(&a.score));
        candidates
    }

    /// Rank the workloads and pick the one to evict, logging the ranking
    pub fn select_for_eviction(
        &self,
        workloads: Vec<Workload>,
        now: DateTime<Utc>,
    ) -> Option<PodCandidate> {
        let ranked = self.rank(workloads, now);

        for candidate in &ranked {
            info!(
                pod = %candidate.workload.display_name(),
                score = candidate.score,
                "Eviction candidate"
            );
        }

        let selected = select_first_eligible(&ranked).cloned();
        if let Some(candidate) = &selected {
            info!(
                pod = %candidate.workload.display_name(),
                score = candidate.score,
                "Selected eviction candidate"
            );
        }
        selected
    }
}

/// First candidate in ranked order whose score makes it eligible
pub fn select_first_eligible(ranked: &[PodCandidate]) -> Option<&PodCandidate> {
    ranked.iter().find(|c| c.is_eligible())
}
