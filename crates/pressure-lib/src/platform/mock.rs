//! In-memory cluster for tests

use super::{async_trait, ClusterClient, ClusterEvent};
use crate::error::{api_error, PlatformError};
use k8s_openapi::api::core::v1::{Node, NodeSpec, Pod, Taint};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub(crate) const NODE_NAME: &str = "test-node";

/// Single-node cluster that records every call
#[derive(Default)]
pub(crate) struct MockCluster {
    pub node: Mutex<Node>,
    pub pods: Mutex<Vec<Pod>>,
    pub events: Mutex<Vec<ClusterEvent>>,
    pub evictions: Mutex<Vec<String>>,
    pub node_reads: AtomicUsize,
    pub node_writes: AtomicUsize,
    pub pod_lists: AtomicUsize,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub fail_evictions: AtomicBool,
    /// Insert a foreign taint at the front just before a taint patch lands
    pub edit_before_patch: AtomicBool,
}

impl MockCluster {
    pub fn new() -> Self {
        let mock = Self::default();
        *mock.node.lock().unwrap() = Node {
            metadata: ObjectMeta {
                name: Some(NODE_NAME.to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(NodeSpec::default()),
            status: None,
        };
        mock
    }

    pub fn with_label(self, key: &str, value: &str) -> Self {
        self.node
            .lock()
            .unwrap()
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_taint(self, key: &str) -> Self {
        self.push_taint(key);
        self
    }

    pub fn with_pods(self, pods: Vec<Pod>) -> Self {
        *self.pods.lock().unwrap() = pods;
        self
    }

    /// Add a taint as if some other actor had edited the node
    pub fn push_taint(&self, key: &str) {
        self.node
            .lock()
            .unwrap()
            .spec
            .get_or_insert_with(NodeSpec::default)
            .taints
            .get_or_insert_with(Vec::new)
            .push(Taint {
                key: key.to_string(),
                value: Some("true".to_string()),
                effect: "NoSchedule".to_string(),
                time_added: None,
            });
    }

    pub fn taints(&self) -> Vec<Taint> {
        self.node
            .lock()
            .unwrap()
            .spec
            .as_ref()
            .and_then(|s| s.taints.clone())
            .unwrap_or_default()
    }

    pub fn taint_count(&self, key: &str) -> usize {
        self.taints().iter().filter(|t| t.key == key).count()
    }

    pub fn event_reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.reason.clone())
            .collect()
    }

    pub fn writes(&self) -> usize {
        self.node_writes.load(Ordering::SeqCst)
    }

    fn check_write(&self, resource: &str) -> Result<(), PlatformError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PlatformError::write(resource, api_error(500)));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    fn node_name(&self) -> &str {
        NODE_NAME
    }

    async fn get_node(&self) -> Result<Node, PlatformError> {
        self.node_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PlatformError::read("node/test-node", api_error(503)));
        }
        Ok(self.node.lock().unwrap().clone())
    }

    async fn replace_node(&self, node: &Node) -> Result<(), PlatformError> {
        self.check_write("node/test-node")?;
        self.node_writes.fetch_add(1, Ordering::SeqCst);
        *self.node.lock().unwrap() = node.clone();
        Ok(())
    }

    async fn remove_taint_at(&self, index: usize, key: &str) -> Result<(), PlatformError> {
        self.check_write("node/test-node")?;

        if self.edit_before_patch.swap(false, Ordering::SeqCst) {
            self.node
                .lock()
                .unwrap()
                .spec
                .get_or_insert_with(NodeSpec::default)
                .taints
                .get_or_insert_with(Vec::new)
                .insert(
                    0,
                    Taint {
                        key: "example.com/concurrent".to_string(),
                        value: None,
                        effect: "NoSchedule".to_string(),
                        time_added: None,
                    },
                );
        }

        let mut node = self.node.lock().unwrap();
        let taints = node
            .spec
            .get_or_insert_with(NodeSpec::default)
            .taints
            .get_or_insert_with(Vec::new);

        if taints.get(index).map(|t| t.key.as_str()) != Some(key) {
            return Err(PlatformError::write("node/test-node", api_error(422)));
        }

        taints.remove(index);
        self.node_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_pods_on_node(&self) -> Result<Vec<Pod>, PlatformError> {
        self.pod_lists.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PlatformError::read("pods", api_error(503)));
        }
        Ok(self.pods.lock().unwrap().clone())
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), PlatformError> {
        let resource = format!("pod/{}/{}", namespace, name);
        self.evictions.lock().unwrap().push(format!("{}/{}", namespace, name));
        if self.fail_evictions.load(Ordering::SeqCst) {
            return Err(PlatformError::write(resource, api_error(429)));
        }
        Ok(())
    }

    async fn publish_event(&self, event: ClusterEvent) -> Result<(), PlatformError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}
