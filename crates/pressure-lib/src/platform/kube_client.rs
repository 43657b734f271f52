//! `kube`-backed cluster client

use super::{async_trait, ClusterClient, ClusterEvent, EventSeverity, EventTarget};
use crate::error::PlatformError;
use anyhow::{Context, Result};
use json_patch::{PatchOperation, RemoveOperation, TestOperation};
use k8s_openapi::api::core::v1::{Node, ObjectReference, Pod};
use kube::api::{Api, EvictParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Config};
use std::path::PathBuf;
use tracing::debug;

/// Build a client from an explicit kubeconfig, or from the in-cluster /
/// default configuration when none is given
pub async fn init_kube_client(kubeconfig: Option<PathBuf>) -> Result<Client> {
    let client = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(&path)
                .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;

            let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .with_context(|| {
                    format!("Failed to create config from kubeconfig {}", path.display())
                })?;

            Client::try_from(config).context("Failed to create Kubernetes client")?
        }
        None => Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?,
    };

    Ok(client)
}

/// Cluster client bound to one node
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    node_name: String,
    nodes: Api<Node>,
}

impl KubeClusterClient {
    pub fn new(client: Client, node_name: impl Into<String>) -> Self {
        Self {
            nodes: Api::all(client.clone()),
            client,
            node_name: node_name.into(),
        }
    }

    fn node_resource(&self) -> String {
        format!("node/{}", self.node_name)
    }

    fn node_ref(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Node".to_string()),
            name: Some(self.node_name.clone()),
            // kubelet convention: node events use the node name as uid
            uid: Some(self.node_name.clone()),
            ..ObjectReference::default()
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    fn node_name(&self) -> &str {
        &self.node_name
    }

    async fn get_node(&self) -> Result<Node, PlatformError> {
        self.nodes
            .get(&self.node_name)
            .await
            .map_err(|e| PlatformError::read(self.node_resource(), e))
    }

    async fn replace_node(&self, node: &Node) -> Result<(), PlatformError> {
        self.nodes
            .replace(&self.node_name, &PostParams::default(), node)
            .await
            .map(|_| ())
            .map_err(|e| PlatformError::write(self.node_resource(), e))
    }

    async fn remove_taint_at(&self, index: usize, key: &str) -> Result<(), PlatformError> {
        let patch = json_patch::Patch(vec![
            PatchOperation::Test(TestOperation {
                path: format!("/spec/taints/{}/key", index),
                value: serde_json::Value::String(key.to_string()),
            }),
            PatchOperation::Remove(RemoveOperation {
                path: format!("/spec/taints/{}", index),
            }),
        ]);

        debug!(node = %self.node_name, index, "Patching node to remove taint");

        self.nodes
            .patch(
                &self.node_name,
                &PatchParams::default(),
                &Patch::Json::<()>(patch),
            )
            .await
            .map(|_| ())
            .map_err(|e| PlatformError::write(self.node_resource(), e))
    }

    async fn list_pods_on_node(&self) -> Result<Vec<Pod>, PlatformError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={}", self.node_name));

        pods.list(&params)
            .await
            .map(|list| list.items)
            .map_err(|e| PlatformError::read(format!("pods on {}", self.node_resource()), e))
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), PlatformError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        pods.evict(name, &EvictParams::default())
            .await
            .map(|_| ())
            .map_err(|e| PlatformError::write(format!("pod/{}/{}", namespace, name), e))
    }

    async fn publish_event(&self, event: ClusterEvent) -> Result<(), PlatformError> {
        let reference = match event.target {
            EventTarget::Node => self.node_ref(),
            EventTarget::Pod(reference) => reference,
        };

        let reporter = Reporter {
            controller: event.reporter.to_string(),
            instance: Some(self.node_name.clone()),
        };

        let recorder = Recorder::new(self.client.clone(), reporter, reference);
        recorder
            .publish(Event {
                type_: match event.severity {
                    EventSeverity::Normal => EventType::Normal,
                    EventSeverity::Warning => EventType::Warning,
                },
                action: event.reason.clone(),
                reason: event.reason,
                note: Some(event.note),
                secondary: None,
            })
            .await
            .map_err(|e| PlatformError::write("event", e))
    }
}
