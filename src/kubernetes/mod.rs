//! Cluster access.
//!
//! Everything above this module talks to the cluster through [`ClusterApi`].
//! [`KubeCluster`] is the real implementation over a [`ClusterHandle`];
//! [`MockCluster`] keeps everything in memory.

use async_trait::async_trait;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{Container, Namespace, Pod};
use kube::api::ObjectMeta;
use std::time::Duration;

use crate::error::Result;
use crate::types::{Workload, WorkloadKind};
use crate::vpa::{VerticalPodAutoscaler, VerticalPodAutoscalerSpec};

pub mod client;
pub mod handle;
pub mod mock;

pub use client::KubeCluster;
pub use handle::{ClusterHandle, CoreClient, VpaClient};
pub use mock::{MockCluster, MockWrite};

/// Upper bound on any single API call.
pub const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Any namespaced object, reduced to what the owner walker and summarizer read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterObject {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    /// Containers of the pod template, if the object has one.
    pub containers: Vec<Container>,
}

impl ClusterObject {
    pub fn to_workload(&self, namespace: &str) -> Workload {
        Workload {
            namespace: namespace.to_string(),
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.metadata.name.clone().unwrap_or_default(),
            annotations: self.metadata.annotations.clone().unwrap_or_default(),
        }
    }
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// `None` when the namespace does not exist.
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    async fn list_namespaces(&self, label_selector: Option<&str>) -> Result<Vec<Namespace>>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>>;

    /// Kinds the cluster does not serve list as empty.
    async fn list_workloads(&self, namespace: &str, kind: &WorkloadKind) -> Result<Vec<Workload>>;

    /// `None` for missing objects and kinds the cluster does not serve.
    async fn get_object(
        &self,
        namespace: &str,
        api_version: &str,
        kind: &str,
        name: &str,
    ) -> Result<Option<ClusterObject>>;

    async fn list_hpas(&self, namespace: &str) -> Result<Vec<HorizontalPodAutoscaler>>;

    /// All namespaces when `namespace` is `None`.
    async fn list_vpas(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<VerticalPodAutoscaler>>;

    async fn create_vpa(&self, namespace: &str, vpa: &VerticalPodAutoscaler) -> Result<()>;

    /// Merge-patch `targetRef` and `updatePolicy.updateMode` only.
    async fn update_vpa(&self, namespace: &str, name: &str, spec: &VerticalPodAutoscalerSpec) -> Result<()>;

    /// Deleting a missing VPA succeeds.
    async fn delete_vpa(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Pull pod template containers out of a raw object body.
/// Handles `spec.template` and the CronJob `spec.jobTemplate.spec.template` layout.
pub fn pod_template_containers(data: &serde_json::Value) -> Vec<Container> {
    let spec = &data["spec"];
    let template = if spec["template"].is_object() {
        &spec["template"]
    } else {
        &spec["jobTemplate"]["spec"]["template"]
    };
    match template["spec"]["containers"].as_array() {
        Some(containers) => containers
            .iter()
            .filter_map(|c| serde_json::from_value(c.clone()).ok())
            .collect(),
        None => Vec::new(),
    }
}
