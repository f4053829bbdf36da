use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Resource;
use serde_json::json;
use tracing::debug;

use super::{pod_template_containers, ClusterApi, ClusterHandle, ClusterObject, API_TIMEOUT};
use crate::error::{Error, Result};
use crate::types::{Workload, WorkloadKind};
use crate::vpa::{VerticalPodAutoscaler, VerticalPodAutoscalerSpec};

/// [`ClusterApi`] over a live API server.
#[derive(Clone)]
pub struct KubeCluster {
    handle: Arc<ClusterHandle>,
    timeout: Duration,
}

impl KubeCluster {
    pub fn new(handle: Arc<ClusterHandle>) -> Self {
        Self { handle, timeout: API_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn handle(&self) -> &Arc<ClusterHandle> {
        &self.handle
    }

    async fn bounded<T, F>(&self, operation: String, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout { operation, timeout: self.timeout }),
        }
    }
}

fn list_params(label_selector: Option<&str>) -> ListParams {
    match label_selector {
        Some(selector) => ListParams::default().labels(selector),
        None => ListParams::default(),
    }
}

fn to_workloads<K: Resource>(items: Vec<K>, namespace: &str, kind: &WorkloadKind) -> Vec<Workload> {
    items
        .into_iter()
        .map(|item| {
            let meta = item.meta();
            Workload {
                namespace: namespace.to_string(),
                api_version: kind.api_version.clone(),
                kind: kind.kind.clone(),
                name: meta.name.clone().unwrap_or_default(),
                annotations: meta.annotations.clone().unwrap_or_default(),
            }
        })
        .collect()
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        self.bounded(format!("get namespace {}", name), async {
            let api = self.handle.core().await?.namespaces();
            Ok(api.get_opt(name).await?)
        })
        .await
    }

    async fn list_namespaces(&self, label_selector: Option<&str>) -> Result<Vec<Namespace>> {
        self.bounded("list namespaces".to_string(), async {
            let api = self.handle.core().await?.namespaces();
            Ok(api.list(&list_params(label_selector)).await?.items)
        })
        .await
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        self.bounded(format!("list pods in {}", namespace), async {
            let api = self.handle.core().await?.pods(namespace);
            Ok(api.list(&ListParams::default()).await?.items)
        })
        .await
    }

    async fn list_workloads(&self, namespace: &str, kind: &WorkloadKind) -> Result<Vec<Workload>> {
        self.bounded(format!("list {} in {}", kind, namespace), async {
            let core = self.handle.core().await?;
            let lp = ListParams::default();
            let workloads = match (kind.api_version.as_str(), kind.kind.as_str()) {
                ("apps/v1", "Deployment") => to_workloads(core.deployments(namespace).list(&lp).await?.items, namespace, kind),
                ("apps/v1", "DaemonSet") => to_workloads(core.daemon_sets(namespace).list(&lp).await?.items, namespace, kind),
                ("apps/v1", "StatefulSet") => to_workloads(core.stateful_sets(namespace).list(&lp).await?.items, namespace, kind),
                _ => match core.dynamic(namespace, kind).await? {
                    Some(api) => to_workloads(api.list(&lp).await?.items, namespace, kind),
                    None => Vec::new(),
                },
            };
            Ok(workloads)
        })
        .await
    }

    async fn get_object(
        &self,
        namespace: &str,
        api_version: &str,
        kind: &str,
        name: &str,
    ) -> Result<Option<ClusterObject>> {
        let workload_kind = WorkloadKind::new(api_version, kind);
        self.bounded(format!("get {} {}/{}", workload_kind, namespace, name), async {
            let Some(api) = self.handle.core().await?.dynamic(namespace, &workload_kind).await? else {
                return Ok(None);
            };
            let object = api.get_opt(name).await?.map(|obj| ClusterObject {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
                containers: pod_template_containers(&obj.data),
                metadata: obj.metadata,
            });
            Ok(object)
        })
        .await
    }

    async fn list_hpas(&self, namespace: &str) -> Result<Vec<HorizontalPodAutoscaler>> {
        self.bounded(format!("list HPAs in {}", namespace), async {
            let api = self.handle.core().await?.hpas(namespace);
            Ok(api.list(&ListParams::default()).await?.items)
        })
        .await
    }

    async fn list_vpas(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<VerticalPodAutoscaler>> {
        let operation = format!("list VPAs in {}", namespace.unwrap_or("all namespaces"));
        self.bounded(operation, async {
            let client = self.handle.vpa().await?;
            let api = match namespace {
                Some(ns) => client.namespaced(ns),
                None => client.all(),
            };
            Ok(api.list(&list_params(label_selector)).await?.items)
        })
        .await
    }

    async fn create_vpa(&self, namespace: &str, vpa: &VerticalPodAutoscaler) -> Result<()> {
        let name = vpa.metadata.name.clone().unwrap_or_default();
        self.bounded(format!("create VPA {}/{}", namespace, name), async {
            let api = self.handle.vpa().await?.namespaced(namespace);
            api.create(&PostParams::default(), vpa).await?;
            Ok(())
        })
        .await
    }

    async fn update_vpa(&self, namespace: &str, name: &str, spec: &VerticalPodAutoscalerSpec) -> Result<()> {
        let patch = json!({
            "spec": {
                "targetRef": spec.target_ref,
                "updatePolicy": {
                    "updateMode": spec.update_policy.as_ref().and_then(|p| p.update_mode.clone()),
                },
            }
        });
        self.bounded(format!("update VPA {}/{}", namespace, name), async {
            let api = self.handle.vpa().await?.namespaced(namespace);
            api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
            Ok(())
        })
        .await
    }

    async fn delete_vpa(&self, namespace: &str, name: &str) -> Result<()> {
        self.bounded(format!("delete VPA {}/{}", namespace, name), async {
            let api = self.handle.vpa().await?.namespaced(namespace);
            match api.delete(name, &DeleteParams::default()).await {
                Ok(_) => Ok(()),
                Err(kube::Error::Api(resp)) if resp.code == 404 => {
                    debug!(namespace, name, "VPA already gone");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }
}
