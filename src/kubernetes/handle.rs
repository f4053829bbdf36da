use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::WorkloadKind;
use crate::vpa::VerticalPodAutoscaler;

type ResourceCache = Arc<Mutex<HashMap<WorkloadKind, Option<ApiResource>>>>;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-wide, resettable access to the cluster.
///
/// The client is built on first use. `reset` and `use_context` must not be
/// called while other tasks are mid-request.
pub struct ClusterHandle {
    kubeconfig: Option<PathBuf>,
    context: Mutex<Option<String>>,
    client: Mutex<Option<Client>>,
    resources: ResourceCache,
}

impl ClusterHandle {
    /// `kubeconfig` is the already resolved file; `None` means infer (in-cluster first).
    pub fn new(kubeconfig: Option<PathBuf>, context: Option<String>) -> Self {
        Self {
            kubeconfig,
            context: Mutex::new(context),
            client: Mutex::new(None),
            resources: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wrap an existing client, e.g. one built by the caller.
    pub fn from_client(client: Client) -> Self {
        let handle = Self::new(None, None);
        *locked(&handle.client) = Some(client);
        handle
    }

    pub fn kubeconfig(&self) -> Option<&PathBuf> {
        self.kubeconfig.as_ref()
    }

    pub fn current_context(&self) -> Option<String> {
        locked(&self.context).clone()
    }

    pub async fn client(&self) -> Result<Client> {
        let cached = locked(&self.client).clone();
        if let Some(client) = cached {
            return Ok(client);
        }
        let client = self.build_client().await?;
        Ok(locked(&self.client).get_or_insert(client).clone())
    }

    async fn build_client(&self) -> Result<Client> {
        let context = self.current_context();
        let options = KubeConfigOptions { context: context.clone(), ..Default::default() };
        let config = match (&self.kubeconfig, &context) {
            (Some(path), _) => {
                debug!(path = %path.display(), "Loading kubeconfig");
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| Error::Config(e.to_string()))?
            }
            (None, Some(_)) => kube::Config::from_kubeconfig(&options)
                .await
                .map_err(|e| Error::Config(e.to_string()))?,
            (None, None) => kube::Config::infer()
                .await
                .map_err(|e| Error::Config(e.to_string()))?,
        };
        info!(cluster_url = %config.cluster_url, context = ?context, "Connecting to cluster");
        Client::try_from(config).map_err(|e| Error::Config(e.to_string()))
    }

    pub async fn core(&self) -> Result<CoreClient> {
        Ok(CoreClient {
            client: self.client().await?,
            resources: self.resources.clone(),
        })
    }

    pub async fn vpa(&self) -> Result<VpaClient> {
        Ok(VpaClient { client: self.client().await? })
    }

    /// Drop the cached client and discovery results; the next call rebuilds them.
    pub fn reset(&self) {
        locked(&self.client).take();
        locked(&self.resources).clear();
    }

    /// Switch kubeconfig context. Resets the handle.
    pub fn use_context(&self, context: &str) {
        info!(context, "Switching kubeconfig context");
        *locked(&self.context) = Some(context.to_string());
        self.reset();
    }

    /// Context names in the kubeconfig file, sorted.
    pub fn contexts(&self) -> Result<Vec<String>> {
        let Some(path) = &self.kubeconfig else {
            return Ok(Vec::new());
        };
        let kubeconfig = Kubeconfig::read_from(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let mut contexts: Vec<String> = kubeconfig.contexts.into_iter().map(|c| c.name).collect();
        contexts.sort();
        Ok(contexts)
    }
}

/// Typed access to the core workload APIs.
#[derive(Clone)]
pub struct CoreClient {
    client: Client,
    resources: ResourceCache,
}

impl CoreClient {
    pub fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    pub fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn all_pods(&self) -> Api<Pod> {
        Api::all(self.client.clone())
    }

    pub fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn daemon_sets(&self, namespace: &str) -> Api<DaemonSet> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn stateful_sets(&self, namespace: &str) -> Api<StatefulSet> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn hpas(&self, namespace: &str) -> Api<HorizontalPodAutoscaler> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn all_hpas(&self) -> Api<HorizontalPodAutoscaler> {
        Api::all(self.client.clone())
    }

    /// Dynamic API for an arbitrary kind. `None` when the cluster does not serve it.
    pub async fn dynamic(&self, namespace: &str, kind: &WorkloadKind) -> Result<Option<Api<DynamicObject>>> {
        let cached = locked(&self.resources).get(kind).cloned();
        let resource = match cached {
            Some(resource) => resource,
            None => {
                let resource = self.discover(kind).await?;
                locked(&self.resources).insert(kind.clone(), resource.clone());
                resource
            }
        };
        Ok(resource.map(|ar| Api::namespaced_with(self.client.clone(), namespace, &ar)))
    }

    async fn discover(&self, kind: &WorkloadKind) -> Result<Option<ApiResource>> {
        let (group, version) = kind.group_version();
        let gvk = GroupVersionKind::gvk(group, version, &kind.kind);
        match kube::discovery::pinned_kind(&self.client, &gvk).await {
            Ok((resource, _caps)) => Ok(Some(resource)),
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                debug!(%kind, "Kind is not served");
                Ok(None)
            }
            Err(kube::Error::Discovery(e)) => {
                debug!(%kind, error = %e, "Kind is not served");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Typed access to `autoscaling.k8s.io/v1` VPAs.
#[derive(Clone)]
pub struct VpaClient {
    client: Client,
}

impl VpaClient {
    pub fn namespaced(&self, namespace: &str) -> Api<VerticalPodAutoscaler> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn all(&self) -> Api<VerticalPodAutoscaler> {
        Api::all(self.client.clone())
    }
}
