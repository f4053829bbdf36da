use std::collections::HashMap;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use tracing::debug;

use crate::error::{PolicyError, Result};
use crate::kubernetes::{ClusterApi, ClusterObject};
use crate::types::Workload;

/// Kinds treated as the top of an ownership chain.
pub const TERMINAL_KINDS: [&str; 4] = ["Deployment", "DaemonSet", "StatefulSet", "CronJob"];

pub const MAX_OWNER_DEPTH: usize = 10;

fn controller_ref(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))
}

/// Resolves pods to their top-level controller.
///
/// One walker lives for one reconcile of one namespace, so parents shared by
/// sibling pods are fetched once.
pub struct OwnerWalker<'a> {
    api: &'a dyn ClusterApi,
    namespace: String,
    cache: HashMap<(String, String, String), Option<ClusterObject>>,
}

impl<'a> OwnerWalker<'a> {
    pub fn new(api: &'a dyn ClusterApi, namespace: &str) -> Self {
        Self { api, namespace: namespace.to_string(), cache: HashMap::new() }
    }

    async fn fetch(&mut self, owner: &OwnerReference) -> Result<Option<ClusterObject>> {
        let key = (owner.api_version.clone(), owner.kind.clone(), owner.name.clone());
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }
        let object = self
            .api
            .get_object(&self.namespace, &owner.api_version, &owner.kind, &owner.name)
            .await?;
        self.cache.insert(key, object.clone());
        Ok(object)
    }

    /// The workload that ultimately controls `pod`. `None` for bare pods.
    ///
    /// Missing parents and kinds the cluster does not serve end the walk at
    /// the deepest parent found so far.
    pub async fn workload_for_pod(&mut self, pod: &Pod) -> Result<Option<Workload>> {
        let Some(mut owner) = controller_ref(&pod.metadata).cloned() else {
            return Ok(None);
        };
        let mut resolved: Option<Workload> = None;

        for _ in 0..MAX_OWNER_DEPTH {
            let Some(object) = self.fetch(&owner).await? else {
                debug!(
                    namespace = %self.namespace,
                    kind = %owner.kind,
                    name = %owner.name,
                    "Owner not found, stopping walk"
                );
                return Ok(resolved);
            };
            let workload = object.to_workload(&self.namespace);
            if TERMINAL_KINDS.contains(&workload.kind.as_str()) {
                return Ok(Some(workload));
            }
            match controller_ref(&object.metadata) {
                Some(next) => {
                    owner = next.clone();
                    resolved = Some(workload);
                }
                None => return Ok(Some(workload)),
            }
        }

        Err(PolicyError::OwnerDepthExceeded {
            pod: format!("{}/{}", self.namespace, pod.metadata.name.as_deref().unwrap_or_default()),
            depth: MAX_OWNER_DEPTH,
        }
        .into())
    }
}
