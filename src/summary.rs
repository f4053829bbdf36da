use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::kubernetes::ClusterApi;
use crate::parsing::{compare_to_range, Verdict};
use crate::policy::excluded_containers;
use crate::vpa::{managed_label_selector, RecommendedContainerResources};

pub type ResourceList = BTreeMap<String, Quantity>;

const RESOURCES: [&str; 2] = ["cpu", "memory"];

/// Current settings compared with the recommended range.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceVerdict {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<Verdict>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    pub container_name: String,
    pub target: ResourceList,
    pub lower_bound: ResourceList,
    pub upper_bound: ResourceList,
    pub uncapped_target: ResourceList,
    pub requests: ResourceList,
    pub limits: ResourceList,
    pub verdicts: BTreeMap<String, ResourceVerdict>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSummary {
    pub controller_name: String,
    pub controller_type: String,
    pub containers: BTreeMap<String, ContainerSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSummary {
    pub namespace: String,
    pub workloads: BTreeMap<String, WorkloadSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub generated_at: DateTime<Utc>,
    pub namespaces: BTreeMap<String, NamespaceSummary>,
}

/// Build a container entry from a recommendation and the live container spec.
pub fn summarize_container(rec: &RecommendedContainerResources, container: Option<&Container>) -> ContainerSummary {
    let resources = container.and_then(|c| c.resources.as_ref());
    let requests = resources.and_then(|r| r.requests.clone()).unwrap_or_default();
    let limits = resources.and_then(|r| r.limits.clone()).unwrap_or_default();

    let mut verdicts = BTreeMap::new();
    for resource in RESOURCES {
        let (Some(lower), Some(upper)) = (rec.lower_bound.get(resource), rec.upper_bound.get(resource)) else {
            continue;
        };
        verdicts.insert(
            resource.to_string(),
            ResourceVerdict {
                request: compare_to_range(resource, requests.get(resource), lower, upper),
                limit: compare_to_range(resource, limits.get(resource), lower, upper),
            },
        );
    }

    ContainerSummary {
        container_name: rec.container_name.clone(),
        target: rec.target.clone(),
        lower_bound: rec.lower_bound.clone(),
        upper_bound: rec.upper_bound.clone(),
        uncapped_target: rec.uncapped_target.clone(),
        requests,
        limits,
        verdicts,
    }
}

/// Joins managed VPA recommendations with the workloads they target.
pub struct Summarizer {
    api: Arc<dyn ClusterApi>,
    exclude_containers: Vec<String>,
}

impl Summarizer {
    pub fn new(api: Arc<dyn ClusterApi>, exclude_containers: Vec<String>) -> Self {
        Self { api, exclude_containers }
    }

    /// Summarise one namespace, or every namespace with managed VPAs.
    pub async fn summary(&self, namespace: Option<&str>) -> Result<Summary> {
        let selector = managed_label_selector();
        let vpas = self.api.list_vpas(namespace, Some(&selector)).await?;
        debug!(count = vpas.len(), namespace = ?namespace, "Summarising VPAs");

        let mut namespaces: BTreeMap<String, NamespaceSummary> = BTreeMap::new();
        if let Some(ns) = namespace {
            namespaces.insert(ns.to_string(), NamespaceSummary { namespace: ns.to_string(), ..Default::default() });
        }

        for vpa in vpas {
            let ns = vpa.metadata.namespace.clone().unwrap_or_default();
            let Some(target) = vpa.spec.target_ref.as_ref() else {
                warn!(namespace = %ns, vpa = ?vpa.metadata.name, "Managed VPA has no targetRef, skipping");
                continue;
            };
            let api_version = target.api_version.as_deref().unwrap_or("apps/v1");
            let workload = self.api.get_object(&ns, api_version, &target.kind, &target.name).await?;
            let Some(workload) = workload else {
                debug!(namespace = %ns, kind = %target.kind, name = %target.name, "Target workload not found");
                continue;
            };

            let annotations = workload.metadata.annotations.clone().unwrap_or_default();
            let excluded = excluded_containers(&annotations, &self.exclude_containers);
            let containers = vpa
                .container_recommendations()
                .iter()
                .filter(|rec| !excluded.contains(&rec.container_name))
                .map(|rec| {
                    let live = workload.containers.iter().find(|c| c.name == rec.container_name);
                    (rec.container_name.clone(), summarize_container(rec, live))
                })
                .collect();

            namespaces
                .entry(ns.clone())
                .or_insert_with(|| NamespaceSummary { namespace: ns.clone(), ..Default::default() })
                .workloads
                .insert(
                    target.name.clone(),
                    WorkloadSummary {
                        controller_name: target.name.clone(),
                        controller_type: target.kind.clone(),
                        containers,
                    },
                );
        }

        Ok(Summary { generated_at: Utc::now(), namespaces })
    }
}
