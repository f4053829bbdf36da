use std::collections::BTreeMap;

use k8s_openapi::api::autoscaling::v1::CrossVersionObjectReference;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{UpdateMode, Workload, WorkloadKey};

pub const VPA_GROUP: &str = "autoscaling.k8s.io";
pub const VPA_VERSION: &str = "v1";
pub const VPA_KIND: &str = "VerticalPodAutoscaler";

/// Labels carried by every VPA this controller owns.
pub const MANAGED_LABELS: [(&str, &str); 2] = [("creator", "Fairwinds"), ("source", "goldilocks")];

const NAME_PREFIX: &str = "goldilocks-";
const MAX_NAME_LEN: usize = 63;
const HASH_LEN: usize = 8;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "autoscaling.k8s.io",
    version = "v1",
    kind = "VerticalPodAutoscaler",
    plural = "verticalpodautoscalers",
    namespaced,
    status = "VerticalPodAutoscalerStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct VerticalPodAutoscalerSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<CrossVersionObjectReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<UpdatePolicy>,
    /// Left untouched by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_policy: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicy {
    /// Kept as a string so unknown modes written by others survive a round trip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_mode: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerticalPodAutoscalerStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<RecommendedPodResources>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<serde_json::Value>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedPodResources {
    #[serde(default)]
    pub container_recommendations: Vec<RecommendedContainerResources>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedContainerResources {
    pub container_name: String,
    #[serde(default)]
    pub target: BTreeMap<String, Quantity>,
    #[serde(default)]
    pub lower_bound: BTreeMap<String, Quantity>,
    #[serde(default)]
    pub upper_bound: BTreeMap<String, Quantity>,
    #[serde(default)]
    pub uncapped_target: BTreeMap<String, Quantity>,
}

/// `creator=Fairwinds,source=goldilocks`
pub fn managed_label_selector() -> String {
    MANAGED_LABELS
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// True only when every ownership label is present with the expected value.
pub fn is_managed(meta: &ObjectMeta) -> bool {
    let Some(labels) = meta.labels.as_ref() else {
        return false;
    };
    MANAGED_LABELS
        .iter()
        .all(|(k, v)| labels.get(*k).map(String::as_str) == Some(*v))
}

/// Name of the VPA managed for a workload.
///
/// Names that would exceed 63 characters keep a prefix of the workload name
/// and end in a short hash of the full name.
pub fn vpa_name(workload_name: &str) -> String {
    let full = format!("{}{}", NAME_PREFIX, workload_name);
    if full.len() <= MAX_NAME_LEN {
        return full;
    }

    let digest = Sha256::digest(workload_name.as_bytes());
    let hash = &hex::encode(digest)[..HASH_LEN];
    let keep = MAX_NAME_LEN - NAME_PREFIX.len() - 1 - HASH_LEN;
    let prefix: String = workload_name.chars().take(keep).collect();
    let prefix = prefix.trim_end_matches(['-', '.']);
    format!("{}{}-{}", NAME_PREFIX, prefix, hash)
}

/// Spec fields the controller owns: targetRef and updateMode.
pub fn desired_spec(workload: &Workload, mode: UpdateMode) -> VerticalPodAutoscalerSpec {
    VerticalPodAutoscalerSpec {
        target_ref: Some(CrossVersionObjectReference {
            api_version: Some(workload.api_version.clone()),
            kind: workload.kind.clone(),
            name: workload.name.clone(),
        }),
        update_policy: Some(UpdatePolicy {
            update_mode: Some(mode.as_str().to_string()),
        }),
        resource_policy: None,
    }
}

/// A VPA carrying the ownership labels.
pub fn managed_vpa(namespace: &str, name: &str, spec: VerticalPodAutoscalerSpec) -> VerticalPodAutoscaler {
    let mut vpa = VerticalPodAutoscaler::new(name, spec);
    vpa.metadata.namespace = Some(namespace.to_string());
    vpa.metadata.labels = Some(
        MANAGED_LABELS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    vpa
}

/// Build a new managed VPA for a workload.
pub fn build_vpa(workload: &Workload, mode: UpdateMode) -> VerticalPodAutoscaler {
    managed_vpa(&workload.namespace, &vpa_name(&workload.name), desired_spec(workload, mode))
}

impl VerticalPodAutoscaler {
    /// (kind, name) of the targeted workload.
    pub fn target_key(&self) -> Option<WorkloadKey> {
        self.spec
            .target_ref
            .as_ref()
            .filter(|r| !r.kind.is_empty() && !r.name.is_empty())
            .map(|r| (r.kind.clone(), r.name.clone()))
    }

    pub fn update_mode(&self) -> Option<&str> {
        self.spec
            .update_policy
            .as_ref()
            .and_then(|p| p.update_mode.as_deref())
    }

    /// Whether the owned spec fields already match.
    pub fn matches(&self, desired: &VerticalPodAutoscalerSpec) -> bool {
        self.spec.target_ref == desired.target_ref
            && self.update_mode() == desired.update_policy.as_ref().and_then(|p| p.update_mode.as_deref())
    }

    pub fn container_recommendations(&self) -> &[RecommendedContainerResources] {
        self.status
            .as_ref()
            .and_then(|s| s.recommendation.as_ref())
            .map(|r| r.container_recommendations.as_slice())
            .unwrap_or(&[])
    }
}
