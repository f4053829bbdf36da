use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{Container, Namespace, Pod};
use kube::api::ObjectMeta;

use super::{ClusterApi, ClusterObject};
use crate::error::{api_error, Result};
use crate::types::{Workload, WorkloadKind};
use crate::vpa::{VerticalPodAutoscaler, VerticalPodAutoscalerSpec};

/// A write recorded by [`MockCluster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockWrite {
    Create { namespace: String, name: String },
    Update { namespace: String, name: String },
    Delete { namespace: String, name: String },
}

impl MockWrite {
    pub fn name(&self) -> &str {
        match self {
            MockWrite::Create { name, .. } | MockWrite::Update { name, .. } | MockWrite::Delete { name, .. } => name,
        }
    }
}

#[derive(Default)]
struct State {
    namespaces: BTreeMap<String, Namespace>,
    pods: Vec<Pod>,
    // (namespace, kind, name)
    objects: BTreeMap<(String, String, String), ClusterObject>,
    hpas: Vec<HorizontalPodAutoscaler>,
    // (namespace, name)
    vpas: BTreeMap<(String, String), VerticalPodAutoscaler>,
    writes: Vec<MockWrite>,
    failing_writes: HashSet<String>,
    failing_namespace_reads: Option<u16>,
    get_object_calls: usize,
    namespace_reads: usize,
}

/// In-memory [`ClusterApi`] for tests and local experiments.
#[derive(Default)]
pub struct MockCluster {
    state: Mutex<State>,
}

fn meta(namespace: Option<&str>, name: &str, labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> ObjectMeta {
    let to_map = |pairs: &[(&str, &str)]| -> Option<BTreeMap<String, String>> {
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
        }
    };
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: to_map(labels),
        annotations: to_map(annotations),
        ..Default::default()
    }
}

fn selector_matches(meta: &ObjectMeta, selector: Option<&str>) -> bool {
    let Some(selector) = selector else {
        return true;
    };
    let empty = BTreeMap::new();
    let labels = meta.labels.as_ref().unwrap_or(&empty);
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                labels.get(key.trim()).map(String::as_str) != Some(value.trim())
            } else if let Some((key, value)) = term.split_once('=') {
                labels.get(key.trim()).map(String::as_str) == Some(value.trim())
            } else {
                labels.contains_key(term)
            }
        })
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_namespace(&self, name: &str, labels: &[(&str, &str)]) -> &Self {
        let ns = Namespace { metadata: meta(None, name, labels, &[]), ..Default::default() };
        self.state().namespaces.insert(name.to_string(), ns);
        self
    }

    pub fn remove_namespace(&self, name: &str) -> &Self {
        let mut state = self.state();
        state.namespaces.remove(name);
        state.vpas.retain(|(ns, _), _| ns != name);
        self
    }

    pub fn add_workload(&self, namespace: &str, kind: &WorkloadKind, name: &str, annotations: &[(&str, &str)]) -> &Self {
        self.add_object(ClusterObject {
            api_version: kind.api_version.clone(),
            kind: kind.kind.clone(),
            metadata: meta(Some(namespace), name, &[], annotations),
            containers: Vec::new(),
        })
    }

    /// Store any object; its namespace comes from the metadata.
    pub fn add_object(&self, object: ClusterObject) -> &Self {
        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        let name = object.metadata.name.clone().unwrap_or_default();
        self.state().objects.insert((namespace, object.kind.clone(), name), object);
        self
    }

    pub fn set_containers(&self, namespace: &str, kind: &str, name: &str, containers: Vec<Container>) -> &Self {
        if let Some(object) = self
            .state()
            .objects
            .get_mut(&(namespace.to_string(), kind.to_string(), name.to_string()))
        {
            object.containers = containers;
        }
        self
    }

    pub fn remove_object(&self, namespace: &str, kind: &str, name: &str) -> &Self {
        self.state()
            .objects
            .remove(&(namespace.to_string(), kind.to_string(), name.to_string()));
        self
    }

    pub fn add_pod(&self, pod: Pod) -> &Self {
        self.state().pods.push(pod);
        self
    }

    pub fn add_hpa(&self, hpa: HorizontalPodAutoscaler) -> &Self {
        self.state().hpas.push(hpa);
        self
    }

    /// Seed a VPA without recording a write.
    pub fn add_vpa(&self, vpa: VerticalPodAutoscaler) -> &Self {
        let namespace = vpa.metadata.namespace.clone().unwrap_or_default();
        let name = vpa.metadata.name.clone().unwrap_or_default();
        self.state().vpas.insert((namespace, name), vpa);
        self
    }

    /// Every write to the named VPA fails with a 500.
    pub fn fail_writes_to(&self, name: &str) -> &Self {
        self.state().failing_writes.insert(name.to_string());
        self
    }

    /// Every `get_namespace` call fails with the given status code.
    pub fn fail_namespace_reads(&self, code: u16) -> &Self {
        self.state().failing_namespace_reads = Some(code);
        self
    }

    pub fn clear_failures(&self) -> &Self {
        let mut state = self.state();
        state.failing_writes.clear();
        state.failing_namespace_reads = None;
        drop(state);
        self
    }

    pub fn vpas(&self, namespace: &str) -> Vec<VerticalPodAutoscaler> {
        self.state()
            .vpas
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, vpa)| vpa.clone())
            .collect()
    }

    pub fn vpa(&self, namespace: &str, name: &str) -> Option<VerticalPodAutoscaler> {
        self.state().vpas.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    pub fn writes(&self) -> Vec<MockWrite> {
        self.state().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    pub fn get_object_calls(&self) -> usize {
        self.state().get_object_calls
    }

    pub fn namespace_reads(&self) -> usize {
        self.state().namespace_reads
    }

    fn check_write(state: &State, name: &str) -> Result<()> {
        if state.failing_writes.contains(name) {
            return Err(api_error(500, "InternalError", format!("injected failure writing {}", name)));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let mut state = self.state();
        state.namespace_reads += 1;
        if let Some(code) = state.failing_namespace_reads {
            return Err(api_error(code, "Forbidden", format!("injected failure reading namespace {}", name)));
        }
        Ok(state.namespaces.get(name).cloned())
    }

    async fn list_namespaces(&self, label_selector: Option<&str>) -> Result<Vec<Namespace>> {
        Ok(self
            .state()
            .namespaces
            .values()
            .filter(|ns| selector_matches(&ns.metadata, label_selector))
            .cloned()
            .collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        Ok(self
            .state()
            .pods
            .iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn list_workloads(&self, namespace: &str, kind: &WorkloadKind) -> Result<Vec<Workload>> {
        Ok(self
            .state()
            .objects
            .iter()
            .filter(|((ns, k, _), obj)| ns == namespace && k == &kind.kind && obj.api_version == kind.api_version)
            .map(|(_, obj)| obj.to_workload(namespace))
            .collect())
    }

    async fn get_object(
        &self,
        namespace: &str,
        _api_version: &str,
        kind: &str,
        name: &str,
    ) -> Result<Option<ClusterObject>> {
        let mut state = self.state();
        state.get_object_calls += 1;
        Ok(state
            .objects
            .get(&(namespace.to_string(), kind.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_hpas(&self, namespace: &str) -> Result<Vec<HorizontalPodAutoscaler>> {
        Ok(self
            .state()
            .hpas
            .iter()
            .filter(|hpa| hpa.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn list_vpas(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<VerticalPodAutoscaler>> {
        Ok(self
            .state()
            .vpas
            .iter()
            .filter(|((ns, _), _)| namespace.map_or(true, |want| ns == want))
            .filter(|(_, vpa)| selector_matches(&vpa.metadata, label_selector))
            .map(|(_, vpa)| vpa.clone())
            .collect())
    }

    async fn create_vpa(&self, namespace: &str, vpa: &VerticalPodAutoscaler) -> Result<()> {
        let name = vpa.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        Self::check_write(&state, &name)?;
        let key = (namespace.to_string(), name.clone());
        if state.vpas.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("verticalpodautoscalers \"{}\" already exists", name)));
        }
        let mut stored = vpa.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        state.vpas.insert(key, stored);
        state.writes.push(MockWrite::Create { namespace: namespace.to_string(), name });
        Ok(())
    }

    async fn update_vpa(&self, namespace: &str, name: &str, spec: &VerticalPodAutoscalerSpec) -> Result<()> {
        let mut state = self.state();
        Self::check_write(&state, name)?;
        let Some(stored) = state.vpas.get_mut(&(namespace.to_string(), name.to_string())) else {
            return Err(api_error(404, "NotFound", format!("verticalpodautoscalers \"{}\" not found", name)));
        };
        // Merge patch: only the owned fields change
        stored.spec.target_ref = spec.target_ref.clone();
        let mode = spec.update_policy.as_ref().and_then(|p| p.update_mode.clone());
        stored.spec.update_policy.get_or_insert_with(Default::default).update_mode = mode;
        state.writes.push(MockWrite::Update { namespace: namespace.to_string(), name: name.to_string() });
        Ok(())
    }

    async fn delete_vpa(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        Self::check_write(&state, name)?;
        state.vpas.remove(&(namespace.to_string(), name.to_string()));
        state.writes.push(MockWrite::Delete { namespace: namespace.to_string(), name: name.to_string() });
        Ok(())
    }
}
