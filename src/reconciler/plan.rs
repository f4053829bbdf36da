use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::error::PolicyError;
use crate::types::{UpdateMode, Workload, WorkloadKey};
use crate::vpa::{desired_spec, vpa_name, VerticalPodAutoscaler, VerticalPodAutoscalerSpec};

/// A workload that should have a VPA, with its resolved mode.
#[derive(Debug, Clone)]
pub struct DesiredVpa {
    pub workload: Workload,
    pub mode: UpdateMode,
}

/// A VPA to create or patch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VpaChange {
    pub name: String,
    pub workload: WorkloadKey,
    #[serde(skip)]
    pub spec: VerticalPodAutoscalerSpec,
}

/// What one reconcile pass does to a namespace. Applied delete, update, create.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcilePlan {
    pub namespace: String,
    pub deletes: Vec<String>,
    pub updates: Vec<VpaChange>,
    pub creates: Vec<VpaChange>,
    /// Workloads skipped because their VPA name is taken.
    #[serde(skip)]
    pub collisions: Vec<PolicyError>,
    /// Managed VPAs without a target; left alone.
    pub untargeted: Vec<String>,
}

impl ReconcilePlan {
    pub fn empty(namespace: &str) -> Self {
        Self { namespace: namespace.to_string(), ..Default::default() }
    }

    /// Remove every managed VPA, as for a namespace that opted out.
    pub fn delete_all(namespace: &str, managed: &[VerticalPodAutoscaler]) -> Self {
        let mut deletes: Vec<String> = managed.iter().filter_map(|vpa| vpa.metadata.name.clone()).collect();
        deletes.sort();
        Self { namespace: namespace.to_string(), deletes, ..Default::default() }
    }

    /// No writes needed.
    pub fn is_noop(&self) -> bool {
        self.deletes.is_empty() && self.updates.is_empty() && self.creates.is_empty()
    }
}

/// Diff desired workloads against the managed VPAs already in the namespace.
pub fn build_plan(namespace: &str, desired: &[DesiredVpa], managed: &[VerticalPodAutoscaler]) -> ReconcilePlan {
    let mut plan = ReconcilePlan::empty(namespace);

    // Claim names in (kind, name) order so collisions resolve the same way every time
    let mut sorted: Vec<&DesiredVpa> = desired.iter().collect();
    sorted.sort_by_key(|d| d.workload.key());
    let mut claimed: HashMap<String, WorkloadKey> = HashMap::new();
    let mut wanted: BTreeMap<WorkloadKey, (String, VerticalPodAutoscalerSpec)> = BTreeMap::new();
    for d in sorted {
        let key = d.workload.key();
        if wanted.contains_key(&key) {
            continue;
        }
        let name = vpa_name(&d.workload.name);
        if let Some(winner) = claimed.get(&name) {
            plan.collisions.push(PolicyError::NameCollision {
                name,
                winner: format!("{}/{}", winner.0, winner.1),
                loser: format!("{}/{}", key.0, key.1),
            });
            continue;
        }
        claimed.insert(name.clone(), key.clone());
        wanted.insert(key, (name, desired_spec(&d.workload, d.mode)));
    }

    let mut observed: BTreeMap<WorkloadKey, Vec<&VerticalPodAutoscaler>> = BTreeMap::new();
    for vpa in managed {
        let name = vpa.metadata.name.clone().unwrap_or_default();
        match vpa.target_key() {
            Some(key) => observed.entry(key).or_default().push(vpa),
            None => plan.untargeted.push(name),
        }
    }

    for (key, mut vpas) in observed {
        let expected = wanted
            .get(&key)
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| vpa_name(&key.1));
        vpas.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        // A VPA sitting on a name another workload claims cannot be kept
        let claimed_elsewhere = |vpa: &VerticalPodAutoscaler| {
            vpa.metadata
                .name
                .as_ref()
                .and_then(|name| claimed.get(name))
                .is_some_and(|owner| owner != &key)
        };
        let keep = vpas
            .iter()
            .position(|vpa| vpa.metadata.name.as_deref() == Some(expected.as_str()))
            .or_else(|| vpas.iter().position(|vpa| !claimed_elsewhere(*vpa)));
        let keeper = keep.map(|i| vpas.remove(i));
        plan.deletes
            .extend(vpas.iter().filter_map(|vpa| vpa.metadata.name.clone()));

        match (wanted.remove(&key), keeper) {
            (Some((_, spec)), Some(keeper)) => {
                if !keeper.matches(&spec) {
                    let name = keeper.metadata.name.clone().unwrap_or_default();
                    plan.updates.push(VpaChange { name, workload: key, spec });
                }
            }
            (Some((name, spec)), None) => plan.creates.push(VpaChange { name, workload: key, spec }),
            (None, Some(keeper)) => plan.deletes.extend(keeper.metadata.name.clone()),
            (None, None) => {}
        }
    }

    for (key, (name, spec)) in wanted {
        plan.creates.push(VpaChange { name, workload: key, spec });
    }

    plan.deletes.sort();
    plan.updates.sort_by(|a, b| a.name.cmp(&b.name));
    plan.creates.sort_by(|a, b| a.name.cmp(&b.name));
    plan.untargeted.sort();
    plan
}
