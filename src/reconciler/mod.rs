//! Namespace reconciler: converges the managed VPAs of one namespace.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use tracing::{debug, error, info, warn};

use crate::error::{api_error, Error, Result};
use crate::kubernetes::ClusterApi;
use crate::owner::OwnerWalker;
use crate::policy::{
    namespace_enabled, namespace_update_mode, workload_eligibility, workload_update_mode, ResolvedMode,
};
use crate::types::{ReconcilerConfig, Workload, WorkloadKey};
use crate::vpa::{is_managed, managed_vpa, VerticalPodAutoscaler};

pub mod locks;
pub mod plan;

pub use locks::NamespaceLocks;
pub use plan::{build_plan, DesiredVpa, ReconcilePlan, VpaChange};

pub struct Reconciler {
    api: Arc<dyn ClusterApi>,
    config: ReconcilerConfig,
    locks: NamespaceLocks,
}

impl Reconciler {
    pub fn new(api: Arc<dyn ClusterApi>, config: ReconcilerConfig) -> Self {
        Self { api, config, locks: NamespaceLocks::new() }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// One pass over a namespace that has to exist, honouring the configured dry run.
    pub async fn reconcile_existing(&self, namespace: &str) -> Result<ReconcilePlan> {
        if self.api.get_namespace(namespace).await?.is_none() {
            return Err(api_error(404, "NotFound", format!("namespace {} not found", namespace)));
        }
        self.reconcile(namespace, self.config.dry_run).await
    }

    /// Bring the namespace's managed VPAs in line with its workloads.
    ///
    /// The returned plan is the same with and without `dry_run`.
    pub async fn reconcile(&self, namespace: &str, dry_run: bool) -> Result<ReconcilePlan> {
        let _guard = self.locks.lock(namespace).await;

        let Some(ns) = self.api.get_namespace(namespace).await? else {
            debug!(namespace, "Namespace is gone, nothing to reconcile");
            return Ok(ReconcilePlan::empty(namespace));
        };

        let (managed, unmanaged): (Vec<VerticalPodAutoscaler>, Vec<VerticalPodAutoscaler>) = self
            .api
            .list_vpas(Some(namespace), None)
            .await?
            .into_iter()
            .partition(|vpa| is_managed(&vpa.metadata));

        if !namespace_enabled(&ns, &self.config) {
            if !managed.is_empty() {
                info!(namespace, count = managed.len(), "Namespace is not enabled, removing managed VPAs");
            }
            let plan = ReconcilePlan::delete_all(namespace, &managed);
            self.apply(&plan, dry_run).await?;
            return Ok(plan);
        }

        let namespace_mode = namespace_update_mode(&ns);
        if let Some(warning) = &namespace_mode.warning {
            warn!(namespace, "{}", warning);
        }

        let desired = self.desired(&ns, namespace, &namespace_mode, &unmanaged).await?;
        let plan = build_plan(namespace, &desired, &managed);

        for collision in &plan.collisions {
            warn!(namespace, "{}", collision);
        }
        for name in &plan.untargeted {
            let violation = Error::InvariantViolation(format!("managed VPA {}/{} has no targetRef", namespace, name));
            error!(namespace, vpa = %name, "{}", violation);
        }

        self.apply(&plan, dry_run).await?;
        Ok(plan)
    }

    async fn desired(
        &self,
        ns: &Namespace,
        namespace: &str,
        namespace_mode: &ResolvedMode,
        unmanaged: &[VerticalPodAutoscaler],
    ) -> Result<Vec<DesiredVpa>> {
        let mut workloads: BTreeMap<WorkloadKey, Workload> = BTreeMap::new();
        for kind in self.config.workload_kinds() {
            for workload in self.api.list_workloads(namespace, &kind).await? {
                workloads.entry(workload.key()).or_insert(workload);
            }
        }

        let mut walker = OwnerWalker::new(self.api.as_ref(), namespace);
        for pod in self.api.list_pods(namespace).await? {
            match walker.workload_for_pod(&pod).await {
                Ok(Some(workload)) => {
                    workloads.entry(workload.key()).or_insert(workload);
                }
                Ok(None) => {}
                Err(Error::Policy(e)) => warn!(namespace, "{}", e),
                Err(e) => return Err(e),
            }
        }

        let hpas = self.api.list_hpas(namespace).await?;
        let ns_name = ns.metadata.name.as_deref().unwrap_or(namespace);
        let mut desired = Vec::with_capacity(workloads.len());
        for workload in workloads.into_values() {
            let eligibility = workload_eligibility(&workload, namespace_mode, &self.config, &hpas, unmanaged);
            if !eligibility.is_eligible() {
                debug!(namespace = ns_name, workload = %workload, reason = %eligibility, "Skipping workload");
                continue;
            }
            let resolved = workload_update_mode(&workload, namespace_mode);
            if let Some(warning) = &resolved.warning {
                warn!(namespace = ns_name, "{}", warning);
            }
            desired.push(DesiredVpa { workload, mode: resolved.mode });
        }
        Ok(desired)
    }

    async fn apply(&self, plan: &ReconcilePlan, dry_run: bool) -> Result<()> {
        let namespace = plan.namespace.as_str();
        if dry_run {
            for name in &plan.deletes {
                info!(namespace, "would delete {}", name);
            }
            for change in &plan.updates {
                info!(namespace, "would update {}", change.name);
            }
            for change in &plan.creates {
                info!(namespace, "would create {}", change.name);
            }
            return Ok(());
        }

        let mut errors = Vec::new();
        for name in &plan.deletes {
            match self.api.delete_vpa(namespace, name).await {
                Ok(()) => info!(namespace, vpa = %name, "Deleted VPA"),
                Err(e) if e.is_not_found() => debug!(namespace, vpa = %name, "VPA already deleted"),
                Err(e) => errors.push(e),
            }
        }
        for change in &plan.updates {
            match self.api.update_vpa(namespace, &change.name, &change.spec).await {
                Ok(()) => info!(namespace, vpa = %change.name, "Updated VPA"),
                Err(e) => errors.push(e),
            }
        }
        for change in &plan.creates {
            let vpa = managed_vpa(namespace, &change.name, change.spec.clone());
            match self.api.create_vpa(namespace, &vpa).await {
                Ok(()) => info!(namespace, vpa = %change.name, "Created VPA"),
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            for e in &errors {
                error!(namespace, error = %e, "VPA write failed");
            }
            Err(Error::Aggregate { namespace: namespace.to_string(), errors })
        }
    }
}
