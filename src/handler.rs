use std::fmt::Debug;
use std::sync::Arc;

use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::ObjectMeta;
use kube::Resource;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::Result;
use crate::reconciler::Reconciler;
use crate::types::{Event, EventType, ResourceKind};
use crate::vpa::{VerticalPodAutoscaler, VerticalPodAutoscalerSpec};

/// A cluster object delivered by one of the watchers.
#[derive(Debug, Clone)]
pub enum WatchedObject {
    Namespace(Namespace),
    Pod(Pod),
    Vpa(VerticalPodAutoscaler),
    Hpa(HorizontalPodAutoscaler),
}

impl WatchedObject {
    /// Stand-in for an object that no longer exists.
    pub fn empty(kind: ResourceKind, namespace: Option<&str>, name: &str) -> Self {
        let metadata = ObjectMeta {
            name: Some(name.to_string()),
            namespace: namespace.map(str::to_string),
            ..Default::default()
        };
        match kind {
            ResourceKind::Namespace => WatchedObject::Namespace(Namespace { metadata, ..Default::default() }),
            ResourceKind::Pod => WatchedObject::Pod(Pod { metadata, ..Default::default() }),
            ResourceKind::Vpa => {
                let mut vpa = VerticalPodAutoscaler::new(name, VerticalPodAutoscalerSpec::default());
                vpa.metadata = metadata;
                WatchedObject::Vpa(vpa)
            }
            ResourceKind::Hpa => WatchedObject::Hpa(HorizontalPodAutoscaler { metadata, ..Default::default() }),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            WatchedObject::Namespace(_) => ResourceKind::Namespace,
            WatchedObject::Pod(_) => ResourceKind::Pod,
            WatchedObject::Vpa(_) => ResourceKind::Vpa,
            WatchedObject::Hpa(_) => ResourceKind::Hpa,
        }
    }
}

/// Object types the controller watches.
pub trait Watched:
    Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static
{
    const KIND: ResourceKind;

    fn into_watched(self) -> WatchedObject;
}

impl Watched for Namespace {
    const KIND: ResourceKind = ResourceKind::Namespace;

    fn into_watched(self) -> WatchedObject {
        WatchedObject::Namespace(self)
    }
}

impl Watched for Pod {
    const KIND: ResourceKind = ResourceKind::Pod;

    fn into_watched(self) -> WatchedObject {
        WatchedObject::Pod(self)
    }
}

impl Watched for VerticalPodAutoscaler {
    const KIND: ResourceKind = ResourceKind::Vpa;

    fn into_watched(self) -> WatchedObject {
        WatchedObject::Vpa(self)
    }
}

impl Watched for HorizontalPodAutoscaler {
    const KIND: ResourceKind = ResourceKind::Hpa;

    fn into_watched(self) -> WatchedObject {
        WatchedObject::Hpa(self)
    }
}

/// Routes watched objects to the namespace reconciler.
pub struct Dispatcher {
    reconciler: Arc<Reconciler>,
    dry_run: bool,
}

impl Dispatcher {
    pub fn new(reconciler: Arc<Reconciler>, dry_run: bool) -> Self {
        Self { reconciler, dry_run }
    }

    /// Handle one event. `object` is `None` when the object is gone from the
    /// local index, e.g. after a delete.
    pub async fn dispatch(&self, event: &Event, object: Option<WatchedObject>) -> Result<()> {
        let object = match object {
            Some(object) => object,
            None => {
                let Some((namespace, name)) = event.split_key() else {
                    return Ok(());
                };
                WatchedObject::empty(event.resource_kind, namespace, name)
            }
        };

        let namespace = match &object {
            WatchedObject::Namespace(ns) => ns.metadata.name.clone(),
            WatchedObject::Pod(pod) => pod.metadata.namespace.clone(),
            WatchedObject::Vpa(vpa) => vpa.metadata.namespace.clone(),
            WatchedObject::Hpa(hpa) => hpa.metadata.namespace.clone(),
        }
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| event.namespace.clone());

        if namespace.is_empty() {
            debug!(key = %event.key, kind = %object.kind(), "Event has no namespace, ignoring");
            return Ok(());
        }

        if event.event_type == EventType::Delete {
            debug!(key = %event.key, kind = %object.kind(), "Object deleted");
        }
        let plan = self.reconciler.reconcile(&namespace, self.dry_run).await?;
        if !plan.is_noop() {
            info!(
                namespace = %namespace,
                trigger = %format!("{} {}", event.event_type, event.resource_kind),
                creates = plan.creates.len(),
                updates = plan.updates.len(),
                deletes = plan.deletes.len(),
                dry_run = self.dry_run,
                "Reconciled namespace"
            );
        }
        Ok(())
    }
}
