use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kinds the controller watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Namespace,
    Pod,
    Vpa,
    Hpa,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::Pod => "pod",
            ResourceKind::Vpa => "vpa",
            ResourceKind::Hpa => "hpa",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Create,
    Update,
    Delete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Create => "create",
            EventType::Update => "update",
            EventType::Delete => "delete",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An observed change to a cluster object, as carried on a work queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    /// `<namespace>/<name>`, or `<name>` for cluster-scoped objects
    pub key: String,
    pub event_type: EventType,
    pub resource_kind: ResourceKind,
    /// The namespace the event concerns. For namespace objects this is their own name.
    pub namespace: String,
}

impl Event {
    pub fn new(resource_kind: ResourceKind, event_type: EventType, namespace: Option<&str>, name: &str) -> Self {
        let key = match namespace {
            Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
            _ => name.to_string(),
        };
        let namespace = match resource_kind {
            ResourceKind::Namespace => name.to_string(),
            _ => namespace.unwrap_or_default().to_string(),
        };
        Self { key, event_type, resource_kind, namespace }
    }

    /// Split the key back into (namespace, name). `None` for malformed keys.
    pub fn split_key(&self) -> Option<(Option<&str>, &str)> {
        let mut parts = self.key.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) if !name.is_empty() => Some((None, name)),
            (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => Some((Some(ns), name)),
            _ => None,
        }
    }
}

/// VPA update policy mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UpdateMode {
    #[default]
    Off,
    Initial,
    Recreate,
    Auto,
}

impl UpdateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateMode::Off => "Off",
            UpdateMode::Initial => "Initial",
            UpdateMode::Recreate => "Recreate",
            UpdateMode::Auto => "Auto",
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(UpdateMode::Off),
            "initial" => Ok(UpdateMode::Initial),
            "recreate" => Ok(UpdateMode::Recreate),
            "auto" => Ok(UpdateMode::Auto),
            other => Err(other.to_string()),
        }
    }
}

/// A workload kind addressable through the API, e.g. `apps/v1` `Deployment`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkloadKind {
    pub api_version: String,
    pub kind: String,
}

impl WorkloadKind {
    pub fn new(api_version: &str, kind: &str) -> Self {
        Self { api_version: api_version.to_string(), kind: kind.to_string() }
    }

    pub fn deployment() -> Self {
        Self::new("apps/v1", "Deployment")
    }

    pub fn daemon_set() -> Self {
        Self::new("apps/v1", "DaemonSet")
    }

    pub fn stateful_set() -> Self {
        Self::new("apps/v1", "StatefulSet")
    }

    /// Parse `group/version/Kind` or `version/Kind`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (api_version, kind) = s.rsplit_once('/')?;
        if api_version.is_empty() || kind.is_empty() || api_version.matches('/').count() > 1 {
            return None;
        }
        Some(Self::new(api_version, kind))
    }

    /// (group, version) of the apiVersion; the core group is empty.
    pub fn group_version(&self) -> (&str, &str) {
        split_api_version(&self.api_version)
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version, self.kind)
    }
}

pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// (kind, name): how workloads and VPA targets are matched within a namespace.
pub type WorkloadKey = (String, String);

/// A top-level controller that owns pods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub namespace: String,
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub annotations: BTreeMap<String, String>,
}

impl Workload {
    pub fn key(&self) -> WorkloadKey {
        (self.kind.clone(), self.name.clone())
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Settings for the namespace reconciler, built from the `controller` flags.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub on_by_default: bool,
    pub dry_run: bool,
    pub include_namespaces: Vec<String>,
    pub exclude_namespaces: Vec<String>,
    pub ignore_controller_kinds: Vec<String>,
    pub additional_workload_kinds: Vec<WorkloadKind>,
    pub ignore_hpa_conflicts: bool,
    pub max_retries: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            on_by_default: false,
            dry_run: false,
            include_namespaces: Vec::new(),
            exclude_namespaces: Vec::new(),
            ignore_controller_kinds: Vec::new(),
            additional_workload_kinds: Vec::new(),
            ignore_hpa_conflicts: false,
            max_retries: 5,
        }
    }
}

impl ReconcilerConfig {
    /// Kinds listed directly on every reconcile.
    pub fn workload_kinds(&self) -> Vec<WorkloadKind> {
        let mut kinds = vec![
            WorkloadKind::deployment(),
            WorkloadKind::daemon_set(),
            WorkloadKind::stateful_set(),
        ];
        for extra in &self.additional_workload_kinds {
            if !kinds.contains(extra) {
                kinds.push(extra.clone());
            }
        }
        kinds
    }
}

/// Settings for the dashboard, built from the `dashboard` flags.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub port: u16,
    pub base_path: String,
    pub exclude_containers: Vec<String>,
    pub on_by_default: bool,
    pub show_all: bool,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            base_path: "/".to_string(),
            exclude_containers: Vec::new(),
            on_by_default: false,
            show_all: false,
        }
    }
}
