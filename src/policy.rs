use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Namespace;

use crate::error::PolicyError;
use crate::types::{ReconcilerConfig, UpdateMode, Workload};
use crate::vpa::VerticalPodAutoscaler;

pub const ENABLED_LABEL: &str = "goldilocks.fairwinds.com/enabled";
pub const UPDATE_MODE_KEY: &str = "goldilocks.fairwinds.com/vpa-update-mode";
pub const OPT_OUT_ANNOTATION: &str = "goldilocks.fairwinds.com/vpa-opt-out";
pub const EXCLUDE_CONTAINERS_ANNOTATION: &str = "goldilocks.fairwinds.com/exclude-containers";

/// An update mode together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMode {
    pub mode: UpdateMode,
    /// Set by a label or annotation rather than defaulted.
    pub explicit: bool,
    pub warning: Option<PolicyError>,
}

impl ResolvedMode {
    fn default_off() -> Self {
        Self { mode: UpdateMode::Off, explicit: false, warning: None }
    }
}

/// Why a workload does or does not get a VPA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    IgnoredKind,
    ModeOff,
    OptedOut,
    HpaConflict { hpa: String },
    VpaConflict { vpa: String },
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eligibility::Eligible => f.write_str("eligible"),
            Eligibility::IgnoredKind => f.write_str("controller kind is ignored"),
            Eligibility::ModeOff => f.write_str("update mode annotation is off"),
            Eligibility::OptedOut => f.write_str("opted out by annotation"),
            Eligibility::HpaConflict { hpa } => write!(f, "scaled on cpu/memory by HPA {}", hpa),
            Eligibility::VpaConflict { vpa } => write!(f, "already targeted by unmanaged VPA {}", vpa),
        }
    }
}

fn contains_ignore_case(list: &[String], value: &str) -> bool {
    list.iter().any(|item| item.eq_ignore_ascii_case(value))
}

/// Decide whether a namespace is opted in. First matching rule wins.
pub fn namespace_enabled(namespace: &Namespace, cfg: &ReconcilerConfig) -> bool {
    let name = namespace.metadata.name.as_deref().unwrap_or_default();
    if cfg.exclude_namespaces.iter().any(|ns| ns == name) {
        return false;
    }
    let label = namespace
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(ENABLED_LABEL));
    if let Some(value) = label {
        if value.eq_ignore_ascii_case("true") {
            return true;
        }
        if value.eq_ignore_ascii_case("false") {
            return false;
        }
    }
    if cfg.include_namespaces.iter().any(|ns| ns == name) {
        return true;
    }
    cfg.on_by_default
}

fn parse_mode(value: &str, source_name: String) -> ResolvedMode {
    match value.parse::<UpdateMode>() {
        Ok(mode) => ResolvedMode { mode, explicit: true, warning: None },
        Err(_) => ResolvedMode {
            mode: UpdateMode::Off,
            explicit: true,
            warning: Some(PolicyError::UnknownUpdateMode { value: value.to_string(), source_name }),
        },
    }
}

/// Mode from the namespace label, else `Off`.
pub fn namespace_update_mode(namespace: &Namespace) -> ResolvedMode {
    let name = namespace.metadata.name.as_deref().unwrap_or_default();
    match namespace
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(UPDATE_MODE_KEY))
    {
        Some(value) => parse_mode(value, format!("namespace {}", name)),
        None => ResolvedMode::default_off(),
    }
}

/// Workload annotation beats the namespace mode.
pub fn workload_update_mode(workload: &Workload, namespace_mode: &ResolvedMode) -> ResolvedMode {
    match workload.annotations.get(UPDATE_MODE_KEY) {
        Some(value) => parse_mode(value, format!("{} {}/{}", workload.kind, workload.namespace, workload.name)),
        None => ResolvedMode {
            mode: namespace_mode.mode,
            explicit: namespace_mode.explicit,
            warning: None,
        },
    }
}

fn annotation_is(annotations: &BTreeMap<String, String>, key: &str, expected: &str) -> bool {
    annotations
        .get(key)
        .map(|v| v.trim().eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

/// True when the HPA targets the workload and scales on cpu or memory.
pub fn hpa_conflicts(hpa: &HorizontalPodAutoscaler, workload: &Workload) -> bool {
    let Some(spec) = hpa.spec.as_ref() else {
        return false;
    };
    let target = &spec.scale_target_ref;
    if target.kind != workload.kind || target.name != workload.name {
        return false;
    }
    let metrics = match spec.metrics.as_ref() {
        Some(metrics) if !metrics.is_empty() => metrics,
        // The autoscaler defaults to 80% CPU
        _ => return true,
    };
    metrics.iter().any(|metric| {
        let resource = match metric.type_.as_str() {
            "Resource" => metric.resource.as_ref().map(|r| r.name.as_str()),
            "ContainerResource" => metric.container_resource.as_ref().map(|r| r.name.as_str()),
            _ => None,
        };
        matches!(resource, Some("cpu") | Some("memory"))
    })
}

/// Apply every workload rule in order and report the first that excludes it.
pub fn workload_eligibility(
    workload: &Workload,
    namespace_mode: &ResolvedMode,
    cfg: &ReconcilerConfig,
    hpas: &[HorizontalPodAutoscaler],
    unmanaged_vpas: &[VerticalPodAutoscaler],
) -> Eligibility {
    if contains_ignore_case(&cfg.ignore_controller_kinds, &workload.kind) {
        return Eligibility::IgnoredKind;
    }
    if annotation_is(&workload.annotations, UPDATE_MODE_KEY, "off") && !namespace_mode.explicit {
        return Eligibility::ModeOff;
    }
    if annotation_is(&workload.annotations, OPT_OUT_ANNOTATION, "true") {
        return Eligibility::OptedOut;
    }
    if !cfg.ignore_hpa_conflicts {
        if let Some(hpa) = hpas.iter().find(|hpa| hpa_conflicts(hpa, workload)) {
            return Eligibility::HpaConflict {
                hpa: hpa.metadata.name.clone().unwrap_or_default(),
            };
        }
    }
    let key = workload.key();
    if let Some(vpa) = unmanaged_vpas.iter().find(|vpa| vpa.target_key().as_ref() == Some(&key)) {
        return Eligibility::VpaConflict {
            vpa: vpa.metadata.name.clone().unwrap_or_default(),
        };
    }
    Eligibility::Eligible
}

/// Containers to leave out of a workload's summary.
pub fn excluded_containers(annotations: &BTreeMap<String, String>, global: &[String]) -> Vec<String> {
    let mut excluded: Vec<String> = global.to_vec();
    if let Some(value) = annotations.get(EXCLUDE_CONTAINERS_ANNOTATION) {
        excluded.extend(
            value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        );
    }
    excluded
}
