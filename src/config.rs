use anyhow::{anyhow, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::types::{DashboardConfig, ReconcilerConfig, WorkloadKind};

/// Trait for abstracting environment variable access
pub trait EnvironmentProvider {
    fn get_var(&self, key: &str) -> Option<String>;
}

/// Production implementation using std::env
pub struct SystemEnvironment;

impl EnvironmentProvider for SystemEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Mock implementation for testing
#[derive(Debug, Default)]
pub struct MockEnvironment {
    vars: HashMap<String, String>,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self { vars: HashMap::new() }
    }

    pub fn set_var<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_var<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.set_var(key, value);
        self
    }
}

impl EnvironmentProvider for MockEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

#[derive(Debug, Parser)]
#[command(name = "goldilocks", version, about = "Keeps a recommendation-only VPA next to every workload")]
pub struct Cli {
    /// Path to a kubeconfig. Defaults to $KUBECONFIG, then ~/.kube/config, then in-cluster config.
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use.
    #[arg(long, global = true)]
    pub context: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the controller that maintains VPAs.
    Controller(ControllerArgs),
    /// Serve recommendations over HTTP.
    Dashboard(DashboardArgs),
    /// Print the recommendation summary as JSON.
    Summary(SummaryArgs),
    /// Reconcile one namespace once, creating VPAs for its workloads.
    CreateVpas(VpaArgs),
    /// Reconcile one namespace once, removing the VPAs it should no longer have.
    DeleteVpas(VpaArgs),
}

#[derive(Debug, Args)]
pub struct ControllerArgs {
    /// Manage every namespace that is not explicitly disabled.
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = false, default_missing_value = "true")]
    pub on_by_default: bool,

    /// Log intended changes without writing them.
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = false, default_missing_value = "true")]
    pub dry_run: bool,

    /// Comma-separated namespaces to enable.
    #[arg(long, default_value = "")]
    pub include_namespaces: String,

    /// Comma-separated namespaces to never manage.
    #[arg(long, default_value = "")]
    pub exclude_namespaces: String,

    /// Comma-separated controller kinds to skip.
    #[arg(long, default_value = "")]
    pub ignore_controller_kind: String,

    /// Comma-separated extra kinds to list, as apiVersion/Kind.
    #[arg(long, default_value = "")]
    pub additional_workload_kinds: String,

    /// Create VPAs even for workloads scaled on cpu/memory by an HPA.
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = false, default_missing_value = "true")]
    pub ignore_hpa_conflicts: bool,

    /// Retries per event before it is dropped.
    #[arg(long, default_value_t = 5)]
    pub max_retries: u32,
}

#[derive(Debug, Args)]
pub struct DashboardArgs {
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Path prefix for every route.
    #[arg(long, default_value = "/")]
    pub base_path: String,

    /// Comma-separated container names to leave out.
    #[arg(long, default_value = "")]
    pub exclude_containers: String,

    /// List namespaces unless they are explicitly disabled.
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = false, default_missing_value = "true")]
    pub on_by_default: bool,

    /// List every namespace that is not explicitly disabled.
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = false, default_missing_value = "true")]
    pub show_all: bool,
}

#[derive(Debug, Args)]
pub struct SummaryArgs {
    /// Limit the summary to one namespace.
    #[arg(long)]
    pub namespace: Option<String>,

    /// Comma-separated container names to leave out.
    #[arg(long, default_value = "")]
    pub exclude_containers: String,
}

#[derive(Debug, Args)]
pub struct VpaArgs {
    /// Namespace to reconcile.
    #[arg(short = 'n', long, default_value = "default")]
    pub namespace: String,

    /// Print the planned changes without writing them.
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = false, default_missing_value = "true")]
    pub dry_run: bool,
}

impl VpaArgs {
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig { dry_run: self.dry_run, ..Default::default() }
    }
}

/// Split a comma list, trimming entries and dropping empty ones.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl ControllerArgs {
    pub fn reconciler_config(&self) -> Result<ReconcilerConfig> {
        let additional_workload_kinds = parse_list(&self.additional_workload_kinds)
            .iter()
            .map(|s| {
                WorkloadKind::parse(s)
                    .ok_or_else(|| anyhow!("Invalid --additional-workload-kinds entry {:?}, expected apiVersion/Kind", s))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ReconcilerConfig {
            on_by_default: self.on_by_default,
            dry_run: self.dry_run,
            include_namespaces: parse_list(&self.include_namespaces),
            exclude_namespaces: parse_list(&self.exclude_namespaces),
            ignore_controller_kinds: parse_list(&self.ignore_controller_kind),
            additional_workload_kinds,
            ignore_hpa_conflicts: self.ignore_hpa_conflicts,
            max_retries: self.max_retries,
        })
    }
}

/// `/`, or a path with a leading slash and no trailing one.
pub fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", trimmed)
    }
}

impl DashboardArgs {
    pub fn dashboard_config(&self) -> DashboardConfig {
        DashboardConfig {
            port: self.port,
            base_path: normalize_base_path(&self.base_path),
            exclude_containers: parse_list(&self.exclude_containers),
            on_by_default: self.on_by_default,
            show_all: self.show_all,
        }
    }
}

/// Pick the kubeconfig file: the flag, then `KUBECONFIG`, then `~/.kube/config` if present.
/// `None` means fall back to in-cluster configuration.
pub fn resolve_kubeconfig<E: EnvironmentProvider>(explicit: Option<&Path>, env: &E) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(value) = env.get_var("KUBECONFIG") {
        // Only the first entry of a path list is read
        if let Some(first) = std::env::split_paths(&value).find(|p| !p.as_os_str().is_empty()) {
            return Some(first);
        }
    }
    let home = env.get_var("HOME")?;
    let default = Path::new(&home).join(".kube").join("config");
    default.exists().then_some(default)
}
