// Public modules
pub mod types;
pub mod error;
pub mod config;
pub mod parsing;
pub mod vpa;
pub mod policy;
pub mod kubernetes;
pub mod owner;
pub mod reconciler;
pub mod handler;
pub mod controller;
pub mod summary;
pub mod dashboard;

// Re-export commonly used items
pub use types::*;
pub use error::{Error, PolicyError, Result};
pub use config::{resolve_kubeconfig, Cli, Command, EnvironmentProvider, MockEnvironment, SystemEnvironment};
pub use parsing::{compare_to_range, parse_cpu_to_millicores, parse_memory_to_bytes, Verdict};
pub use vpa::{build_vpa, vpa_name, VerticalPodAutoscaler, VerticalPodAutoscalerSpec};
pub use kubernetes::{ClusterApi, ClusterHandle, KubeCluster, MockCluster, MockWrite};
pub use reconciler::{ReconcilePlan, Reconciler};
pub use handler::Dispatcher;
pub use controller::Controller;
pub use summary::{Summarizer, Summary};
