use std::collections::BTreeMap;
use std::sync::Arc;

use clap::Parser;
use goldilocks::config::VpaArgs;
use goldilocks::kubernetes::ClusterObject;
use goldilocks::policy::{ENABLED_LABEL, OPT_OUT_ANNOTATION, UPDATE_MODE_KEY};
use goldilocks::summary::Summarizer;
use goldilocks::types::{Event, EventType, ResourceKind};
use goldilocks::vpa::{
    build_vpa, RecommendedContainerResources, RecommendedPodResources, VerticalPodAutoscalerStatus,
};
use goldilocks::{
    vpa_name, Cli, Command, Dispatcher, Error, MockCluster, MockWrite, Reconciler, ReconcilerConfig, UpdateMode, Verdict,
    VerticalPodAutoscaler, VerticalPodAutoscalerSpec, Workload, WorkloadKind,
};
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec, MetricSpec, MetricTarget,
    ResourceMetricSource,
};
use k8s_openapi::api::core::v1::{Container, Pod, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;

const NS: &str = "testing";

fn create_test_reconciler(cluster: &Arc<MockCluster>, config: ReconcilerConfig) -> Reconciler {
    Reconciler::new(cluster.clone(), config)
}

fn create_test_workload(name: &str) -> Workload {
    Workload {
        namespace: NS.to_string(),
        api_version: "apps/v1".to_string(),
        kind: "Deployment".to_string(),
        name: name.to_string(),
        annotations: BTreeMap::new(),
    }
}

fn create_test_hpa(target: &str, resource: Option<&str>) -> HorizontalPodAutoscaler {
    let metrics = resource.map(|name| {
        vec![MetricSpec {
            type_: "Resource".to_string(),
            resource: Some(ResourceMetricSource {
                name: name.to_string(),
                target: MetricTarget {
                    type_: "Utilization".to_string(),
                    average_utilization: Some(80),
                    ..Default::default()
                },
            }),
            ..Default::default()
        }]
    });
    HorizontalPodAutoscaler {
        metadata: ObjectMeta {
            name: Some(format!("{}-hpa", target)),
            namespace: Some(NS.to_string()),
            ..Default::default()
        },
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: target.to_string(),
            },
            max_replicas: 5,
            metrics,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn controller_ref(api_version: &str, kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("{}-uid", name),
        controller: Some(true),
        ..Default::default()
    }
}

fn create_test_object(api_version: &str, kind: &str, name: &str, owner: Option<OwnerReference>) -> ClusterObject {
    ClusterObject {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NS.to_string()),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        containers: Vec::new(),
    }
}

/// (name, target, mode) of every VPA in the namespace, sorted.
fn vpa_state(cluster: &MockCluster, namespace: &str) -> Vec<(String, Option<(String, String)>, Option<String>)> {
    let mut state: Vec<_> = cluster
        .vpas(namespace)
        .iter()
        .map(|vpa| {
            (
                vpa.metadata.name.clone().unwrap_or_default(),
                vpa.target_key(),
                vpa.update_mode().map(str::to_string),
            )
        })
        .collect();
    state.sort();
    state
}

#[tokio::test]
async fn test_basic_deployment_gets_vpa() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "True")])
        .add_workload(NS, &WorkloadKind::deployment(), "test-basic", &[]);

    let reconciler = create_test_reconciler(&cluster, ReconcilerConfig::default());
    reconciler.reconcile(NS, false).await.unwrap();

    let vpas = cluster.vpas(NS);
    assert_eq!(vpas.len(), 1);
    let vpa = &vpas[0];
    assert_eq!(vpa.metadata.name.as_deref(), Some("goldilocks-test-basic"));

    let labels = vpa.metadata.labels.clone().unwrap_or_default();
    assert_eq!(labels.get("creator").map(String::as_str), Some("Fairwinds"));
    assert_eq!(labels.get("source").map(String::as_str), Some("goldilocks"));

    let target = vpa.spec.target_ref.as_ref().unwrap();
    assert_eq!(target.api_version.as_deref(), Some("apps/v1"));
    assert_eq!(target.kind, "Deployment");
    assert_eq!(target.name, "test-basic");
    assert_eq!(vpa.update_mode(), Some("Off"));
}

#[tokio::test]
async fn test_namespace_update_mode_applies() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "True"), (UPDATE_MODE_KEY, "auto")])
        .add_workload(NS, &WorkloadKind::deployment(), "test-basic", &[]);

    create_test_reconciler(&cluster, ReconcilerConfig::default())
        .reconcile(NS, false)
        .await
        .unwrap();

    let vpa = cluster.vpa(NS, "goldilocks-test-basic").unwrap();
    assert_eq!(vpa.update_mode(), Some("Auto"));
}

#[tokio::test]
async fn test_orphaned_vpa_replaced() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "true")])
        .add_workload(NS, &WorkloadKind::deployment(), "a", &[])
        .add_vpa(build_vpa(&create_test_workload("b"), UpdateMode::Off));

    let plan = create_test_reconciler(&cluster, ReconcilerConfig::default())
        .reconcile(NS, false)
        .await
        .unwrap();

    assert_eq!(plan.deletes, vec!["goldilocks-b"]);
    assert_eq!(plan.creates.len(), 1);
    assert!(cluster.vpa(NS, "goldilocks-a").is_some());
    assert!(cluster.vpa(NS, "goldilocks-b").is_none());

    // Deletes are applied before creates
    assert_eq!(
        cluster.writes(),
        vec![
            MockWrite::Delete { namespace: NS.into(), name: "goldilocks-b".into() },
            MockWrite::Create { namespace: NS.into(), name: "goldilocks-a".into() },
        ]
    );
}

#[tokio::test]
async fn test_vpa_under_another_workloads_name_converges() {
    let mut squatter = build_vpa(&create_test_workload("a"), UpdateMode::Off);
    squatter.metadata.name = Some("goldilocks-b".to_string());
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "true")])
        .add_workload(NS, &WorkloadKind::deployment(), "a", &[])
        .add_workload(NS, &WorkloadKind::deployment(), "b", &[])
        .add_vpa(squatter);

    let reconciler = create_test_reconciler(&cluster, ReconcilerConfig::default());
    reconciler.reconcile(NS, false).await.unwrap();
    assert_eq!(
        vpa_state(&cluster, NS),
        vec![
            (
                "goldilocks-a".to_string(),
                Some(("Deployment".to_string(), "a".to_string())),
                Some("Off".to_string())
            ),
            (
                "goldilocks-b".to_string(),
                Some(("Deployment".to_string(), "b".to_string())),
                Some("Off".to_string())
            ),
        ]
    );

    assert!(reconciler.reconcile(NS, false).await.unwrap().is_noop());
}

#[tokio::test]
async fn test_opt_out_label_beats_on_by_default() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace("labeled-false", &[(ENABLED_LABEL, "false")])
        .add_workload("labeled-false", &WorkloadKind::deployment(), "web", &[]);
    let mut stale = build_vpa(&create_test_workload("web"), UpdateMode::Off);
    stale.metadata.namespace = Some("labeled-false".to_string());
    cluster.add_vpa(stale);

    let config = ReconcilerConfig { on_by_default: true, ..Default::default() };
    let plan = create_test_reconciler(&cluster, config)
        .reconcile("labeled-false", false)
        .await
        .unwrap();

    assert!(plan.creates.is_empty());
    assert_eq!(plan.deletes, vec!["goldilocks-web"]);
    assert!(cluster.vpas("labeled-false").is_empty());
}

#[tokio::test]
async fn test_workload_mode_off_beats_namespace_auto() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "true"), (UPDATE_MODE_KEY, "auto")])
        .add_workload(NS, &WorkloadKind::deployment(), "test-deploy", &[(UPDATE_MODE_KEY, "off")]);

    create_test_reconciler(&cluster, ReconcilerConfig::default())
        .reconcile(NS, false)
        .await
        .unwrap();

    let vpa = cluster.vpa(NS, "goldilocks-test-deploy").unwrap();
    assert_eq!(vpa.update_mode(), Some("Off"));
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "true")])
        .add_workload(NS, &WorkloadKind::deployment(), "x", &[]);

    let reconciler = create_test_reconciler(&cluster, ReconcilerConfig { dry_run: true, ..Default::default() });
    let dry = reconciler.reconcile(NS, true).await.unwrap();
    assert_eq!(dry.creates.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["goldilocks-x"]);
    assert!(cluster.writes().is_empty());
    assert!(cluster.vpas(NS).is_empty());

    // The real pass applies exactly what the dry run reported
    let applied = reconciler.reconcile(NS, false).await.unwrap();
    assert_eq!(applied, dry);
    assert!(cluster.vpa(NS, "goldilocks-x").is_some());
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "true")])
        .add_workload(NS, &WorkloadKind::deployment(), "web", &[])
        .add_workload(NS, &WorkloadKind::stateful_set(), "db", &[])
        .add_workload(NS, &WorkloadKind::daemon_set(), "agent", &[]);

    let reconciler = create_test_reconciler(&cluster, ReconcilerConfig::default());
    reconciler.reconcile(NS, false).await.unwrap();
    assert_eq!(cluster.writes().len(), 3);

    cluster.clear_writes();
    let second = reconciler.reconcile(NS, false).await.unwrap();
    assert!(second.is_noop());
    assert!(cluster.writes().is_empty());
}

#[tokio::test]
async fn test_mode_change_patches_existing_vpa() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "true"), (UPDATE_MODE_KEY, "initial")])
        .add_workload(NS, &WorkloadKind::deployment(), "web", &[])
        .add_vpa(build_vpa(&create_test_workload("web"), UpdateMode::Off));

    let plan = create_test_reconciler(&cluster, ReconcilerConfig::default())
        .reconcile(NS, false)
        .await
        .unwrap();

    assert_eq!(plan.updates.len(), 1);
    assert_eq!(
        cluster.writes(),
        vec![MockWrite::Update { namespace: NS.into(), name: "goldilocks-web".into() }]
    );
    assert_eq!(cluster.vpa(NS, "goldilocks-web").unwrap().update_mode(), Some("Initial"));
}

#[tokio::test]
async fn test_disjoint_namespaces_commute() {
    fn seed() -> Arc<MockCluster> {
        let cluster = Arc::new(MockCluster::new());
        cluster
            .add_namespace("one", &[(ENABLED_LABEL, "true")])
            .add_namespace("two", &[(ENABLED_LABEL, "true"), (UPDATE_MODE_KEY, "recreate")])
            .add_workload("one", &WorkloadKind::deployment(), "web", &[])
            .add_workload("two", &WorkloadKind::deployment(), "web", &[])
            .add_workload("two", &WorkloadKind::stateful_set(), "db", &[]);
        cluster
    }

    let forward = seed();
    let reconciler = create_test_reconciler(&forward, ReconcilerConfig::default());
    reconciler.reconcile("one", false).await.unwrap();
    reconciler.reconcile("two", false).await.unwrap();

    let backward = seed();
    let reconciler = create_test_reconciler(&backward, ReconcilerConfig::default());
    reconciler.reconcile("two", false).await.unwrap();
    reconciler.reconcile("one", false).await.unwrap();

    for ns in ["one", "two"] {
        assert_eq!(vpa_state(&forward, ns), vpa_state(&backward, ns));
    }
    assert_eq!(vpa_state(&forward, "two").len(), 2);
}

#[tokio::test]
async fn test_concurrent_reconciles_converge() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "true")])
        .add_workload(NS, &WorkloadKind::deployment(), "web", &[]);
    let reconciler = Arc::new(create_test_reconciler(&cluster, ReconcilerConfig::default()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.reconcile(NS, false).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Passes on one namespace are serialized, so only the first creates
    assert_eq!(cluster.writes().len(), 1);
    assert_eq!(cluster.vpas(NS).len(), 1);
}

#[tokio::test]
async fn test_unmanaged_vpas_untouched() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "true")])
        .add_workload(NS, &WorkloadKind::deployment(), "web", &[])
        .add_workload(NS, &WorkloadKind::deployment(), "api", &[]);

    // Hand-written VPA for web, and one that only carries part of the label set
    let mut hand_written = VerticalPodAutoscaler::new("web-vpa", VerticalPodAutoscalerSpec::default());
    hand_written.metadata.namespace = Some(NS.to_string());
    hand_written.spec = build_vpa(&create_test_workload("web"), UpdateMode::Auto).spec;
    cluster.add_vpa(hand_written);

    let mut partial = build_vpa(&create_test_workload("gone"), UpdateMode::Off);
    partial.metadata.labels = Some([("creator".to_string(), "Fairwinds".to_string())].into_iter().collect());
    cluster.add_vpa(partial);

    let reconciler = create_test_reconciler(&cluster, ReconcilerConfig::default());
    for _ in 0..3 {
        reconciler.reconcile(NS, false).await.unwrap();
    }

    // web already has a VPA someone else owns, api gets ours
    assert_eq!(
        cluster.writes(),
        vec![MockWrite::Create { namespace: NS.into(), name: "goldilocks-api".into() }]
    );
    assert_eq!(cluster.vpa(NS, "web-vpa").unwrap().update_mode(), Some("Auto"));
    assert!(cluster.vpa(NS, "goldilocks-gone").is_some());
}

#[tokio::test]
async fn test_long_names_stay_distinct() {
    let name_52 = "a".repeat(52);
    let name_53 = "a".repeat(53);
    let name_64 = "a".repeat(64);

    let cluster = Arc::new(MockCluster::new());
    cluster.add_namespace(NS, &[(ENABLED_LABEL, "true")]);
    for name in [&name_52, &name_53, &name_64] {
        cluster.add_workload(NS, &WorkloadKind::deployment(), name, &[]);
    }

    create_test_reconciler(&cluster, ReconcilerConfig::default())
        .reconcile(NS, false)
        .await
        .unwrap();

    let vpas = vpa_state(&cluster, NS);
    assert_eq!(vpas.len(), 3);
    for (name, target, _) in &vpas {
        assert!(name.len() <= 63, "{} is too long", name);
        let (_, workload) = target.clone().unwrap();
        assert_eq!(name, &vpa_name(&workload));
    }
    assert!(cluster.vpa(NS, &format!("goldilocks-{}", name_52)).is_some());
}

#[tokio::test]
async fn test_crd_owner_chain() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "true")])
        .add_object(create_test_object("example.com/v1", "App", "shop", None))
        .add_object(create_test_object(
            "example.com/v1",
            "Release",
            "shop-r1",
            Some(controller_ref("example.com/v1", "App", "shop")),
        ))
        .add_object(create_test_object(
            "apps/v1",
            "ReplicaSet",
            "shop-r1-abc",
            Some(controller_ref("example.com/v1", "Release", "shop-r1")),
        ))
        .add_pod(Pod {
            metadata: ObjectMeta {
                name: Some("shop-r1-abc-xyz".to_string()),
                namespace: Some(NS.to_string()),
                owner_references: Some(vec![controller_ref("apps/v1", "ReplicaSet", "shop-r1-abc")]),
                ..Default::default()
            },
            ..Default::default()
        });

    create_test_reconciler(&cluster, ReconcilerConfig::default())
        .reconcile(NS, false)
        .await
        .unwrap();

    let vpa = cluster.vpa(NS, "goldilocks-shop").unwrap();
    let target = vpa.spec.target_ref.unwrap();
    assert_eq!(target.api_version.as_deref(), Some("example.com/v1"));
    assert_eq!(target.kind, "App");
    assert_eq!(target.name, "shop");
    assert_eq!(cluster.vpas(NS).len(), 1);
}

#[tokio::test]
async fn test_hpa_conflicts() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "true")])
        .add_workload(NS, &WorkloadKind::deployment(), "cpu-scaled", &[])
        .add_workload(NS, &WorkloadKind::deployment(), "default-scaled", &[])
        .add_workload(NS, &WorkloadKind::deployment(), "plain", &[])
        .add_hpa(create_test_hpa("cpu-scaled", Some("cpu")))
        .add_hpa(create_test_hpa("default-scaled", None));

    create_test_reconciler(&cluster, ReconcilerConfig::default())
        .reconcile(NS, false)
        .await
        .unwrap();
    let names: Vec<String> = vpa_state(&cluster, NS).into_iter().map(|(name, _, _)| name).collect();
    assert_eq!(names, vec!["goldilocks-plain"]);

    let config = ReconcilerConfig { ignore_hpa_conflicts: true, ..Default::default() };
    create_test_reconciler(&cluster, config).reconcile(NS, false).await.unwrap();
    assert_eq!(cluster.vpas(NS).len(), 3);
}

#[tokio::test]
async fn test_opt_out_and_ignored_kinds() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "true")])
        .add_workload(NS, &WorkloadKind::deployment(), "web", &[(OPT_OUT_ANNOTATION, "true")])
        .add_workload(NS, &WorkloadKind::daemon_set(), "agent", &[])
        .add_workload(NS, &WorkloadKind::stateful_set(), "db", &[]);

    let config = ReconcilerConfig { ignore_controller_kinds: vec!["DaemonSet".to_string()], ..Default::default() };
    create_test_reconciler(&cluster, config).reconcile(NS, false).await.unwrap();

    let names: Vec<String> = vpa_state(&cluster, NS).into_iter().map(|(name, _, _)| name).collect();
    assert_eq!(names, vec!["goldilocks-db"]);
}

#[tokio::test]
async fn test_additional_workload_kinds() {
    let rollout = WorkloadKind::parse("argoproj.io/v1alpha1/Rollout").unwrap();
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "true")])
        .add_workload(NS, &rollout, "canary", &[]);

    create_test_reconciler(&cluster, ReconcilerConfig::default())
        .reconcile(NS, false)
        .await
        .unwrap();
    assert!(cluster.vpas(NS).is_empty());

    let config = ReconcilerConfig { additional_workload_kinds: vec![rollout], ..Default::default() };
    create_test_reconciler(&cluster, config).reconcile(NS, false).await.unwrap();
    let vpa = cluster.vpa(NS, "goldilocks-canary").unwrap();
    assert_eq!(vpa.target_key(), Some(("Rollout".to_string(), "canary".to_string())));
}

#[tokio::test]
async fn test_write_failures_are_aggregated() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "true")])
        .add_workload(NS, &WorkloadKind::deployment(), "a", &[])
        .add_workload(NS, &WorkloadKind::deployment(), "b", &[])
        .fail_writes_to("goldilocks-a");

    let reconciler = create_test_reconciler(&cluster, ReconcilerConfig::default());
    let err = reconciler.reconcile(NS, false).await.unwrap_err();
    assert!(err.is_transient());
    match &err {
        Error::Aggregate { namespace, errors } => {
            assert_eq!(namespace, NS);
            assert_eq!(errors.len(), 1);
        }
        other => panic!("expected aggregate error, got {:?}", other),
    }
    // The other write still went through
    assert!(cluster.vpa(NS, "goldilocks-b").is_some());

    cluster.clear_failures();
    reconciler.reconcile(NS, false).await.unwrap();
    assert!(cluster.vpa(NS, "goldilocks-a").is_some());
}

#[tokio::test]
async fn test_namespace_deleted_mid_stream() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "true")])
        .add_workload(NS, &WorkloadKind::deployment(), "web", &[]);
    let reconciler = Arc::new(create_test_reconciler(&cluster, ReconcilerConfig::default()));
    let dispatcher = Dispatcher::new(reconciler, false);

    let event = Event::new(ResourceKind::Namespace, EventType::Create, None, NS);
    dispatcher.dispatch(&event, None).await.unwrap();
    assert_eq!(cluster.vpas(NS).len(), 1);

    cluster.remove_namespace(NS);
    cluster.clear_writes();
    let event = Event::new(ResourceKind::Namespace, EventType::Delete, None, NS);
    dispatcher.dispatch(&event, None).await.unwrap();
    assert!(cluster.writes().is_empty());
}

#[test]
fn test_vpa_delete_event_restores_vpa() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "true")])
        .add_workload(NS, &WorkloadKind::deployment(), "web", &[]);
    let reconciler = Arc::new(create_test_reconciler(&cluster, ReconcilerConfig::default()));
    let dispatcher = Dispatcher::new(reconciler, false);

    tokio_test::block_on(async {
        // Someone removes the managed VPA; the delete event puts it back
        let event = Event::new(ResourceKind::Vpa, EventType::Delete, Some(NS), "goldilocks-web");
        dispatcher.dispatch(&event, None).await.unwrap();
    });
    assert_eq!(
        cluster.writes(),
        vec![MockWrite::Create { namespace: NS.into(), name: "goldilocks-web".into() }]
    );
}

#[tokio::test]
async fn test_summary_joins_live_resources() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "true")])
        .add_workload(NS, &WorkloadKind::deployment(), "web", &[])
        .set_containers(
            NS,
            "Deployment",
            "web",
            vec![
                Container {
                    name: "app".to_string(),
                    resources: Some(ResourceRequirements {
                        requests: Some([("cpu".to_string(), Quantity("500m".to_string()))].into_iter().collect()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                Container { name: "istio-proxy".to_string(), ..Default::default() },
            ],
        );

    let recommendation = |container: &str| RecommendedContainerResources {
        container_name: container.to_string(),
        target: [("cpu".to_string(), Quantity("50m".to_string()))].into_iter().collect(),
        lower_bound: [("cpu".to_string(), Quantity("25m".to_string()))].into_iter().collect(),
        upper_bound: [("cpu".to_string(), Quantity("200m".to_string()))].into_iter().collect(),
        uncapped_target: BTreeMap::new(),
    };
    let mut vpa = build_vpa(&create_test_workload("web"), UpdateMode::Off);
    vpa.status = Some(VerticalPodAutoscalerStatus {
        recommendation: Some(RecommendedPodResources {
            container_recommendations: vec![recommendation("app"), recommendation("istio-proxy")],
        }),
        conditions: None,
    });
    cluster.add_vpa(vpa);

    let summary = Summarizer::new(cluster.clone(), vec!["istio-proxy".to_string()])
        .summary(Some(NS))
        .await
        .unwrap();

    let workload = &summary.namespaces[NS].workloads["web"];
    assert_eq!(workload.controller_type, "Deployment");
    assert_eq!(workload.containers.len(), 1);
    let app = &workload.containers["app"];
    assert_eq!(app.verdicts["cpu"].request, Some(Verdict::GreaterThan));
    assert_eq!(app.verdicts["cpu"].limit, Some(Verdict::NotSet));
}

fn vpa_args(args: &[&str]) -> VpaArgs {
    let cli = Cli::try_parse_from(std::iter::once("goldilocks").chain(args.iter().copied())).unwrap();
    match cli.command {
        Command::CreateVpas(args) | Command::DeleteVpas(args) => args,
        other => panic!("expected a one-shot command, got {:?}", other),
    }
}

#[tokio::test]
async fn test_create_vpas_command() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "true")])
        .add_workload(NS, &WorkloadKind::deployment(), "web", &[]);

    let args = vpa_args(&["create-vpas", "-n", NS, "--dry-run=true"]);
    let plan = create_test_reconciler(&cluster, args.reconciler_config())
        .reconcile_existing(&args.namespace)
        .await
        .unwrap();
    assert_eq!(plan.creates.len(), 1);
    assert!(cluster.writes().is_empty());
    let printed = serde_json::to_value(&plan).unwrap();
    assert_eq!(printed["creates"][0]["name"], "goldilocks-web");

    let args = vpa_args(&["create-vpas", "--namespace", NS]);
    create_test_reconciler(&cluster, args.reconciler_config())
        .reconcile_existing(&args.namespace)
        .await
        .unwrap();
    assert!(cluster.vpa(NS, "goldilocks-web").is_some());
}

#[tokio::test]
async fn test_delete_vpas_command() {
    let cluster = Arc::new(MockCluster::new());
    cluster
        .add_namespace(NS, &[(ENABLED_LABEL, "false")])
        .add_workload(NS, &WorkloadKind::deployment(), "web", &[])
        .add_vpa(build_vpa(&create_test_workload("web"), UpdateMode::Off));

    let args = vpa_args(&["delete-vpas", "-n", NS]);
    let plan = create_test_reconciler(&cluster, args.reconciler_config())
        .reconcile_existing(&args.namespace)
        .await
        .unwrap();
    assert_eq!(plan.deletes, vec!["goldilocks-web"]);
    assert!(cluster.vpas(NS).is_empty());

    let args = vpa_args(&["delete-vpas", "-n", "ghost"]);
    let err = create_test_reconciler(&cluster, args.reconciler_config())
        .reconcile_existing(&args.namespace)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
