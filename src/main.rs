use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use goldilocks::config::{
    parse_list, resolve_kubeconfig, Cli, Command, ControllerArgs, DashboardArgs, SummaryArgs, SystemEnvironment, VpaArgs,
};
use goldilocks::dashboard::{self, AppState};
use goldilocks::{ClusterHandle, Controller, Dispatcher, KubeCluster, Reconciler, Summarizer};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let kubeconfig = resolve_kubeconfig(cli.kubeconfig.as_deref(), &SystemEnvironment);
    let handle = Arc::new(ClusterHandle::new(kubeconfig, cli.context.clone()));

    // Fail fast on a broken kubeconfig or unreachable cluster setup
    handle.client().await.context("Failed to build Kubernetes client")?;

    match cli.command {
        Command::Controller(args) => run_controller(handle, args).await,
        Command::Dashboard(args) => run_dashboard(handle, args).await,
        Command::Summary(args) => run_summary(handle, args).await,
        Command::CreateVpas(args) | Command::DeleteVpas(args) => run_once(handle, args).await,
    }
}

async fn run_controller(handle: Arc<ClusterHandle>, args: ControllerArgs) -> Result<()> {
    let cfg = args.reconciler_config()?;
    info!(
        on_by_default = cfg.on_by_default,
        dry_run = cfg.dry_run,
        include = ?cfg.include_namespaces,
        exclude = ?cfg.exclude_namespaces,
        "Starting controller"
    );

    let api = Arc::new(KubeCluster::new(handle.clone()));
    let dry_run = cfg.dry_run;
    let max_retries = cfg.max_retries;
    let reconciler = Arc::new(Reconciler::new(api, cfg));
    let dispatcher = Arc::new(Dispatcher::new(reconciler, dry_run));
    let controller = Controller::new(handle, dispatcher, max_retries);

    let token = CancellationToken::new();
    let tasks = controller.start(token.clone()).await?;

    shutdown_signal().await;
    info!("Shutdown signal received, stopping watchers");
    token.cancel();

    let joined = futures::future::join_all(tasks);
    if tokio::time::timeout(SHUTDOWN_GRACE, joined).await.is_err() {
        warn!(grace = ?SHUTDOWN_GRACE, "Tasks did not stop in time, exiting anyway");
    }
    Ok(())
}

async fn run_dashboard(handle: Arc<ClusterHandle>, args: DashboardArgs) -> Result<()> {
    let cfg = args.dashboard_config();
    let api = Arc::new(KubeCluster::new(handle.clone()));
    let state = Arc::new(AppState::new(api, handle, cfg));

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping dashboard");
        shutdown.cancel();
    });

    dashboard::serve(state, token).await
}

async fn run_summary(handle: Arc<ClusterHandle>, args: SummaryArgs) -> Result<()> {
    let api = Arc::new(KubeCluster::new(handle));
    let summarizer = Summarizer::new(api, parse_list(&args.exclude_containers));
    let summary = summarizer.summary(args.namespace.as_deref()).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_once(handle: Arc<ClusterHandle>, args: VpaArgs) -> Result<()> {
    let api = Arc::new(KubeCluster::new(handle));
    let reconciler = Reconciler::new(api, args.reconciler_config());
    let plan = reconciler
        .reconcile_existing(&args.namespace)
        .await
        .with_context(|| format!("Failed to reconcile namespace {}", args.namespace))?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
