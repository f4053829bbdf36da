//! JSON dashboard over the recommendation summary.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use http::StatusCode;
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Error;
use crate::kubernetes::{ClusterApi, ClusterHandle};
use crate::policy::ENABLED_LABEL;
use crate::summary::Summarizer;
use crate::types::DashboardConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub api: Arc<dyn ClusterApi>,
    pub handle: Arc<ClusterHandle>,
    pub config: DashboardConfig,
}

impl AppState {
    pub fn new(api: Arc<dyn ClusterApi>, handle: Arc<ClusterHandle>, config: DashboardConfig) -> Self {
        Self { api, handle, config }
    }

    fn summarizer(&self) -> Summarizer {
        Summarizer::new(self.api.clone(), self.config.exclude_containers.clone())
    }

    /// Whether the dashboard lists the namespace. Label values compare case-insensitively.
    pub fn lists_namespace(&self, namespace: &Namespace) -> bool {
        let label = namespace.labels().get(ENABLED_LABEL).map(String::as_str);
        if self.config.on_by_default || self.config.show_all {
            !label.is_some_and(|value| value.eq_ignore_ascii_case("false"))
        } else {
            label.is_some_and(|value| value.eq_ignore_ascii_case("true"))
        }
    }
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            error!(error = %self.0, "Dashboard request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClustersResponse {
    current: Option<String>,
    contexts: Vec<String>,
}

async fn health() -> &'static str {
    "OK"
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn namespaces(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, ApiError> {
    let mut names: Vec<String> = state
        .api
        .list_namespaces(None)
        .await?
        .into_iter()
        .filter(|ns| state.lists_namespace(ns))
        .filter_map(|ns| ns.metadata.name)
        .collect();
    names.sort();
    Ok(Json(names))
}

async fn summary_all(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.summarizer().summary(None).await?))
}

async fn summary_namespace(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.summarizer().summary(Some(&namespace)).await?))
}

async fn clusters(State(state): State<Arc<AppState>>) -> Result<Json<ClustersResponse>, ApiError> {
    Ok(Json(ClustersResponse {
        current: state.handle.current_context(),
        contexts: state.handle.contexts()?,
    }))
}

async fn switch_cluster(
    State(state): State<Arc<AppState>>,
    Path(context): Path<String>,
) -> Result<Response, ApiError> {
    let contexts = state.handle.contexts()?;
    if !contexts.is_empty() && !contexts.contains(&context) {
        let body = Json(json!({ "error": format!("unknown context {}", context) }));
        return Ok((StatusCode::NOT_FOUND, body).into_response());
    }
    state.handle.use_context(&context);
    Ok(Json(ClustersResponse { current: Some(context), contexts }).into_response())
}

/// Create the dashboard router, mounted under the configured base path.
pub fn create_router(state: Arc<AppState>) -> Router {
    let base_path = state.config.base_path.clone();
    let routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(healthz))
        .route("/namespaces", get(namespaces))
        .route("/api", get(summary_all))
        .route("/api/:namespace", get(summary_namespace))
        .route("/clusters", get(clusters))
        .route("/clusters/:context", post(switch_cluster))
        .with_state(state);

    if base_path == "/" {
        routes
    } else {
        Router::new().nest(&base_path, routes)
    }
}

/// Serve the dashboard until the token is cancelled.
pub async fn serve(state: Arc<AppState>, token: CancellationToken) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", state.config.port);
    let app = create_router(state);

    info!(addr = %addr, "Starting dashboard");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    Ok(())
}
