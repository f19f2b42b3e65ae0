//! Application routes.
//!
//! Only what the lifecycle needs: health, the root redirect, the API documentation
//! placeholder, public system info, the hosted web client, and optional control endpoints
//! that request a shutdown or restart of the run.

use alloc::sync::Arc;
use core::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{
        Request, StatusCode,
        header::{AUTHORIZATION, COOKIE},
    },
    middleware as ax_middleware,
    response::{Html, IntoResponse as _, Redirect, Response},
    routing::{self, get, post},
};
use chrono::{DateTime, Local};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    ServiceBuilderExt as _, request_id::MakeRequestUuid, services::ServeDir,
    timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::{info, warn};

use super::middleware::{LevelAdjustingOnFailure, secure_headers_middleware};
use crate::{
    config::ResolvedConfiguration, lifecycle::RunControl, paths::ApplicationPaths,
    services::ServiceGraph,
};

/// State shared by the request handlers of one run.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ResolvedConfiguration>,
    pub paths: Arc<ApplicationPaths>,
    pub control: RunControl,
    pub started_at: DateTime<Local>,
}

impl AppState {
    #[must_use]
    pub fn for_graph(graph: &ServiceGraph) -> Self {
        Self {
            config: Arc::clone(graph.config()),
            paths: Arc::clone(graph.paths()),
            control: graph.control().clone(),
            started_at: graph.started_at(),
        }
    }
}

#[derive(Serialize)]
struct PublicSystemInfo<'state> {
    server_name: &'state str,
    version: &'static str,
    published_url: Option<&'state str>,
    started_at: String,
}

/// `503` once the run was asked to stop, so load balancers drain it first.
async fn health(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.control.requested() {
        None => (StatusCode::OK, "Healthy"),
        Some(_) => (StatusCode::SERVICE_UNAVAILABLE, "Stopping"),
    }
}

async fn root_redirect(State(state): State<AppState>) -> Redirect {
    let target = state.config.settings().server.default_redirect_path.as_str();
    Redirect::temporary(&format!("/{}", target.trim_start_matches('/')))
}

async fn api_docs() -> Html<&'static str> {
    Html(concat!(
        "<!doctype html><html><head><title>mediahost API</title></head><body>",
        "<h1>mediahost API</h1>",
        "<p>Interactive API documentation is not bundled with this build.</p>",
        "</body></html>",
    ))
}

async fn public_info(State(state): State<AppState>) -> Response {
    let server = &state.config.settings().server;
    Json(PublicSystemInfo {
        server_name: &server.server_name,
        version: env!("CARGO_PKG_VERSION"),
        published_url: server.published_url.as_deref(),
        started_at: state.started_at.to_rfc3339(),
    })
    .into_response()
}

async fn request_restart(State(state): State<AppState>) -> StatusCode {
    info!("Restart requested over HTTP");
    state.control.request_restart();
    StatusCode::ACCEPTED
}

async fn request_shutdown(State(state): State<AppState>) -> StatusCode {
    info!("Shutdown requested over HTTP");
    state.control.request_shutdown();
    StatusCode::ACCEPTED
}

fn create_app_router(state: &AppState) -> Router<AppState> {
    let server = &state.config.settings().server;
    let mut router = Router::new()
        .route("/", get(root_redirect))
        .route("/health", get(health))
        .route("/api-docs/swagger", get(api_docs))
        .route("/system/info/public", get(public_info));

    if server.host_web_client {
        router = router.nest_service(
            "/web",
            ServeDir::new(&state.paths.web_dir).append_index_html_on_directories(true),
        );
    }

    if server.enable_control_endpoints {
        router = router
            .route("/system/restart", post(request_restart))
            .route("/system/shutdown", post(request_shutdown));
    }
    router
}

/// Build the complete application with its middleware stack.
pub fn create_app(state: AppState) -> Router {
    let middleware_stack = ServiceBuilder::new()
        .sensitive_headers([AUTHORIZATION, COOKIE])
        .set_x_request_id(MakeRequestUuid)
        .propagate_x_request_id()
        .layer(TraceLayer::new_for_http().on_failure(LevelAdjustingOnFailure))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(ax_middleware::from_fn(secure_headers_middleware));

    create_app_router(&state)
        .with_state(state)
        .fallback(routing::any(|req: Request<Body>| async move {
            warn!(method = %req.method(), uri = %req.uri(), "Unhandled request");
            StatusCode::NOT_FOUND
        }))
        .layer(middleware_stack)
}
