//! HTTP front end for the execution bridge.
//!
//! Routes:
//! - `GET|POST /backup-validator/{script_name}` run a script
//! - `GET /health` liveness probe
//! - `GET /metrics` Prometheus exposition
//!
//! Every route sits behind the allow-list gate in [`access::ip_gate`].

pub mod access;
pub mod error;
pub mod handlers;

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{error, info, info_span, warn};

use crate::bridge::{ExecutionBridge, PathResolver, ScriptRunner};
use crate::config::Config;
use crate::logging::RequestId;
use crate::metrics;
use crate::policy::IpPolicy;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<ExecutionBridge>,
    pub policy: Arc<IpPolicy>,
    /// Use the first `X-Forwarded-For` hop as the client address
    pub trust_proxy: bool,
}

impl AppState {
    pub fn new(bridge: ExecutionBridge, policy: IpPolicy, trust_proxy: bool) -> Self {
        Self {
            bridge: Arc::new(bridge),
            policy: Arc::new(policy),
            trust_proxy,
        }
    }

    /// Build the state described by a loaded configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the allow list cannot be loaded.
    pub fn from_config(config: &Config) -> Result<Self> {
        let allow_list = config
            .allow_list()
            .context("Failed to load IP allow list")?;
        let policy = IpPolicy::new(allow_list);

        let resolver = PathResolver::new(&config.scripts.root);
        let runner = ScriptRunner::new(config.scripts.runner_config());

        Ok(Self::new(
            ExecutionBridge::new(resolver, runner),
            policy,
            config.server.trust_proxy,
        ))
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/backup-validator/{script_name}",
            get(handlers::run_get).post(handlers::run_post),
        )
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            access::ip_gate,
        ))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                info_span!(
                    "request",
                    request_id = %RequestId::new(),
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .with_state(state)
}

fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!("Handler panicked: {}", detail);
    metrics::REQUESTS_TOTAL.with_label_values(&["error"]).inc();

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "status": "error", "message": "Internal server error" })),
    )
        .into_response()
}

/// Start the HTTP server and run until interrupted
///
/// # Errors
///
/// Returns an error if the allow list cannot be loaded or the listener
/// cannot be bound.
pub async fn run_server(config: &Config) -> Result<()> {
    metrics::init();

    let state = AppState::from_config(config)?;
    if state.trust_proxy {
        warn!("Trusting X-Forwarded-For; only enable this behind a proxy you control");
    }

    let addr = config.listen_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let runner = state.bridge.runner().config();
    info!(
        address = %addr,
        scripts = %state.bridge.resolver().root().display(),
        timeout = ?runner.timeout,
        max_concurrent = ?runner.max_concurrent,
        allow_entries = state.policy.allow_list().entries().len(),
        "Starting backup validator"
    );

    serve(listener, state).await
}

/// Serve on an already bound listener until ctrl-c
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
