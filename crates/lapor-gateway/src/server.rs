//! HTTP server implementation using Axum.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::{delete, get, post};
use lapor_channels::DeliveryExecutor;
use lapor_core::LaporConfig;
use lapor_core::traits::Deliver;
use lapor_report::ReportProducer;
use lapor_scheduler::DelayedQueue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub config: LaporConfig,
    pub start_time: Instant,
    pub queue: Arc<DelayedQueue>,
    pub producer: Arc<ReportProducer>,
    /// Direct sends and group listing through the managed session.
    pub executor: Arc<DeliveryExecutor>,
    /// Where drained queue messages go (session or remote).
    pub deliver: Arc<dyn Deliver>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/v1/status", get(routes::status))
        .route("/api/v1/session/restart", post(routes::restart_session))
        .route("/api/v1/events/edit", post(routes::edit_event))
        .route("/api/v1/summary", post(routes::send_summary))
        .route("/api/v1/test", post(routes::send_test))
        .route("/api/v1/queue", get(routes::list_queue).delete(routes::reset_queue))
        .route("/api/v1/queue/{id}", delete(routes::discard_message))
        .route("/api/v1/queue/drain", post(routes::drain_queue));

    // Bridge-compatible routes used by existing callers.
    let bridge = Router::new()
        .route("/health", get(routes::health_check))
        .route("/send-message", post(routes::send_message))
        .route("/get-groups", get(routes::get_groups));

    api.merge(bridge)
        .layer(
            CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .allow_origin(Any)
                .max_age(std::time::Duration::from_secs(3600)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server.
pub async fn start(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.gateway.host, state.config.gateway.port);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
