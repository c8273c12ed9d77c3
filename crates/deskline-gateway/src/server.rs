// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::time::Instant;

use axum::Router;
use axum::routing::{get, post};
use deskline_config::DesklineConfig;
use deskline_core::DesklineError;
use deskline_pipeline::Pipeline;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub pipeline: Pipeline,
    /// Kick off a queue pass after each accepted send request.
    pub process_after_enqueue: bool,
    /// Batch size of that post-enqueue pass.
    pub process_batch_size: u32,
    /// Batch size of `POST /v1/queue/process` when none is given.
    pub default_batch_size: u32,
    /// Cancelled at shutdown; queue passes stop between messages.
    pub shutdown: CancellationToken,
    pub started: Instant,
}

impl GatewayState {
    pub fn new(pipeline: Pipeline, config: &DesklineConfig, shutdown: CancellationToken) -> Self {
        Self {
            pipeline,
            process_after_enqueue: config.gateway.process_after_enqueue,
            process_batch_size: config.gateway.process_batch_size,
            default_batch_size: config.queue.batch_size,
            shutdown,
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl From<&DesklineConfig> for ServerConfig {
    fn from(config: &DesklineConfig) -> Self {
        Self {
            host: config.gateway.host.clone(),
            port: config.gateway.port,
        }
    }
}

/// All gateway routes over `state`.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(handlers::get_health))
        .route("/v1/messages", post(handlers::post_message))
        .route("/v1/messages/{id}/requeue", post(handlers::post_requeue))
        .route("/v1/inbound", post(handlers::post_inbound))
        .route("/v1/receipts", post(handlers::post_receipt))
        .route("/v1/queue/stats", get(handlers::get_queue_stats))
        .route("/v1/queue/process", post(handlers::post_process_queue))
        .route("/v1/queue/retry-failed", post(handlers::post_retry_failed))
        .route("/v1/provider/status", get(handlers::get_provider_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind `config.host:config.port` and serve until `cancel` fires.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), DesklineError> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| DesklineError::Provider {
            message: format!("failed to bind gateway to {addr}: {e}"),
            source: Some(Box::new(e)),
        })?;

    tracing::info!("gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| DesklineError::Internal(format!("gateway server error: {e}")))?;

    tracing::info!("gateway stopped");
    Ok(())
}
