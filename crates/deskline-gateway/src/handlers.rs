// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request handlers.
//!
//! Payloads use camelCase to match the normalized inbound event shape.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use deskline_core::{
    AgentId, ConnectionStatus, DeliveryState, InboundEvent, MediaRef, MessageId, ProcessSummary,
    QueueStats, TicketId,
};
use deskline_pipeline::{EnqueueRequest, InboundOutcome};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::server::GatewayState;

const DEFAULT_RETRY_HOURS: u32 = 1;

/// Body of `POST /v1/messages`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub ticket_id: TicketId,
    #[serde(default)]
    pub body: String,
    /// Omitted for system messages.
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message_id: MessageId,
    pub status: DeliveryState,
    pub ticket_id: TicketId,
    pub ticket_number: String,
}

/// POST /v1/messages
pub async fn post_message(
    State(state): State<GatewayState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendMessageResponse>), ApiError> {
    let media = request
        .media_url
        .filter(|url| !url.trim().is_empty())
        .map(|url| MediaRef {
            url,
            mime: request.mime_type,
        });
    let queued = state
        .pipeline
        .queue
        .enqueue(EnqueueRequest {
            ticket_id: request.ticket_id,
            author_id: request.agent_id,
            body: request.body,
            media,
        })
        .await?;

    if state.process_after_enqueue {
        let queue = state.pipeline.queue.clone();
        let batch = state.process_batch_size;
        let cancel = state.shutdown.clone();
        tokio::spawn(async move {
            match queue.process_pending(batch, &cancel).await {
                Ok(summary) => debug!(?summary, "post-enqueue queue pass"),
                Err(e) => warn!(error = %e, "post-enqueue queue pass failed"),
            }
        });
    }

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            message_id: queued.message_id,
            status: queued.state,
            ticket_id: queued.ticket_id,
            ticket_number: queued.ticket_number,
        }),
    ))
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InboundResponse {
    Accepted {
        message_id: MessageId,
        ticket_id: TicketId,
        ticket_created: bool,
    },
    Duplicate,
    Ignored {
        reason: String,
    },
}

/// POST /v1/inbound
pub async fn post_inbound(
    State(state): State<GatewayState>,
    Json(event): Json<InboundEvent>,
) -> Result<Json<InboundResponse>, ApiError> {
    let response = match state.pipeline.inbound.handle(event).await? {
        InboundOutcome::Accepted {
            message_id,
            ticket_id,
            ticket_created,
        } => InboundResponse::Accepted {
            message_id,
            ticket_id,
            ticket_created,
        },
        InboundOutcome::Duplicate => InboundResponse::Duplicate,
        InboundOutcome::Ignored(reason) => InboundResponse::Ignored {
            reason: format!("{reason:?}").to_lowercase(),
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRequest {
    pub provider_message_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptResponse {
    pub message_id: Option<MessageId>,
    pub delivered: bool,
}

/// POST /v1/receipts
pub async fn post_receipt(
    State(state): State<GatewayState>,
    Json(receipt): Json<ReceiptRequest>,
) -> Result<Json<ReceiptResponse>, ApiError> {
    let message_id = state
        .pipeline
        .queue
        .mark_delivered(&receipt.provider_message_id)
        .await?;
    Ok(Json(ReceiptResponse {
        message_id,
        delivered: message_id.is_some(),
    }))
}

/// GET /v1/queue/stats
pub async fn get_queue_stats(State(state): State<GatewayState>) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.pipeline.queue.queue_stats().await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessParams {
    pub batch_size: Option<u32>,
}

/// POST /v1/queue/process
pub async fn post_process_queue(
    State(state): State<GatewayState>,
    Query(params): Query<ProcessParams>,
) -> Result<Json<ProcessSummary>, ApiError> {
    let batch = params.batch_size.filter(|b| *b > 0).unwrap_or(state.default_batch_size);
    let summary = state
        .pipeline
        .queue
        .process_pending(batch, &state.shutdown)
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Default, Deserialize)]
pub struct RetryParams {
    pub hours: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryResponse {
    pub reset_count: u64,
}

/// POST /v1/queue/retry-failed
pub async fn post_retry_failed(
    State(state): State<GatewayState>,
    Query(params): Query<RetryParams>,
) -> Result<Json<RetryResponse>, ApiError> {
    let hours = params.hours.unwrap_or(DEFAULT_RETRY_HOURS);
    let reset_count = state.pipeline.queue.retry_failed(hours).await?;
    Ok(Json(RetryResponse { reset_count }))
}

#[derive(Debug, Serialize)]
pub struct RequeueResponse {
    pub requeued: bool,
}

/// POST /v1/messages/{id}/requeue
pub async fn post_requeue(
    State(state): State<GatewayState>,
    Path(id): Path<i64>,
) -> Result<Json<RequeueResponse>, ApiError> {
    let requeued = state.pipeline.queue.requeue(MessageId(id)).await?;
    Ok(Json(RequeueResponse { requeued }))
}

#[derive(Debug, Serialize)]
pub struct ProviderStatusResponse {
    pub provider: String,
    #[serde(flatten)]
    pub status: ConnectionStatus,
}

/// GET /v1/provider/status
pub async fn get_provider_status(State(state): State<GatewayState>) -> Json<ProviderStatusResponse> {
    let driver = state.pipeline.queue.driver();
    Json(ProviderStatusResponse {
        provider: driver.name().to_string(),
        status: driver.connection_status().await,
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}
