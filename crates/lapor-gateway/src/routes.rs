//! API route handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use lapor_core::error::ErrorKind;
use lapor_core::types::DeliveryResult;
use lapor_report::{EditEvent, LedgerRow};
use serde::Deserialize;
use uuid::Uuid;

use crate::server::AppState;

type Reply = (StatusCode, Json<serde_json::Value>);

fn internal_error(e: impl std::fmt::Display) -> Reply {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "ok": false, "error": e.to_string() })),
    )
}

/// HTTP status for a failed send.
fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidChannel => StatusCode::BAD_REQUEST,
        ErrorKind::NotReady | ErrorKind::SessionClosed | ErrorKind::RestartExhausted => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorKind::TransientSendFailure | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "lapor-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(rename = "groupId", default)]
    pub group_id: String,
    #[serde(default)]
    pub message: String,
}

/// `POST /send-message`: `{groupId, message}` → `{success, messageId}`.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendMessageRequest>,
) -> Reply {
    if req.group_id.trim().is_empty() || req.message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "error": "Group ID and message are required",
            })),
        );
    }

    match state.executor.send(&req.group_id, &req.message).await {
        DeliveryResult::Sent { message_id } => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "messageId": message_id })),
        ),
        DeliveryResult::Failed {
            kind,
            retryable,
            reason,
        } => (
            status_for(kind),
            Json(serde_json::json!({
                "success": false,
                "error": reason,
                "kind": kind,
                "retryable": retryable,
            })),
        ),
    }
}

/// `GET /get-groups`: `{success, groups: [{id, name}]}`.
pub async fn get_groups(State(state): State<Arc<AppState>>) -> Reply {
    match state.executor.list_groups().await {
        Ok(groups) => {
            let groups: Vec<_> = groups
                .into_iter()
                .map(|g| serde_json::json!({ "id": g.id, "name": g.name }))
                .collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "success": true, "groups": groups })),
            )
        }
        Err(e) => (
            status_for(e.kind()),
            Json(serde_json::json!({ "success": false, "error": e.to_string() })),
        ),
    }
}

/// Session, queue and process status.
pub async fn status(State(state): State<Arc<AppState>>) -> Reply {
    let session = state.executor.session();
    let pending = match state.queue.pending() {
        Ok(pending) => pending,
        Err(e) => return internal_error(e),
    };
    let next_due = pending.iter().map(|m| m.scheduled_send_time).min();

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "ok": true,
            "session": session.status(),
            "messages_received": session.messages_received(),
            "queue": {
                "pending": pending.len(),
                "next_due": next_due,
            },
            "delivery": state.deliver.name(),
            "uptime_secs": state.start_time.elapsed().as_secs(),
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// Operator override: restart the session even from Failed.
pub async fn restart_session(State(state): State<Arc<AppState>>) -> Reply {
    let session = state.executor.session().clone();
    tokio::spawn(async move {
        if let Err(e) = session.force_restart("operator request").await {
            tracing::error!("❌ Operator restart failed: {e}");
        }
    });
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "ok": true, "message": "Restart scheduled" })),
    )
}

/// A ledger sheet edit.
pub async fn edit_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<EditEvent>,
) -> Reply {
    match state.producer.on_edit(&event).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({ "ok": true, "result": outcome })),
        ),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SummaryRequest {
    #[serde(default)]
    pub rows: Vec<LedgerRow>,
}

pub async fn send_summary(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SummaryRequest>,
) -> Reply {
    match state.producer.summary(&req.rows).await {
        Ok(message) => (
            StatusCode::OK,
            Json(serde_json::json!({ "ok": true, "id": message.id })),
        ),
        Err(e) => internal_error(e),
    }
}

pub async fn send_test(State(state): State<Arc<AppState>>) -> Reply {
    match state.producer.send_test().await {
        Ok(message) => (
            StatusCode::OK,
            Json(serde_json::json!({ "ok": true, "id": message.id })),
        ),
        Err(e) => internal_error(e),
    }
}

pub async fn list_queue(State(state): State<Arc<AppState>>) -> Reply {
    match state.queue.pending() {
        Ok(pending) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "ok": true,
                "total": pending.len(),
                "pending": pending,
            })),
        ),
        Err(e) => internal_error(e),
    }
}

pub async fn discard_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Reply {
    match state.queue.discard(id).await {
        Ok(true) => (StatusCode::OK, Json(serde_json::json!({ "ok": true }))),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "ok": false, "error": "Message not found" })),
        ),
        Err(e) => internal_error(e),
    }
}

/// Drop every pending message and the dedup cache.
pub async fn reset_queue(State(state): State<Arc<AppState>>) -> Reply {
    match state.queue.clear().await {
        Ok(cleared) => (
            StatusCode::OK,
            Json(serde_json::json!({ "ok": true, "cleared": cleared })),
        ),
        Err(e) => internal_error(e),
    }
}

/// Run one drain cycle now instead of waiting for the tick.
pub async fn drain_queue(State(state): State<Arc<AppState>>) -> Reply {
    match state.queue.drain(Utc::now(), state.deliver.as_ref()).await {
        Ok(report) => (
            StatusCode::OK,
            Json(serde_json::json!({ "ok": true, "report": report })),
        ),
        Err(e) => internal_error(e),
    }
}
