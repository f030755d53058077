//! Data model of the delivery pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

/// Why a message was produced. Only `New` advances the row watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    New,
    Update,
    Error,
    Other,
}

impl std::fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateKind::New => write!(f, "new"),
            UpdateKind::Update => write!(f, "update"),
            UpdateKind::Error => write!(f, "error"),
            UpdateKind::Other => write!(f, "other"),
        }
    }
}

/// An outbound message waiting in the delayed queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub id: Uuid,
    pub content: String,
    /// Ledger row this message describes, if any.
    pub target_row: Option<u32>,
    pub update_kind: UpdateKind,
    /// Not sent before this instant. Only ever moves forward.
    pub scheduled_send_time: DateTime<Utc>,
    #[serde(default)]
    pub attempt_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingMessage {
    pub fn new(
        content: impl Into<String>,
        target_row: Option<u32>,
        update_kind: UpdateKind,
        scheduled_send_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            target_row,
            update_kind,
            scheduled_send_time,
            attempt_count: 0,
            enqueued_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.scheduled_send_time
    }
}

/// Lifecycle of the chat session. In memory only; every process starts `Uninitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Uninitialized,
    Initializing,
    Authenticating,
    Ready,
    Disconnected,
    Reconnecting,
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Initializing => "initializing",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Ready => "ready",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Operator-facing snapshot of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub is_reconnecting: bool,
    /// Consecutive failed restart attempts since the last `Ready`.
    pub attempts: u32,
    /// Pending pairing challenge, if the session is waiting for a scan.
    pub qr: Option<String>,
    pub last_error: Option<String>,
}

/// A conversation known to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_group: bool,
}

/// Inbound chat message seen by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub chat_id: String,
    pub sender_id: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryResult {
    Sent {
        message_id: String,
    },
    Failed {
        kind: ErrorKind,
        /// Whether retrying soon is expected to help.
        retryable: bool,
        reason: String,
    },
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryResult::Sent { .. })
    }

    pub fn failed(kind: ErrorKind, retryable: bool, reason: impl Into<String>) -> Self {
        DeliveryResult::Failed {
            kind,
            retryable,
            reason: reason.into(),
        }
    }
}
