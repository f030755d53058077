//! Error taxonomy shared by every Lapor crate.

use serde::{Deserialize, Serialize};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LaporError>;

/// All errors raised by the notification pipeline.
#[derive(Debug, thiserror::Error)]
pub enum LaporError {
    /// Network or session hiccup while sending. Rescheduled by the queue.
    #[error("Transient send failure: {0}")]
    TransientSend(String),

    /// The underlying session is gone. Triggers a forced restart.
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// Readiness gate timed out.
    #[error("Session not ready: {0}")]
    NotReady(String),

    /// Restart budget used up; needs an operator.
    #[error("Restart budget exhausted after {0} attempts")]
    RestartExhausted(u32),

    /// Destination does not look like a chat id.
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    /// Mutual-exclusion gate could not be acquired within its bounded wait.
    #[error("Gate busy: {0}")]
    GateBusy(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Report error: {0}")]
    Report(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Serializable classification of delivery failures, surfaced to API callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientSendFailure,
    SessionClosed,
    NotReady,
    RestartExhausted,
    InvalidChannel,
    Internal,
}

impl LaporError {
    /// Map an error onto the delivery taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LaporError::TransientSend(_) | LaporError::Transport(_) | LaporError::Http(_) => {
                ErrorKind::TransientSendFailure
            }
            LaporError::SessionClosed(_) => ErrorKind::SessionClosed,
            LaporError::NotReady(_) => ErrorKind::NotReady,
            LaporError::RestartExhausted(_) => ErrorKind::RestartExhausted,
            LaporError::InvalidChannel(_) => ErrorKind::InvalidChannel,
            _ => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            LaporError::SessionClosed("x".into()).kind(),
            ErrorKind::SessionClosed
        );
        assert_eq!(
            LaporError::Transport("x".into()).kind(),
            ErrorKind::TransientSendFailure
        );
        assert_eq!(LaporError::Store("x".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RestartExhausted).unwrap();
        assert_eq!(json, "\"restart_exhausted\"");
    }
}
