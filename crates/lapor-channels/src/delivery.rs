//! Delivery executor: sends one text to one chat through the managed session
//! and classifies every failure.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use lapor_core::error::{ErrorKind, LaporError, Result};
use lapor_core::traits::Deliver;
use lapor_core::types::{ChatInfo, DeliveryResult};
use regex::Regex;

use crate::whatsapp::{SessionManager, is_session_closed_error};

/// `<digits>@c.us` for people, `<digits>[-<digits>]@g.us` for groups.
static CHAT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+@c\.us|\d+(-\d+)?@g\.us)$").expect("chat id pattern is valid")
});

/// Shape check only; the network decides whether the chat exists.
pub fn validate_chat_id(chat_id: &str) -> Result<()> {
    if CHAT_ID.is_match(chat_id.trim()) {
        Ok(())
    } else {
        Err(LaporError::InvalidChannel(chat_id.to_string()))
    }
}

pub struct DeliveryExecutor {
    session: SessionManager,
    ready_timeout: Duration,
}

impl DeliveryExecutor {
    pub fn new(session: SessionManager) -> Self {
        let ready_timeout = session.config().ready_timeout();
        Self {
            session,
            ready_timeout,
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Send and return the network message id.
    ///
    /// A send that fails with a closed-session signature requests a forced
    /// restart and is reported as `SessionClosed`. Other send failures are
    /// reported as `TransientSend`.
    pub async fn try_send(&self, chat_id: &str, content: &str) -> Result<String> {
        validate_chat_id(chat_id)?;
        self.session.await_ready(self.ready_timeout).await?;
        let transport = self.session.transport().await?;

        match transport.send_message(chat_id.trim(), content).await {
            Ok(id) => {
                tracing::info!("✅ Message sent to {chat_id} ({id})");
                Ok(id)
            }
            Err(e) if is_session_closed_error(&e) => {
                tracing::warn!("💔 Send hit a closed session: {e}");
                self.session.request_restart(format!("send failed: {e}"));
                Err(LaporError::SessionClosed(e.to_string()))
            }
            Err(e) => {
                tracing::error!("❌ Error sending message to {chat_id}: {e}");
                Err(LaporError::TransientSend(e.to_string()))
            }
        }
    }

    /// Like [`try_send`](Self::try_send) but never fails; errors become a
    /// classified [`DeliveryResult::Failed`].
    pub async fn send(&self, chat_id: &str, content: &str) -> DeliveryResult {
        match self.try_send(chat_id, content).await {
            Ok(message_id) => DeliveryResult::Sent { message_id },
            Err(e) => {
                let kind = e.kind();
                DeliveryResult::failed(kind, is_retryable(kind), e.to_string())
            }
        }
    }

    /// Group chats visible to the session.
    pub async fn list_groups(&self) -> Result<Vec<ChatInfo>> {
        self.session.await_ready(self.ready_timeout).await?;
        let chats = self.session.transport().await?.list_chats().await?;
        Ok(chats.into_iter().filter(|c| c.is_group).collect())
    }
}

/// Readiness wait for sends made while the store gate is held: at most half
/// the gate wait.
pub fn gated_ready_timeout(ready_timeout: Duration, gate_wait: Duration) -> Duration {
    ready_timeout.min(gate_wait / 2)
}

/// Whether the caller may usefully try again later.
pub fn is_retryable(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::SessionClosed | ErrorKind::NotReady)
}

/// Delivers queue messages to one configured chat through the session.
pub struct ChannelDelivery {
    executor: Arc<DeliveryExecutor>,
    chat_id: String,
}

impl ChannelDelivery {
    pub fn new(executor: Arc<DeliveryExecutor>, chat_id: impl Into<String>) -> Self {
        Self {
            executor,
            chat_id: chat_id.into(),
        }
    }
}

#[async_trait]
impl Deliver for ChannelDelivery {
    fn name(&self) -> &str {
        "whatsapp-session"
    }

    async fn deliver(&self, content: &str) -> DeliveryResult {
        self.executor.send(&self.chat_id, content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::whatsapp::session::tests::{fake_manager, wait_for_state};
    use chrono::Utc;
    use lapor_core::config::QueueConfig;
    use lapor_core::types::{ConnectionState, UpdateKind};
    use lapor_scheduler::{DelayedQueue, Gate, MemoryStore, marker};

    const GROUP: &str = "120363025246125486@g.us";

    #[test]
    fn test_chat_id_shapes() {
        assert!(validate_chat_id(GROUP).is_ok());
        assert!(validate_chat_id("6281234567890-1609459200@g.us").is_ok());
        assert!(validate_chat_id("6281234567890@c.us").is_ok());
        assert!(validate_chat_id("").is_err());
        assert!(validate_chat_id("bendahara").is_err());
        assert!(validate_chat_id("62812@s.whatsapp.net").is_err());
        assert!(validate_chat_id("abc@g.us").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_brings_session_up() {
        let (manager, knobs) = fake_manager();
        let executor = DeliveryExecutor::new(manager);

        let result = executor.send(GROUP, "💰 *LAPORAN BENDAHARA* 💰").await;
        assert!(result.is_success());
        assert_eq!(knobs.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_channel_is_not_sent() {
        let (manager, knobs) = fake_manager();
        let executor = DeliveryExecutor::new(manager);

        let result = executor.send("not-a-chat", "hi").await;
        assert_eq!(
            result,
            DeliveryResult::failed(
                ErrorKind::InvalidChannel,
                false,
                "Invalid channel: not-a-chat"
            )
        );
        assert_eq!(knobs.created(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_session_triggers_restart() {
        let (manager, knobs) = fake_manager();
        let executor = DeliveryExecutor::new(manager.clone());
        manager.initialize().await.unwrap();
        wait_for_state(&manager, ConnectionState::Ready).await;

        *knobs.send_error.lock().unwrap() =
            Some("Protocol error (Runtime.callFunctionOn): Session closed.".into());
        let DeliveryResult::Failed {
            kind, retryable, ..
        } = executor.send(GROUP, "hi").await
        else {
            panic!("expected failure");
        };
        assert_eq!(kind, ErrorKind::SessionClosed);
        assert!(retryable);
        assert!(manager.status().is_reconnecting);

        *knobs.send_error.lock().unwrap() = None;
        wait_for_state(&manager, ConnectionState::Ready).await;
        assert!(executor.send(GROUP, "hi").await.is_success());
        assert_eq!(knobs.created(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_send_errors_are_transient() {
        let (manager, knobs) = fake_manager();
        let executor = DeliveryExecutor::new(manager.clone());
        *knobs.send_error.lock().unwrap() = Some("Evaluation failed: chat not found".into());

        let DeliveryResult::Failed {
            kind, retryable, ..
        } = executor.send(GROUP, "hi").await
        else {
            panic!("expected failure");
        };
        assert_eq!(kind, ErrorKind::TransientSendFailure);
        assert!(!retryable);
        assert_eq!(manager.state(), ConnectionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_is_reported() {
        let (manager, knobs) = fake_manager();
        knobs.hold_ready.store(true, std::sync::atomic::Ordering::SeqCst);
        let executor =
            DeliveryExecutor::new(manager).with_ready_timeout(Duration::from_secs(5));

        let DeliveryResult::Failed { kind, .. } = executor.send(GROUP, "hi").await else {
            panic!("expected failure");
        };
        assert_eq!(kind, ErrorKind::NotReady);
        assert!(knobs.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_groups_filters_direct_chats() {
        let (manager, _) = fake_manager();
        let executor = DeliveryExecutor::new(manager);
        let groups = executor.list_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, GROUP);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_delivery_targets_configured_chat() {
        let (manager, knobs) = fake_manager();
        let executor = Arc::new(DeliveryExecutor::new(manager));
        let deliver = ChannelDelivery::new(executor, GROUP);

        assert!(deliver.deliver("📊 *RINGKASAN KEUANGAN*").await.is_success());
        assert_eq!(knobs.sent.lock().unwrap()[0].0, GROUP);
    }

    #[test]
    fn test_gated_ready_timeout_stays_under_gate_wait() {
        let gate_wait = Duration::from_secs(10);
        assert_eq!(
            gated_ready_timeout(Duration::from_secs(30), gate_wait),
            Duration::from_secs(5)
        );
        assert_eq!(
            gated_ready_timeout(Duration::from_secs(2), gate_wait),
            Duration::from_secs(2)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_over_closed_session_retries_after_restart() {
        let (manager, knobs) = fake_manager();
        manager.initialize().await.unwrap();
        wait_for_state(&manager, ConnectionState::Ready).await;

        let store = Arc::new(MemoryStore::new());
        let queue = DelayedQueue::new(
            store.clone(),
            Gate::new(Duration::from_secs(10)),
            QueueConfig::default(),
        );
        let executor = Arc::new(DeliveryExecutor::new(manager.clone()));
        let deliver = ChannelDelivery::new(executor, GROUP);
        let t0 = Utc::now();
        {
            let guard = queue.gate().acquire().await.unwrap();
            queue
                .enqueue_with(
                    &guard,
                    t0,
                    "Saldo: Rp100.000",
                    Some(5),
                    UpdateKind::New,
                    Duration::ZERO,
                )
                .unwrap();
        }

        *knobs.send_error.lock().unwrap() =
            Some("Protocol error (Runtime.callFunctionOn): Session closed.".into());
        let report = queue.drain(t0, &deliver).await.unwrap();
        assert_eq!(report.rescheduled, 1);
        assert_eq!(manager.state(), ConnectionState::Reconnecting);

        let pending = queue.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempt_count, 1);
        assert_eq!(pending[0].scheduled_send_time, t0 + chrono::Duration::seconds(300));
        assert_eq!(marker::load(store.as_ref()).unwrap(), None);

        *knobs.send_error.lock().unwrap() = None;
        wait_for_state(&manager, ConnectionState::Ready).await;
        let status = manager.status();
        assert_eq!(status.attempts, 0);
        assert!(!status.is_reconnecting);

        let report = queue.drain(t0 + chrono::Duration::seconds(300), &deliver).await.unwrap();
        assert_eq!(report.sent, 1);
        assert!(queue.pending().unwrap().is_empty());
        assert_eq!(marker::load(store.as_ref()).unwrap(), Some(5));
        assert_eq!(knobs.sent.lock().unwrap().len(), 1);
    }
}
