//! Chat transport contract: the long-lived session the state machine babysits.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{ChatInfo, IncomingMessage};

/// Lifecycle and message events raised by a transport instance.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Pairing challenge that must be scanned by the operator.
    Qr(String),
    Authenticated,
    Ready,
    Disconnected(String),
    AuthFailure(String),
    Message(IncomingMessage),
}

/// Sending half handed to each transport instance.
///
/// Events are tagged with the generation of the instance that produced them,
/// so the dispatch loop can drop events from sessions that were torn down.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Emit an event. Returns false once the dispatch loop has gone away.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

/// One live session with the chat network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the session. Lifecycle progress is reported through the event sink.
    async fn initialize(&self) -> Result<()>;

    /// Tear the session down and release its resources.
    async fn destroy(&self) -> Result<()>;

    /// Send a text message, returning the network's message id.
    async fn send_message(&self, chat_id: &str, content: &str) -> Result<String>;

    /// Cheap status query used by the health probe.
    async fn get_state(&self) -> Result<String>;

    async fn list_chats(&self) -> Result<Vec<ChatInfo>>;
}

/// Builds fresh transport instances for (re)starts.
pub trait TransportFactory: Send + Sync {
    fn create(&self, events: EventSink) -> Result<Box<dyn Transport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_sink_tags_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(7, tx);
        assert!(sink.emit(TransportEvent::Ready));
        let (generation, event) = rx.try_recv().unwrap();
        assert_eq!(generation, 7);
        assert!(matches!(event, TransportEvent::Ready));
    }

    #[test]
    fn test_event_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(1, tx);
        drop(rx);
        assert!(!sink.emit(TransportEvent::Authenticated));
    }
}
