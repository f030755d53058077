//! Bridge transport. Talks to the WhatsApp Web bridge process.
//!
//! The bridge hosts the browser session. Commands go over HTTP, lifecycle
//! and inbound messages arrive over a WebSocket:
//!
//! | Call              | Route                  |
//! |-------------------|------------------------|
//! | start session     | `POST /session/start`  |
//! | stop session      | `POST /session/stop`   |
//! | session state     | `GET  /session/state`  |
//! | send text         | `POST /messages`       |
//! | list chats        | `GET  /chats`          |
//!
//! Events are JSON objects tagged by `type`: `qr`, `authenticated`, `ready`,
//! `disconnected`, `auth_failure`, `message`.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use lapor_core::config::BridgeConfig;
use lapor_core::error::{LaporError, Result};
use lapor_core::traits::{EventSink, Transport, TransportEvent, TransportFactory};
use lapor_core::types::{ChatInfo, IncomingMessage};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::session::is_session_closed;

/// Wire format of bridge events.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeEvent {
    Qr {
        qr: String,
    },
    Authenticated,
    Ready,
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    AuthFailure {
        #[serde(default)]
        message: String,
    },
    Message {
        #[serde(rename = "chatId")]
        chat_id: String,
        #[serde(default)]
        from: String,
        #[serde(default)]
        body: String,
        #[serde(default)]
        timestamp: i64,
    },
    #[serde(other)]
    Unknown,
}

/// Parse one event frame. Unknown event types yield `Ok(None)`.
pub fn parse_event(text: &str) -> Result<Option<TransportEvent>> {
    let event: BridgeEvent = serde_json::from_str(text)?;
    Ok(match event {
        BridgeEvent::Qr { qr } => Some(TransportEvent::Qr(qr)),
        BridgeEvent::Authenticated => Some(TransportEvent::Authenticated),
        BridgeEvent::Ready => Some(TransportEvent::Ready),
        BridgeEvent::Disconnected { reason } => Some(TransportEvent::Disconnected(reason)),
        BridgeEvent::AuthFailure { message } => Some(TransportEvent::AuthFailure(message)),
        BridgeEvent::Message {
            chat_id,
            from,
            body,
            timestamp,
        } => Some(TransportEvent::Message(IncomingMessage {
            chat_id,
            sender_id: from,
            body,
            timestamp: DateTime::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now),
        })),
        BridgeEvent::Unknown => None,
    })
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StateResponse {
    state: String,
}

#[derive(Debug, Deserialize)]
struct BridgeChat {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "isGroup", default)]
    is_group: bool,
}

/// One browser session hosted by the bridge.
pub struct BridgeTransport {
    config: BridgeConfig,
    client: reqwest::Client,
    events: EventSink,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeTransport {
    pub fn new(config: BridgeConfig, client: reqwest::Client, events: EventSink) -> Self {
        Self {
            config,
            client,
            events,
            listener: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(map_request_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v["error"].as_str().map(String::from))
            .unwrap_or(body);
        if is_session_closed(&message) {
            Err(LaporError::SessionClosed(message))
        } else {
            Err(LaporError::Transport(format!("bridge returned {status}: {message}")))
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        self.execute(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| LaporError::Transport(format!("Invalid bridge response: {e}")))
    }

    fn stop_listener(&self) {
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn initialize(&self) -> Result<()> {
        tracing::info!(
            "Connecting session #{} to WhatsApp bridge events: {}",
            self.events.generation(),
            self.config.events_url
        );
        let (ws_stream, _response) = tokio_tungstenite::connect_async(&self.config.events_url)
            .await
            .map_err(|e| {
                LaporError::Transport(format!("Connection refused by bridge events: {e}"))
            })?;

        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let (_write, mut read) = ws_stream.split();
            let reason = loop {
                match read.next().await {
                    Some(Ok(WsMessage::Text(text))) => match parse_event(&text) {
                        Ok(Some(event)) => {
                            tracing::debug!("WhatsApp bridge event: {event:?}");
                            events.emit(event);
                        }
                        Ok(None) => tracing::trace!("Ignoring bridge event: {text}"),
                        Err(e) => tracing::warn!("Failed to parse bridge event: {e}"),
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        break format!("bridge events closed: {frame:?}");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("bridge events error: {e}"),
                    None => break "bridge events ended".to_string(),
                }
            };
            tracing::warn!("🔌 {reason}");
            events.emit(TransportEvent::Disconnected(reason));
        });
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        if let Err(e) = self.execute(self.client.post(self.url("/session/start"))).await {
            self.stop_listener();
            return Err(e);
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.stop_listener();
        self.execute(self.client.post(self.url("/session/stop")))
            .await
            .map(|_| ())
    }

    async fn send_message(&self, chat_id: &str, content: &str) -> Result<String> {
        let body = serde_json::json!({ "chatId": chat_id, "content": content });
        let sent: SentMessage = self
            .fetch(self.client.post(self.url("/messages")).json(&body))
            .await?;
        Ok(sent.id)
    }

    async fn get_state(&self) -> Result<String> {
        let state: StateResponse = self.fetch(self.client.get(self.url("/session/state"))).await?;
        Ok(state.state)
    }

    async fn list_chats(&self) -> Result<Vec<ChatInfo>> {
        let chats: Vec<BridgeChat> = self.fetch(self.client.get(self.url("/chats"))).await?;
        Ok(chats
            .into_iter()
            .map(|c| ChatInfo {
                id: c.id,
                name: c.name,
                is_group: c.is_group,
            })
            .collect())
    }
}

impl Drop for BridgeTransport {
    fn drop(&mut self) {
        self.stop_listener();
    }
}

fn map_request_error(e: reqwest::Error) -> LaporError {
    if e.is_connect() {
        LaporError::SessionClosed(format!("Connection closed: {e}"))
    } else if e.is_timeout() {
        LaporError::TransientSend(format!("Bridge request timed out: {e}"))
    } else {
        LaporError::Transport(format!("Bridge request failed: {e}"))
    }
}

/// Builds a [`BridgeTransport`] per (re)start, sharing one HTTP client.
pub struct BridgeFactory {
    config: BridgeConfig,
    client: reqwest::Client,
}

impl BridgeFactory {
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LaporError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }
}

impl TransportFactory for BridgeFactory {
    fn create(&self, events: EventSink) -> Result<Box<dyn Transport>> {
        Ok(Box::new(BridgeTransport::new(
            self.config.clone(),
            self.client.clone(),
            events,
        )))
    }
}
