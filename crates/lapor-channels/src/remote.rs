//! Remote delivery: hands messages to another instance's `/send-message`
//! endpoint instead of a local session.

use std::time::Duration;

use async_trait::async_trait;
use lapor_core::error::{ErrorKind, LaporError, Result};
use lapor_core::traits::Deliver;
use lapor_core::types::DeliveryResult;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "messageId", default)]
    message_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct RemoteDelivery {
    client: reqwest::Client,
    url: String,
    group_id: String,
}

impl RemoteDelivery {
    pub fn new(
        url: impl Into<String>,
        group_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LaporError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            group_id: group_id.into(),
        })
    }

    async fn post(&self, content: &str) -> Result<String> {
        let body = serde_json::json!({ "groupId": self.group_id, "message": content });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LaporError::Http(format!("Remote send request failed: {e}")))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status != reqwest::StatusCode::OK {
            return Err(LaporError::Http(format!("Remote send returned {status}: {text}")));
        }

        let parsed: SendResponse = serde_json::from_str(&text)
            .map_err(|e| LaporError::Http(format!("Invalid remote response: {e}")))?;
        if !parsed.success {
            return Err(LaporError::Http(
                parsed.error.unwrap_or_else(|| "remote reported failure".into()),
            ));
        }
        Ok(parsed.message_id.unwrap_or_default())
    }
}

#[async_trait]
impl Deliver for RemoteDelivery {
    fn name(&self) -> &str {
        "remote"
    }

    async fn deliver(&self, content: &str) -> DeliveryResult {
        match self.post(content).await {
            Ok(message_id) => {
                tracing::info!("✅ Message relayed to {}", self.url);
                DeliveryResult::Sent { message_id }
            }
            Err(e) => {
                tracing::error!("❌ Error sending message via {}: {e}", self.url);
                DeliveryResult::failed(ErrorKind::TransientSendFailure, true, e.to_string())
            }
        }
    }
}
