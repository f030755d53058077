//! Lapor configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LaporError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LaporConfig {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

impl LaporConfig {
    /// Load config from the default path (~/.lapor/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LaporError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| LaporError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| LaporError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Lapor home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".lapor")
    }
}

/// Expand `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn bool_true() -> bool { true }

/// The single recipient conversation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelConfig {
    /// WhatsApp chat id, e.g. `120363401616760903@g.us`.
    #[serde(default)]
    pub group_id: String,
}

/// Durable property store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `sqlite`, `file` or `memory`.
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_backend() -> String { "sqlite".into() }
fn default_store_path() -> String { "~/.lapor/properties.db".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

/// Delayed queue & dedup timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Delay between an edit and its notification.
    #[serde(default = "default_message_delay")]
    pub message_delay_secs: u64,
    /// Identical content inside this window is suppressed.
    #[serde(default = "default_dedup_cooldown")]
    pub dedup_cooldown_secs: u64,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_drain_interval")]
    pub drain_interval_secs: u64,
    /// Bounded wait on the mutual-exclusion gate.
    #[serde(default = "default_gate_wait")]
    pub gate_wait_secs: u64,
    /// 0 = retry forever.
    #[serde(default)]
    pub max_attempts: u32,
}

fn default_message_delay() -> u64 { 30 }
fn default_dedup_cooldown() -> u64 { 60 }
fn default_retry_delay() -> u64 { 300 }
fn default_drain_interval() -> u64 { 60 }
fn default_gate_wait() -> u64 { 10 }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            message_delay_secs: default_message_delay(),
            dedup_cooldown_secs: default_dedup_cooldown(),
            retry_delay_secs: default_retry_delay(),
            drain_interval_secs: default_drain_interval(),
            gate_wait_secs: default_gate_wait(),
            max_attempts: 0,
        }
    }
}

impl QueueConfig {
    pub fn message_delay(&self) -> Duration { Duration::from_secs(self.message_delay_secs) }
    pub fn dedup_cooldown(&self) -> Duration { Duration::from_secs(self.dedup_cooldown_secs) }
    pub fn retry_delay(&self) -> Duration { Duration::from_secs(self.retry_delay_secs) }
    pub fn drain_interval(&self) -> Duration { Duration::from_secs(self.drain_interval_secs) }
    pub fn gate_wait(&self) -> Duration { Duration::from_secs(self.gate_wait_secs) }
}

/// Connection state machine timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Pause between teardown and bring-up during a forced restart.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_restart_budget")]
    pub restart_budget: u32,
    /// Flat delay between failed restart attempts.
    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_ready_poll_interval")]
    pub ready_poll_interval_ms: u64,
    #[serde(default = "default_ready_poll_attempts")]
    pub ready_poll_attempts: u32,
    /// Bring the session up at startup instead of on first send.
    #[serde(default = "bool_true")]
    pub auto_start: bool,
}

fn default_settle_ms() -> u64 { 3000 }
fn default_restart_budget() -> u32 { 3 }
fn default_restart_backoff_ms() -> u64 { 5000 }
fn default_probe_interval() -> u64 { 60 }
fn default_probe_timeout() -> u64 { 10 }
fn default_ready_poll_interval() -> u64 { 1000 }
fn default_ready_poll_attempts() -> u32 { 30 }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            restart_budget: default_restart_budget(),
            restart_backoff_ms: default_restart_backoff_ms(),
            probe_interval_secs: default_probe_interval(),
            probe_timeout_secs: default_probe_timeout(),
            ready_poll_interval_ms: default_ready_poll_interval(),
            ready_poll_attempts: default_ready_poll_attempts(),
            auto_start: true,
        }
    }
}

impl SessionConfig {
    pub fn settle(&self) -> Duration { Duration::from_millis(self.settle_ms) }
    pub fn restart_backoff(&self) -> Duration { Duration::from_millis(self.restart_backoff_ms) }
    pub fn probe_interval(&self) -> Duration { Duration::from_secs(self.probe_interval_secs) }
    pub fn probe_timeout(&self) -> Duration { Duration::from_secs(self.probe_timeout_secs) }

    /// Ceiling of the readiness wait: poll interval × poll attempts.
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms) * self.ready_poll_attempts
    }
}

/// Browser-automation bridge that hosts the WhatsApp Web session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_url")]
    pub base_url: String,
    /// WebSocket endpoint streaming lifecycle events.
    #[serde(default = "default_bridge_events_url")]
    pub events_url: String,
    #[serde(default = "default_bridge_timeout")]
    pub request_timeout_secs: u64,
}

fn default_bridge_url() -> String { "http://127.0.0.1:3100".into() }
fn default_bridge_events_url() -> String { "ws://127.0.0.1:3100/events".into() }
fn default_bridge_timeout() -> u64 { 30 }

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: default_bridge_url(),
            events_url: default_bridge_events_url(),
            request_timeout_secs: default_bridge_timeout(),
        }
    }
}

/// How drained messages leave the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// `session` (in-process state machine) or `remote` (POST to another Lapor).
    #[serde(default = "default_delivery_mode")]
    pub mode: String,
    /// Full URL of a remote `/send-message` endpoint.
    #[serde(default)]
    pub remote_url: String,
}

fn default_delivery_mode() -> String { "session".into() }

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: default_delivery_mode(),
            remote_url: String::new(),
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 { 3000 }
fn default_host() -> String { "0.0.0.0".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Ledger sheet layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
    /// Rows at or above this index are headers.
    #[serde(default = "default_header_rows")]
    pub header_rows: u32,
    /// Single-cell edits only count on this column.
    #[serde(default = "default_trigger_column")]
    pub trigger_column: u32,
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,
}

fn default_sheet_name() -> String { "REKAP".into() }
fn default_header_rows() -> u32 { 2 }
fn default_trigger_column() -> u32 { 9 }
fn default_utc_offset() -> i32 { 7 }

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            sheet_name: default_sheet_name(),
            header_rows: default_header_rows(),
            trigger_column: default_trigger_column(),
            utc_offset_hours: default_utc_offset(),
        }
    }
}
