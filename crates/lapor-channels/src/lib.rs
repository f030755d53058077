//! # Lapor Channels
//! Outbound delivery over a self-healing WhatsApp Web session.
//!
//! - [`whatsapp::SessionManager`]: connection state machine, forced restarts, health probe
//! - [`DeliveryExecutor`]: readiness gate + send + failure classification
//! - [`ChannelDelivery`] / [`RemoteDelivery`]: queue-facing `Deliver` implementations

pub mod delivery;
pub mod remote;
pub mod whatsapp;

pub use delivery::{ChannelDelivery, DeliveryExecutor, gated_ready_timeout, validate_chat_id};
pub use remote::RemoteDelivery;
