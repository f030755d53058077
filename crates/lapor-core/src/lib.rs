//! # Lapor Core
//!
//! Shared building blocks for the notification pipeline:
//! configuration, the error taxonomy, the data model of the delayed queue
//! and connection state, and the traits at every collaborator seam
//! (property store, chat transport, delivery).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::LaporConfig;
pub use error::{ErrorKind, LaporError, Result};
