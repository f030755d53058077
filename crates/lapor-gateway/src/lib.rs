//! # Lapor Gateway
//! HTTP surface over the queue, the report producer and the WhatsApp session.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
