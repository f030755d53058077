//! WhatsApp Web session: state machine, manager and bridge transport.

pub mod bridge;
pub mod session;
pub mod state;

pub use bridge::{BridgeFactory, BridgeTransport};
pub use session::{ProbeOutcome, SessionManager, is_session_closed, is_session_closed_error};
pub use state::{Effect, SessionEvent, transition};
