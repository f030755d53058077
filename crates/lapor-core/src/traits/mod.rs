//! Traits at the collaborator seams.

pub mod delivery;
pub mod store;
pub mod transport;

pub use delivery::Deliver;
pub use store::PropertyStore;
pub use transport::{EventSink, Transport, TransportEvent, TransportFactory};
