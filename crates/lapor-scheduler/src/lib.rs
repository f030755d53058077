//! # Lapor Scheduler
//!
//! Delayed queue & deduplication engine.
//!
//! ## Architecture
//! ```text
//! producer ──enqueue──▶ DelayedQueue (snapshot in PropertyStore, under Gate)
//!                            │
//! drain tick (60s) ──drain──▶ for each due message
//!                            ├── duplicate of last send? → drop silently
//!                            ├── Deliver::deliver
//!                            │     ├── Sent   → advance marker (New), update dedup cache
//!                            │     └── Failed → now + retry_delay, attempt_count += 1
//!                            └── persist remaining (delete key if empty)
//! ```

pub mod dedup;
pub mod engine;
pub mod gate;
pub mod marker;
pub mod persistence;
pub mod queue;
pub mod store;

pub use dedup::DedupCache;
pub use engine::{spawn_drain_loop, tick};
pub use gate::{Gate, GateGuard};
pub use persistence::SqliteStore;
pub use queue::{DelayedQueue, DrainReport};
pub use store::{FileStore, MemoryStore, open_store};
