//! Persistence for agentweave: storage backends and the sync layer.
//!
//! Backends implement [`agentweave_core::AgentStore`]. [`MessageSync`] sits in
//! front of a backend and is the only component the conversation writes
//! through.

pub mod in_memory;
pub mod sync;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use sync::{MessageSync, SyncEvent, DEFAULT_DEBOUNCE};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
