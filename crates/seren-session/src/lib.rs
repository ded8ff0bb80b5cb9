//! Session lifecycle for Seren.
//!
//! [`SessionStore`] keeps live sessions in an LRU cache behind one coarse
//! lock, rejects concurrent turns on the same session, and rebuilds
//! evicted or restarted sessions from a pluggable [`PersistenceSink`].
//!
//! Handles returned by the store share the session's history and tool
//! registry with the orchestrator; eviction drops the store's reference
//! only, never a turn in flight.

pub mod error;
pub mod persist;
pub mod store;

pub use error::{Error, Result};
pub use persist::{NoPersistence, PersistenceSink, SharedPersistence, SinkAdapter};
pub use store::{DEFAULT_MAX_SESSIONS, SessionHandle, SessionStore, StoreConfig};
