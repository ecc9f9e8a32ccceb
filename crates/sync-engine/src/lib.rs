//! Offline-first sync orchestrator for attendance kiosks.
//!
//! Ties the local SQLite store to the remote replicated SQL service: clock
//! events and biometric enrollments are durable locally first, then a
//! background loop pushes them upstream, seeds fresh installs, and keeps
//! the roster and sector caches warm.

mod engine;
mod error;
mod recorder;
#[cfg(test)]
mod testsupport;

pub use engine::{SyncEngine, SyncOutcome, SyncStatus};
pub use error::{Result, SyncEngineError};
pub use recorder::RecordOutcome;
