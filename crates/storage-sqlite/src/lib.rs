//! SQLite persistence for the attendance sync engine.
//!
//! Access discipline is connection-per-operation: every repository call
//! opens the database file, runs inside its own transaction where needed,
//! and closes. Contention serializes at SQLite's own lock.

pub mod attendance;
pub mod biometrics;
pub mod credentials;
pub mod db;
pub mod errors;
pub mod roster;
pub mod sectors;

pub use attendance::AttendanceRepository;
pub use biometrics::BiometricRepository;
pub use credentials::CredentialRepository;
pub use errors::{Result, StorageError};
pub use roster::{RosterRepository, RosterUpsertStats};
pub use sectors::SectorRepository;
