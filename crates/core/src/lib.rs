//! Domain models and pure logic for the attendance sync engine.

pub mod config;
pub mod decision;
pub mod error;
pub mod identify;
pub mod models;
pub mod scheduler;
pub mod value;

pub use error::{CoreError, Result};
pub use models::{AttendanceEvent, BiometricRecord, EventType, Sector};
