//! Clock-event intake: decides entry/exit, applies the duplicate and
//! minimum-gap guards, persists locally, and kicks a background sync.

use log::{info, warn};
use std::sync::Arc;

use ponto_core::decision::{
    decide_next_type, has_recent_duplicate, minimum_gap_violation, DUPLICATE_WINDOW_SECS,
};
use ponto_core::models::{AttendanceEvent, EventType};

use crate::engine::SyncEngine;
use crate::error::Result;

/// Result of a clock attempt. Refusals are business outcomes, not errors;
/// the kiosk shows them to the person at the device.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RecordOutcome {
    Recorded { event: AttendanceEvent },
    DuplicateSuppressed,
    ExitRefused { minutes_since_entry: f64 },
    PersonInactive { status: String },
}

/// Roster status labels that block clocking. Unknown labels do not block;
/// the roster mirror may lag the remote.
fn is_blocked_status(status: &str) -> bool {
    let normalized = status.trim().to_lowercase();
    matches!(
        normalized.as_str(),
        "inativo" | "inactive" | "bloqueado" | "suspenso" | "desligado" | "0" | "false" | "nao" | "não"
    )
}

impl SyncEngine {
    /// Records a clock event for an identified person. The event is durable
    /// locally before any network activity; the triggered sync runs in the
    /// background and never blocks the caller.
    pub async fn record_event(
        self: &Arc<Self>,
        person_id: &str,
        person_name: &str,
        location: &str,
        sector_id: Option<i64>,
    ) -> Result<RecordOutcome> {
        if let Some(status) = self.roster.person_status(person_id)? {
            if is_blocked_status(&status) {
                info!(
                    "[Sync] Refusing clock for {}: roster status '{}'",
                    person_id, status
                );
                return Ok(RecordOutcome::PersonInactive { status });
            }
        }

        if has_recent_duplicate(&self.attendance, person_id, DUPLICATE_WINDOW_SECS) {
            info!("[Sync] Suppressing duplicate clock for {}", person_id);
            return Ok(RecordOutcome::DuplicateSuppressed);
        }

        let event_type = decide_next_type(&self.attendance, person_id, self.tolerance);
        if event_type == EventType::Exit {
            if let Some(minutes) = minimum_gap_violation(&self.attendance, person_id) {
                info!(
                    "[Sync] Refusing exit for {}: only {:.1} minutes since entry",
                    person_id, minutes
                );
                return Ok(RecordOutcome::ExitRefused {
                    minutes_since_entry: minutes,
                });
            }
        }

        let event = AttendanceEvent::new(
            person_id,
            person_name,
            event_type,
            location,
            self.settings.site_id.clone(),
            sector_id,
        );
        self.attendance.save(&event)?;
        info!(
            "[Sync] Recorded {} for {} ({})",
            event.event_type, person_id, event.id
        );

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = engine.sync_now().await {
                warn!("[Sync] Post-record sync failed: {}", err);
            }
        });

        Ok(RecordOutcome::Recorded { event })
    }
}
