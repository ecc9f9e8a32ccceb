//! Background sync orchestrator.
//!
//! One cycle: connectivity probe, first-install download when the local
//! store has never synced, then per-row upload of pending events and
//! biometrics. Consecutive probe failures open a circuit; while open, each
//! cycle only probes, and a successful probe closes it again.

use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use ponto_core::config::SyncSettings;
use ponto_core::decision::ToleranceWindow;
use ponto_core::models::{default_sectors, now_local_string, Sector};
use ponto_core::scheduler::{
    backoff_millis, DIAGNOSTICS_TIMEOUT_SECS, FULL_DOWNLOAD_TIMEOUT_SECS, SECTOR_FETCH_TIMEOUT_SECS,
    SYNC_FAILURE_CEILING, SYNC_MIN_INTERVAL_SECS, SYNC_PENDING_BATCH_LIMIT,
};
use ponto_remote_db::{
    fetch_all_biometrics, fetch_roster, fetch_sectors, run_diagnostics, RemoteDbClient,
    RemoteDbError, SchemaAdaptiveWriter,
};
use ponto_storage_sqlite::{
    db, AttendanceRepository, BiometricRepository, RosterRepository, SectorRepository,
};

use crate::error::Result;

/// What one sync cycle did, or why it was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed {
        events_pushed: usize,
        biometrics_pushed: usize,
    },
    /// Unforced cycle inside the minimum interval since the last attempt.
    SkippedInterval,
    /// Unforced cycle before the recorded retry deadline.
    SkippedBackoff,
    RemoteUnreachable {
        consecutive_failures: u32,
    },
    /// Failure ceiling reached; the cycle only probed.
    CircuitOpen,
}

/// Point-in-time snapshot served to the host application.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncStatus {
    pub is_running: bool,
    pub last_sync_time: Option<String>,
    pub pending_events: i64,
    pub pending_biometrics: i64,
    pub consecutive_failures: u32,
    pub is_healthy: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct EngineState {
    running: bool,
    last_sync_time: Option<String>,
    last_attempt: Option<Instant>,
    consecutive_failures: u32,
    next_retry_at: Option<Instant>,
    roster_refreshed_at: Option<Instant>,
    last_error: Option<String>,
}

pub struct SyncEngine {
    pub(crate) settings: SyncSettings,
    pub(crate) tolerance: ToleranceWindow,
    writer: SchemaAdaptiveWriter,
    pub(crate) attendance: AttendanceRepository,
    biometrics: BiometricRepository,
    sectors: SectorRepository,
    pub(crate) roster: RosterRepository,
    state: Mutex<EngineState>,
    /// Serializes cycles between the background loop and sync-now callers.
    cycle_lock: Mutex<()>,
}

impl SyncEngine {
    /// Opens (and migrates) the local store and prepares the remote client.
    /// Nothing touches the network until the first cycle runs.
    pub fn new(settings: SyncSettings, db_path: impl Into<PathBuf>) -> Result<Self> {
        settings.validate()?;
        let db_path = db_path.into();
        db::initialize(&db_path)?;
        let client = RemoteDbClient::new(&settings)?;
        Ok(SyncEngine {
            settings,
            tolerance: ToleranceWindow::default(),
            writer: SchemaAdaptiveWriter::new(client),
            attendance: AttendanceRepository::new(&db_path),
            biometrics: BiometricRepository::new(&db_path),
            sectors: SectorRepository::new(&db_path),
            roster: RosterRepository::new(&db_path),
            state: Mutex::new(EngineState::default()),
            cycle_lock: Mutex::new(()),
        })
    }

    pub fn attendance(&self) -> &AttendanceRepository {
        &self.attendance
    }

    pub fn biometrics(&self) -> &BiometricRepository {
        &self.biometrics
    }

    fn client(&self) -> &RemoteDbClient {
        self.writer.client()
    }

    /// Spawns the periodic loop: an immediate first cycle, then one wake per
    /// minimum interval. Stopping takes effect at the next wake; abort the
    /// handle for immediate teardown.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            {
                let mut state = engine.state.lock().await;
                if state.running {
                    warn!("[Sync] Background loop already running");
                    return;
                }
                state.running = true;
            }
            info!("[Sync] Background sync loop started");
            let mut force = true;
            loop {
                match engine.run_cycle(force).await {
                    Ok(outcome) => debug!("[Sync] Cycle outcome: {:?}", outcome),
                    Err(err) => warn!("[Sync] Cycle failed: {}", err),
                }
                force = false;
                sleep(Duration::from_secs(SYNC_MIN_INTERVAL_SECS)).await;
                if !engine.state.lock().await.running {
                    break;
                }
            }
            info!("[Sync] Background sync loop stopped");
        })
    }

    pub async fn stop(&self) {
        self.state.lock().await.running = false;
    }

    /// Runs a cycle right away, bypassing the interval and backoff gates.
    /// The failure circuit still applies.
    pub async fn sync_now(&self) -> Result<SyncOutcome> {
        self.run_cycle(true).await
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        let pending_events = self.attendance.count_pending()?;
        let pending_biometrics = self.biometrics.count_unsynced()?;
        let state = self.state.lock().await;
        Ok(SyncStatus {
            is_running: state.running,
            last_sync_time: state.last_sync_time.clone(),
            pending_events,
            pending_biometrics,
            consecutive_failures: state.consecutive_failures,
            is_healthy: state.consecutive_failures < SYNC_FAILURE_CEILING,
            last_error: state.last_error.clone(),
        })
    }

    pub(crate) async fn run_cycle(&self, force: bool) -> Result<SyncOutcome> {
        let _cycle = self.cycle_lock.lock().await;

        {
            let mut state = self.state.lock().await;
            if !force {
                if let Some(deadline) = state.next_retry_at {
                    if Instant::now() < deadline {
                        return Ok(SyncOutcome::SkippedBackoff);
                    }
                }
                if let Some(last) = state.last_attempt {
                    if last.elapsed() < Duration::from_secs(SYNC_MIN_INTERVAL_SECS) {
                        return Ok(SyncOutcome::SkippedInterval);
                    }
                }
            }
            state.last_attempt = Some(Instant::now());
        }

        if !self.client().test_connection().await {
            return Ok(self.note_probe_failure().await);
        }
        {
            let mut state = self.state.lock().await;
            if state.consecutive_failures > 0 {
                info!(
                    "[Sync] Remote reachable again after {} failed cycles",
                    state.consecutive_failures
                );
            }
            state.consecutive_failures = 0;
            state.next_retry_at = None;
            state.last_error = None;
        }

        if self.biometrics.is_first_install()? {
            self.first_install_pass().await;
        }

        let events_pushed = self.push_pending_events().await?;
        let biometrics_pushed = self.push_pending_biometrics().await?;
        self.maybe_refresh_roster().await;

        {
            let mut state = self.state.lock().await;
            state.last_sync_time = Some(now_local_string());
        }
        if events_pushed > 0 || biometrics_pushed > 0 {
            info!(
                "[Sync] Cycle complete: {} events, {} biometrics pushed",
                events_pushed, biometrics_pushed
            );
        }
        Ok(SyncOutcome::Completed {
            events_pushed,
            biometrics_pushed,
        })
    }

    async fn note_probe_failure(&self) -> SyncOutcome {
        let mut state = self.state.lock().await;
        if state.consecutive_failures < SYNC_FAILURE_CEILING {
            state.consecutive_failures += 1;
        }
        let failures = state.consecutive_failures;
        state.last_error = Some("connectivity probe failed".to_string());
        state.next_retry_at = Some(Instant::now() + Duration::from_millis(backoff_millis(failures)));
        if failures >= SYNC_FAILURE_CEILING {
            warn!(
                "[Sync] Remote unreachable for {} consecutive cycles; probing only until it recovers",
                failures
            );
            SyncOutcome::CircuitOpen
        } else {
            warn!(
                "[Sync] Remote unreachable ({}/{}); backing off {}ms",
                failures,
                SYNC_FAILURE_CEILING,
                backoff_millis(failures)
            );
            SyncOutcome::RemoteUnreachable {
                consecutive_failures: failures,
            }
        }
    }

    /// Seeds a fresh install from the remote: diagnostics for support logs,
    /// then the biometric and roster downloads. Every step degrades to a
    /// warning; the next cycle tries again while the store stays empty.
    async fn first_install_pass(&self) {
        info!("[Sync] First install detected; downloading remote data");

        match timeout(
            Duration::from_secs(DIAGNOSTICS_TIMEOUT_SECS),
            run_diagnostics(self.client()),
        )
        .await
        {
            Ok(Ok(report)) => info!(
                "[Sync] Remote diagnostics: {} tables, {} counted",
                report.tables.len(),
                report.counts.len()
            ),
            Ok(Err(err)) => warn!("[Sync] Remote diagnostics failed: {}", err),
            Err(_) => warn!("[Sync] Remote diagnostics timed out"),
        }

        match timeout(
            Duration::from_secs(FULL_DOWNLOAD_TIMEOUT_SECS),
            fetch_all_biometrics(self.client()),
        )
        .await
        {
            Ok(Ok(records)) if records.is_empty() => {
                info!("[Sync] Remote has no biometric records to seed from");
            }
            Ok(Ok(records)) => match self.biometrics.bulk_upsert_synced(&records) {
                Ok(stored) => info!("[Sync] Seeded {} biometric records", stored),
                Err(err) => warn!("[Sync] Storing downloaded biometrics failed: {}", err),
            },
            Ok(Err(err)) => warn!("[Sync] Biometric download failed: {}", err),
            Err(_) => warn!("[Sync] Biometric download timed out; retrying next cycle"),
        }

        self.download_roster().await;
    }

    async fn download_roster(&self) {
        match timeout(
            Duration::from_secs(FULL_DOWNLOAD_TIMEOUT_SECS),
            fetch_roster(self.client()),
        )
        .await
        {
            Ok(Ok((columns, rows))) if !columns.is_empty() => {
                match self.roster.bulk_upsert(&columns, &rows) {
                    Ok(_stats) => {
                        self.state.lock().await.roster_refreshed_at = Some(Instant::now());
                    }
                    Err(err) => warn!("[Sync] Roster upsert failed: {}", err),
                }
            }
            Ok(Ok(_)) => warn!("[Sync] Roster download returned no columns"),
            Ok(Err(err)) => warn!("[Sync] Roster download failed: {}", err),
            Err(_) => warn!("[Sync] Roster download timed out"),
        }
    }

    async fn maybe_refresh_roster(&self) {
        let minutes = self.settings.roster_refresh_minutes;
        if minutes == 0 {
            return;
        }
        let due = {
            let state = self.state.lock().await;
            match state.roster_refreshed_at {
                Some(at) => at.elapsed() >= Duration::from_secs(minutes * 60),
                None => true,
            }
        };
        if due {
            self.download_roster().await;
        }
    }

    /// Uploads pending events one at a time, marking each synced only after
    /// its own push is acknowledged. A failed row stays pending; a dead
    /// connection aborts the rest of the batch.
    async fn push_pending_events(&self) -> Result<usize> {
        let pending = self.attendance.list_pending(SYNC_PENDING_BATCH_LIMIT)?;
        if pending.is_empty() {
            return Ok(0);
        }
        info!("[Sync] Pushing {} pending events", pending.len());
        let mut pushed = 0;
        for event in &pending {
            match self.writer.push_event(event).await {
                Ok(()) => {
                    self.attendance.mark_synced(&event.id)?;
                    pushed += 1;
                }
                Err(err @ RemoteDbError::Connectivity { .. }) => {
                    warn!("[Sync] Event push aborted, connection lost: {}", err);
                    break;
                }
                Err(err) => warn!("[Sync] Event {} push failed: {}", event.id, err),
            }
        }
        Ok(pushed)
    }

    async fn push_pending_biometrics(&self) -> Result<usize> {
        let pending = self.biometrics.list_pending(SYNC_PENDING_BATCH_LIMIT)?;
        if pending.is_empty() {
            return Ok(0);
        }
        info!("[Sync] Pushing {} pending biometric records", pending.len());
        let mut pushed = 0;
        for record in &pending {
            match self.writer.push_biometric(record).await {
                Ok(()) => {
                    self.biometrics.mark_synced(&record.id)?;
                    pushed += 1;
                }
                Err(err @ RemoteDbError::Connectivity { .. }) => {
                    warn!("[Sync] Biometric push aborted, connection lost: {}", err);
                    break;
                }
                Err(err) => warn!("[Sync] Biometric {} push failed: {}", record.id, err),
            }
        }
        Ok(pushed)
    }

    /// Sector list for this installation's site: live fetch first, then the
    /// local cache, then the built-in defaults. Never fails.
    pub async fn sectors_for_site(&self) -> Vec<Sector> {
        let site_id = self.settings.site_id.clone().unwrap_or_default();

        match timeout(
            Duration::from_secs(SECTOR_FETCH_TIMEOUT_SECS),
            fetch_sectors(self.client(), &site_id),
        )
        .await
        {
            Ok(Ok(list)) if !list.is_empty() => {
                if let Err(err) = self.sectors.replace_for_site(&site_id, &list) {
                    warn!("[Sync] Caching sectors failed: {}", err);
                }
                return list;
            }
            Ok(Ok(_)) => debug!("[Sync] Remote returned no sectors for site {}", site_id),
            Ok(Err(err)) => warn!("[Sync] Sector fetch failed: {}", err),
            Err(_) => warn!("[Sync] Sector fetch timed out"),
        }

        match self.sectors.list_for_site(&site_id) {
            Ok(cached) if !cached.is_empty() => return cached,
            Ok(_) => {}
            Err(err) => warn!("[Sync] Reading cached sectors failed: {}", err),
        }
        default_sectors(&site_id)
    }
}
