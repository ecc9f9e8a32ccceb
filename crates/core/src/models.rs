//! Domain entities shared across the connector, store, and sync engine.

use chrono::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Wall-clock timestamp format used for locally-stored events.
pub const LOCAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time rendered in the store format.
pub fn now_local_string() -> String {
    Local::now().format(LOCAL_TIMESTAMP_FORMAT).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Entry,
    Exit,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Entry => "ENTRY",
            EventType::Exit => "EXIT",
        }
    }

    /// Parses stored labels, accepting the legacy spellings still present in
    /// older remote deployments.
    pub fn parse(value: &str) -> Option<EventType> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ENTRY" | "ENTRADA" => Some(EventType::Entry),
            "EXIT" | "SAIDA" | "SAÍDA" => Some(EventType::Exit),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single clock event. Created pending; the sync engine flips `synced`
/// after the remote insert is acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: String,
    pub code: String,
    pub person_id: String,
    pub person_name: String,
    pub event_type: EventType,
    pub timestamp: String,
    pub location: String,
    pub site_id: Option<String>,
    pub sector_id: Option<i64>,
    pub status: String,
    pub is_manual: bool,
    pub synced: bool,
    pub last_sync_time: Option<String>,
}

impl AttendanceEvent {
    pub fn new(
        person_id: impl Into<String>,
        person_name: impl Into<String>,
        event_type: EventType,
        location: impl Into<String>,
        site_id: Option<String>,
        sector_id: Option<i64>,
    ) -> Self {
        AttendanceEvent {
            id: Uuid::new_v4().to_string(),
            code: String::new(),
            person_id: person_id.into(),
            person_name: person_name.into(),
            event_type,
            timestamp: now_local_string(),
            location: location.into(),
            site_id,
            sector_id,
            status: "Pendente".to_string(),
            is_manual: false,
            synced: false,
            last_sync_time: None,
        }
    }
}

/// An enrolled fingerprint template. Template bytes are never empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiometricRecord {
    pub id: String,
    pub person_id: String,
    pub person_name: String,
    pub finger_index: i32,
    pub template_hash: String,
    pub template: Vec<u8>,
    pub created_at: String,
    pub synced: bool,
    pub last_sync_time: Option<String>,
}

impl BiometricRecord {
    pub fn new(
        person_id: impl Into<String>,
        person_name: impl Into<String>,
        finger_index: i32,
        template: Vec<u8>,
    ) -> Self {
        let template_hash = template_sha256(&template);
        BiometricRecord {
            id: Uuid::new_v4().to_string(),
            person_id: person_id.into(),
            person_name: person_name.into(),
            finger_index,
            template_hash,
            template,
            created_at: now_local_string(),
            synced: false,
            last_sync_time: None,
        }
    }
}

/// Hex SHA-256 of a template payload, used as its content hash.
pub fn template_sha256(template: &[u8]) -> String {
    let digest = Sha256::digest(template);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// A cached sector row for one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sector {
    pub id: i64,
    pub name: String,
    pub site_id: String,
    pub last_sync_time: Option<String>,
}

/// Fallback list used when the remote is unreachable and the local cache is
/// empty.
pub fn default_sectors(site_id: &str) -> Vec<Sector> {
    let names = [
        "CENTRO CIRÚRGICO",
        "EMERGÊNCIA",
        "UTI",
        "ENFERMARIA",
        "LABORATÓRIO",
        "RADIOLOGIA",
        "FARMÁCIA",
        "RECEPÇÃO",
        "ADMINISTRATIVO",
    ];
    names
        .iter()
        .enumerate()
        .map(|(i, name)| Sector {
            id: (i + 1) as i64,
            name: (*name).to_string(),
            site_id: site_id.to_string(),
            last_sync_time: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_parses_legacy_labels() {
        assert_eq!(EventType::parse("ENTRADA"), Some(EventType::Entry));
        assert_eq!(EventType::parse("saida"), Some(EventType::Exit));
        assert_eq!(EventType::parse("ENTRY"), Some(EventType::Entry));
        assert_eq!(EventType::parse("bogus"), None);
    }

    #[test]
    fn template_hash_is_stable_hex() {
        let a = template_sha256(b"abc");
        let b = template_sha256(b"abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn default_sectors_cover_all_names() {
        let sectors = default_sectors("h1");
        assert_eq!(sectors.len(), 9);
        assert_eq!(sectors[0].id, 1);
        assert!(sectors.iter().all(|s| s.site_id == "h1"));
    }
}
