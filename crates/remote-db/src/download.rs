//! Bulk download readers used by the first-install pass and the periodic
//! roster/sector refresh.

use log::{debug, info, warn};

use ponto_core::models::{now_local_string, template_sha256, BiometricRecord, Sector};
use ponto_core::value::{get_value, Row, SqlValue};

use crate::client::RemoteDbClient;
use crate::error::Result;

/// Source tables tried in order when downloading biometric templates; the
/// same data may live in a legacy table shape.
const BIOMETRIC_TABLE_CANDIDATES: &[&str] =
    &["biometrias", "biometrics", "biometria", "fingerprints", "employees"];

const PERSON_ID_KEYS: &[&str] = &["cooperado_id", "cooperadoid", "employee_id", "id"];
const PERSON_NAME_KEYS: &[&str] = &["cooperado_nome", "cooperadonome", "name", "nome"];
const FINGER_KEYS: &[&str] = &["finger_index", "fingerindex", "finger_id"];
const TEMPLATE_KEYS: &[&str] = &[
    "template",
    "template_bytes",
    "fingerprint_template",
    "biometric_template",
    "template_base64",
    "templatebase64",
];
const CREATED_KEYS: &[&str] = &["created_at", "criado_em", "created_at_db", "criado_em_db"];

/// Downloads every biometric record from the first source table that yields
/// data. Rows without a usable template are skipped, not fatal. Returned
/// records are flagged synced so they are never re-uploaded.
pub async fn fetch_all_biometrics(client: &RemoteDbClient) -> Result<Vec<BiometricRecord>> {
    for table in BIOMETRIC_TABLE_CANDIDATES {
        let rows = match client
            .execute_query(&format!("SELECT * FROM {}", table), &[])
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                debug!("[RemoteDb] Download from {} failed: {}", table, err);
                continue;
            }
        };
        if rows.is_empty() {
            continue;
        }

        let mut records = Vec::new();
        for row in &rows {
            match decode_biometric_row(row) {
                Some(record) => records.push(record),
                None => {
                    warn!("[RemoteDb] Skipping {} row without a decodable template", table);
                }
            }
        }
        if !records.is_empty() {
            info!(
                "[RemoteDb] Downloaded {} biometric records from {} ({} rows)",
                records.len(),
                table,
                rows.len()
            );
            return Ok(records);
        }
    }
    Ok(Vec::new())
}

fn decode_biometric_row(row: &Row) -> Option<BiometricRecord> {
    let template = get_value(row, TEMPLATE_KEYS)?.as_bytes()?;
    if template.is_empty() {
        return None;
    }
    let person_id = get_value(row, PERSON_ID_KEYS)
        .map(|v| v.to_display_string())
        .filter(|s| !s.is_empty())?;
    let person_name = get_value(row, PERSON_NAME_KEYS)
        .map(|v| v.to_display_string())
        .unwrap_or_default();
    let finger_index = get_value(row, FINGER_KEYS)
        .and_then(|v| v.as_i64())
        .unwrap_or(0) as i32;
    let created_at = get_value(row, CREATED_KEYS)
        .map(|v| v.to_display_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(now_local_string);

    let mut record = BiometricRecord::new(person_id, person_name, finger_index, template);
    if let Some(id) = get_value(row, &["id"]).map(|v| v.to_display_string()) {
        if !id.is_empty() {
            record.id = id;
        }
    }
    record.template_hash = template_sha256(&record.template);
    record.created_at = created_at;
    record.synced = true;
    record.last_sync_time = Some(now_local_string());
    Some(record)
}

/// Fetches the roster table's live column list and all of its rows. The
/// local mirror table is shaped from these columns at sync time.
pub async fn fetch_roster(client: &RemoteDbClient) -> Result<(Vec<String>, Vec<Row>)> {
    let column_rows = client
        .execute_query("PRAGMA table_info(cooperados)", &[])
        .await?;
    let columns: Vec<String> = column_rows
        .iter()
        .filter_map(|row| row.get("name").and_then(|v| v.as_str()).map(str::to_string))
        .collect();

    let rows = client.execute_query("SELECT * FROM cooperados", &[]).await?;
    info!(
        "[RemoteDb] Roster download: {} columns, {} rows",
        columns.len(),
        rows.len()
    );
    Ok((columns, rows))
}

/// Fetches sectors for a site, preferring the site-scoped join and falling
/// back to the full sector list when the join shape is absent.
pub async fn fetch_sectors(client: &RemoteDbClient, site_id: &str) -> Result<Vec<Sector>> {
    let joined = "SELECT s.id, s.nome FROM setores s \
                  INNER JOIN hospital_setores hs ON hs.setor_id = s.id \
                  WHERE hs.hospital_id = ? ORDER BY s.nome";
    match client
        .execute_query(joined, &[SqlValue::Text(site_id.to_string())])
        .await
    {
        Ok(rows) if !rows.is_empty() => return Ok(rows_to_sectors(&rows, site_id)),
        Ok(_) => {}
        Err(err) => {
            debug!("[RemoteDb] Site-scoped sector fetch failed: {}", err);
        }
    }

    let rows = client
        .execute_query("SELECT id, nome FROM setores ORDER BY nome", &[])
        .await?;
    Ok(rows_to_sectors(&rows, site_id))
}

fn rows_to_sectors(rows: &[Row], site_id: &str) -> Vec<Sector> {
    rows.iter()
        .filter_map(|row| {
            let id = get_value(row, &["id"])?.as_i64()?;
            let name = get_value(row, &["nome", "name"])?.to_display_string();
            Some(Sector {
                id,
                name,
                site_id: site_id.to_string(),
                last_sync_time: Some(now_local_string()),
            })
        })
        .collect()
}

/// Summary of what the remote actually contains; logged during the
/// first-install pass to aid support with drifted deployments.
#[derive(Debug, Default)]
pub struct DiagnosticsReport {
    pub tables: Vec<String>,
    pub counts: Vec<(String, i64)>,
    pub sample_columns: Vec<String>,
}

/// Enumerates remote tables, counts rows in the candidate biometric tables,
/// and samples one row's columns. Individual probe failures are non-fatal.
pub async fn run_diagnostics(client: &RemoteDbClient) -> Result<DiagnosticsReport> {
    let mut report = DiagnosticsReport::default();

    let table_rows = client
        .execute_query(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
        )
        .await?;
    report.tables = table_rows
        .iter()
        .filter_map(|row| row.get("name").and_then(|v| v.as_str()).map(str::to_string))
        .collect();
    info!("[RemoteDb] Remote tables: {}", report.tables.join(", "));

    let mut count_candidates: Vec<&str> = BIOMETRIC_TABLE_CANDIDATES.to_vec();
    count_candidates.push("cooperados");
    for table in count_candidates {
        let rows = match client
            .execute_query(&format!("SELECT COUNT(*) AS total FROM {}", table), &[])
            .await
        {
            Ok(rows) => rows,
            Err(_) => continue,
        };
        if let Some(count) = rows
            .first()
            .and_then(|row| get_value(row, &["total", "COUNT(*)", "col_0"]))
            .and_then(|v| v.as_i64())
        {
            debug!("[RemoteDb] {}: {} rows", table, count);
            report.counts.push((table.to_string(), count));
        }
    }

    if let Some((table, _)) = report.counts.iter().find(|(_, count)| *count > 0) {
        if let Ok(rows) = client
            .execute_query(&format!("SELECT * FROM {} LIMIT 1", table), &[])
            .await
        {
            if let Some(row) = rows.first() {
                report.sample_columns = row.keys().cloned().collect();
                debug!(
                    "[RemoteDb] Sample columns in {}: {}",
                    table,
                    report.sample_columns.join(", ")
                );
            }
        }
    }

    Ok(report)
}
