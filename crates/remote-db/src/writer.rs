//! Schema-adaptive inserts for remote tables whose column sets drift across
//! deployments.
//!
//! The ladder per insert: discover the live column set (TTL-cached), build a
//! dynamic INSERT from the alias candidates that actually exist, and if that
//! fails fall back through fixed legacy statements. Only when every strategy
//! fails does the operation error, carrying each attempt's failure text.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, warn};
use std::collections::HashMap;

use ponto_core::models::{AttendanceEvent, BiometricRecord};
use ponto_core::value::SqlValue;

use crate::client::RemoteDbClient;
use crate::columns::ColumnCache;
use crate::error::{RemoteDbError, Result};

const EVENTS_TABLE: &str = "pontos";
const BIOMETRICS_TABLE: &str = "biometrias";

/// Writer owning the column cache; shared across sync cycles.
#[derive(Debug)]
pub struct SchemaAdaptiveWriter {
    client: RemoteDbClient,
    columns: ColumnCache,
}

struct InsertBuilder {
    columns: Vec<String>,
    args: Vec<SqlValue>,
}

impl InsertBuilder {
    fn new() -> Self {
        InsertBuilder {
            columns: Vec::new(),
            args: Vec::new(),
        }
    }

    /// Adds the column when it exists in the live schema.
    fn add_if_exists(&mut self, schema: &HashMap<String, String>, name: &str, value: SqlValue) {
        if schema.contains_key(name) {
            self.columns.push(name.to_string());
            self.args.push(value);
        }
    }

    fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn insert_sql(&self, table: &str) -> String {
        let placeholders = vec!["?"; self.columns.len()].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            self.columns.join(", "),
            placeholders
        )
    }
}

impl SchemaAdaptiveWriter {
    pub fn new(client: RemoteDbClient) -> Self {
        SchemaAdaptiveWriter {
            client,
            columns: ColumnCache::new(),
        }
    }

    pub fn client(&self) -> &RemoteDbClient {
        &self.client
    }

    async fn live_schema(&self, table: &str) -> HashMap<String, String> {
        match self.columns.get_or_refresh(&self.client, table).await {
            Ok(schema) => schema,
            Err(err) => {
                warn!(
                    "[RemoteDb] Column introspection for {} failed: {}. Using fixed fallbacks",
                    table, err
                );
                HashMap::new()
            }
        }
    }

    /// Pushes one attendance event. Succeeds as soon as any strategy reports
    /// at least one affected row.
    pub async fn push_event(&self, event: &AttendanceEvent) -> Result<()> {
        let schema = self.live_schema(EVENTS_TABLE).await;
        let mut attempts: Vec<String> = Vec::new();

        let text = |s: &str| SqlValue::Text(s.to_string());
        let opt_text = |s: &Option<String>| match s {
            Some(v) => SqlValue::Text(v.clone()),
            None => SqlValue::Null,
        };

        let mut builder = InsertBuilder::new();
        builder.add_if_exists(&schema, "id", text(&event.id));
        builder.add_if_exists(&schema, "codigo", text(&event.code));
        builder.add_if_exists(&schema, "cooperado_id", text(&event.person_id));
        builder.add_if_exists(&schema, "cooperado_nome", text(&event.person_name));
        builder.add_if_exists(&schema, "timestamp", text(&event.timestamp));
        builder.add_if_exists(&schema, "tipo", text(event.event_type.as_str()));
        builder.add_if_exists(&schema, "local", text(&event.location));
        builder.add_if_exists(&schema, "hospital_id", opt_text(&event.site_id));
        builder.add_if_exists(
            &schema,
            "setor_id",
            event
                .sector_id
                .map(SqlValue::Integer)
                .unwrap_or(SqlValue::Null),
        );
        builder.add_if_exists(&schema, "status", text(&event.status));
        builder.add_if_exists(&schema, "is_manual", SqlValue::Integer(event.is_manual as i64));
        let date_part = event.timestamp.split_whitespace().next().unwrap_or("");
        builder.add_if_exists(&schema, "date", text(date_part));
        builder.add_if_exists(&schema, "created_at", text(&event.timestamp));
        builder.add_if_exists(&schema, "created_at_db", text(&event.timestamp));
        builder.add_if_exists(&schema, "criado_em", text(&event.timestamp));
        builder.add_if_exists(&schema, "sincronizado_em", text(&event.timestamp));

        if let Some(failure) = self.try_insert(EVENTS_TABLE, &builder, "dynamic insert").await {
            // The cached column map may have gone stale mid-TTL.
            self.columns.invalidate(EVENTS_TABLE);
            attempts.push(failure);
        } else if !builder.is_empty() {
            return Ok(());
        }

        // Fixed fallback A: the modern canonical column set.
        let sql_a = "INSERT INTO pontos (\
                     id, codigo, cooperado_id, cooperado_nome, timestamp, tipo, \
                     local, hospital_id, setor_id, status, is_manual, related_id, \
                     biometria_entrada_hash, biometria_saida_hash, validado_por, \
                     rejeitado_por, motivo_rejeicao, observacao\
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";
        let args_a = vec![
            text(&event.id),
            text(&event.code),
            text(&event.person_id),
            text(&event.person_name),
            text(&event.timestamp),
            text(event.event_type.as_str()),
            text(&event.location),
            opt_text(&event.site_id),
            event
                .sector_id
                .map(SqlValue::Integer)
                .unwrap_or(SqlValue::Null),
            text(&event.status),
            SqlValue::Integer(event.is_manual as i64),
            SqlValue::Null,
            SqlValue::Null,
            SqlValue::Null,
            SqlValue::Null,
            SqlValue::Null,
            SqlValue::Null,
            SqlValue::Null,
        ];
        match self.execute_insert(sql_a, &args_a, "fallback A").await {
            Ok(()) => return Ok(()),
            Err(failure) => attempts.push(failure),
        }

        // Fixed fallback B: the legacy column set.
        let sql_b = "INSERT INTO pontos (\
                     id, codigo, cooperado_id, cooperado_nome, timestamp, tipo, \
                     local, hospital_id, setor_id, status, biometria_entrada_hash, \
                     biometria_saida_hash, validado_por, rejeitado_por, \
                     motivo_rejeicao, criado_em\
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";
        let args_b = vec![
            text(&event.id),
            text(&event.code),
            text(&event.person_id),
            text(&event.person_name),
            text(&event.timestamp),
            text(event.event_type.as_str()),
            text(&event.location),
            opt_text(&event.site_id),
            event
                .sector_id
                .map(SqlValue::Integer)
                .unwrap_or(SqlValue::Null),
            text(&event.status),
            SqlValue::Null,
            SqlValue::Null,
            SqlValue::Null,
            SqlValue::Null,
            SqlValue::Null,
            text(&event.timestamp),
        ];
        match self.execute_insert(sql_b, &args_b, "fallback B").await {
            Ok(()) => return Ok(()),
            Err(failure) => attempts.push(failure),
        }

        Err(RemoteDbError::SchemaExhausted(attempts.join("; ")))
    }

    /// Pushes one biometric record. Binary payload encoding follows the
    /// destination column's declared type: char/text-like columns get base64
    /// text, everything else raw bytes.
    pub async fn push_biometric(&self, record: &BiometricRecord) -> Result<()> {
        let schema = self.live_schema(BIOMETRICS_TABLE).await;
        let mut attempts: Vec<String> = Vec::new();

        let text = |s: &str| SqlValue::Text(s.to_string());

        let mut builder = InsertBuilder::new();
        builder.add_if_exists(&schema, "id", text(&record.id));
        builder.add_if_exists(&schema, "cooperado_id", text(&record.person_id));
        builder.add_if_exists(&schema, "cooperadoid", text(&record.person_id));
        if !record.person_name.is_empty() {
            builder.add_if_exists(&schema, "cooperado_nome", text(&record.person_name));
            builder.add_if_exists(&schema, "cooperadonome", text(&record.person_name));
            builder.add_if_exists(&schema, "name", text(&record.person_name));
        }
        builder.add_if_exists(&schema, "finger_index", SqlValue::Integer(record.finger_index as i64));
        builder.add_if_exists(&schema, "fingerindex", SqlValue::Integer(record.finger_index as i64));
        builder.add_if_exists(&schema, "finger_id", SqlValue::Integer(record.finger_index as i64));
        builder.add_if_exists(&schema, "hash", text(&record.template_hash));
        builder.add_if_exists(&schema, "created_at", text(&record.created_at));
        builder.add_if_exists(&schema, "criado_em", text(&record.created_at));
        builder.add_if_exists(&schema, "created_at_db", text(&record.created_at));
        builder.add_if_exists(&schema, "criado_em_db", text(&record.created_at));
        builder.add_if_exists(&schema, "sincronizado_em", text(&record.created_at));
        builder.add_if_exists(&schema, "tipo_impressao", text("Todos"));

        let template_candidates = [
            "template",
            "template_bytes",
            "fingerprint_template",
            "biometric_template",
            "template_base64",
            "templatebase64",
        ];
        if let Some(column) = template_candidates
            .iter()
            .find(|candidate| schema.contains_key(**candidate))
        {
            let decl_type = schema.get(*column).map(String::as_str).unwrap_or("");
            let value = if decl_type.contains("CHAR") || decl_type.contains("TEXT") {
                SqlValue::Text(BASE64.encode(&record.template))
            } else {
                SqlValue::Blob(record.template.clone())
            };
            builder.add_if_exists(&schema, column, value);
        }

        if let Some(failure) = self
            .try_insert(BIOMETRICS_TABLE, &builder, "dynamic insert")
            .await
        {
            self.columns.invalidate(BIOMETRICS_TABLE);
            attempts.push(failure);
        } else if !builder.is_empty() {
            return Ok(());
        }

        let sql_a = "INSERT INTO biometrias (id, cooperado_id, cooperado_nome, template, \
                     finger_index, hash, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)";
        let args_a = vec![
            text(&record.id),
            text(&record.person_id),
            text(&record.person_name),
            SqlValue::Blob(record.template.clone()),
            SqlValue::Integer(record.finger_index as i64),
            text(&record.template_hash),
            text(&record.created_at),
        ];
        match self.execute_insert(sql_a, &args_a, "fallback A").await {
            Ok(()) => return Ok(()),
            Err(failure) => attempts.push(failure),
        }

        let sql_b = "INSERT INTO biometrias (id, cooperado_id, cooperado_nome, template_bytes, \
                     tipo_impressao, criado_em, sincronizado_em) VALUES (?, ?, ?, ?, ?, ?, ?)";
        let args_b = vec![
            text(&record.id),
            text(&record.person_id),
            text(&record.person_name),
            SqlValue::Blob(record.template.clone()),
            text("Todos"),
            text(&record.created_at),
            text(&record.created_at),
        ];
        match self.execute_insert(sql_b, &args_b, "fallback B").await {
            Ok(()) => return Ok(()),
            Err(failure) => attempts.push(failure),
        }

        Err(RemoteDbError::SchemaExhausted(attempts.join("; ")))
    }

    /// Runs the dynamic insert when any column matched. Returns the failure
    /// text to record, or `None` on success or when nothing matched.
    async fn try_insert(
        &self,
        table: &str,
        builder: &InsertBuilder,
        label: &str,
    ) -> Option<String> {
        if builder.is_empty() {
            return Some(format!(
                "{}: no candidate column exists in the live {} schema",
                label, table
            ));
        }
        let sql = builder.insert_sql(table);
        debug!("[RemoteDb] {} for {}: {}", label, table, sql);
        match self.client.execute_non_query(&sql, &builder.args).await {
            Ok(affected) if affected >= 1 => None,
            Ok(_) => Some(format!("{}: affected 0 rows", label)),
            Err(err) => Some(format!("{}: {}", label, err)),
        }
    }

    async fn execute_insert(
        &self,
        sql: &str,
        args: &[SqlValue],
        label: &str,
    ) -> std::result::Result<(), String> {
        match self.client.execute_non_query(sql, args).await {
            Ok(affected) if affected >= 1 => Ok(()),
            Ok(_) => Err(format!("{}: affected 0 rows", label)),
            Err(err) => Err(format!("{}: {}", label, err)),
        }
    }
}
