//! HTTP client for the remote replicated SQL service.
//!
//! One logical call is one pipeline request: the statement followed by a
//! close, POSTed as JSON to a fixed sub-path of the base URL.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, warn};
use std::time::Duration;
use tokio::time::sleep;

use ponto_core::config::SyncSettings;
use ponto_core::value::{Row, SqlValue};

use crate::error::{RemoteDbError, Result};

/// Retry ceiling for transport-level failures.
pub const MAX_RETRIES: u32 = 3;

/// Base retry delay; attempt `n` waits `n * RETRY_DELAY_MS`.
pub const RETRY_DELAY_MS: u64 = 1000;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const PIPELINE_PATH: &str = "/v2/pipeline";
const MAX_LOG_BODY_CHARS: usize = 512;

/// Client for the remote service's HTTP pipeline protocol.
#[derive(Debug, Clone)]
pub struct RemoteDbClient {
    client: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl RemoteDbClient {
    pub fn new(settings: &SyncSettings) -> Result<Self> {
        settings
            .validate()
            .map_err(|err| RemoteDbError::config(err.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        Ok(RemoteDbClient {
            client,
            base_url: normalize_base_url(&settings.remote_url),
            auth_token: settings.auth_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Executes a statement and returns its rows, keyed by column name.
    /// Zero rows from a successful call is a valid outcome; transport
    /// failures always surface as errors.
    pub async fn execute_query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>> {
        let body = self.send_pipeline(sql, args).await?;
        Ok(parse_rows(&body))
    }

    /// Executes a statement and returns the affected row count.
    pub async fn execute_non_query(&self, sql: &str, args: &[SqlValue]) -> Result<u64> {
        let body = self.send_pipeline(sql, args).await?;
        Ok(parse_affected_rows(&body))
    }

    /// Cheap connectivity probe. Never fails; any error maps to `false`.
    pub async fn test_connection(&self) -> bool {
        match self.execute_query("SELECT 1", &[]).await {
            Ok(_) => true,
            Err(err) => {
                debug!("[RemoteDb] Connection probe failed: {}", err);
                false
            }
        }
    }

    async fn send_pipeline(&self, sql: &str, args: &[SqlValue]) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, PIPELINE_PATH);
        let request_body = pipeline_body(sql, args);

        let mut last_error = String::new();
        for attempt in 1..=MAX_RETRIES {
            match self.try_send(&url, &request_body).await {
                Ok(body) => return Ok(body),
                Err(err @ RemoteDbError::Statement { .. }) => {
                    // Statement errors are deterministic; retrying wastes the
                    // fallback ladder's time.
                    return Err(err);
                }
                Err(err) => {
                    last_error = err.to_string();
                    debug!(
                        "[RemoteDb] Attempt {}/{} failed: {}",
                        attempt, MAX_RETRIES, last_error
                    );
                    if attempt < MAX_RETRIES {
                        sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64)).await;
                    }
                }
            }
        }

        Err(RemoteDbError::Connectivity {
            url,
            attempts: MAX_RETRIES,
            message: last_error,
        })
    }

    async fn try_send(&self, url: &str, request_body: &serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.auth_token)
            .json(request_body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        log_response(status, &text);

        if !status.is_success() {
            let preview: String = text.chars().take(MAX_LOG_BODY_CHARS).collect();
            return Err(RemoteDbError::status(status.as_u16(), preview));
        }

        let body: serde_json::Value = serde_json::from_str(&text)?;
        if let Some(message) = statement_error(&body) {
            return Err(RemoteDbError::statement(message));
        }
        Ok(body)
    }
}

fn log_response(status: reqwest::StatusCode, body: &str) {
    if status.is_success() {
        debug!("[RemoteDb] Response status: {}", status);
        return;
    }
    let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
    if body.chars().count() > MAX_LOG_BODY_CHARS {
        preview.push('…');
    }
    debug!("[RemoteDb] Response status: {} body: {}", status, preview);
}

/// Rewrites the custom scheme and strips trailing slashes.
fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    match trimmed.strip_prefix("libsql://") {
        Some(rest) => format!("https://{}", rest),
        None => trimmed.to_string(),
    }
}

fn pipeline_body(sql: &str, args: &[SqlValue]) -> serde_json::Value {
    let encoded_args: Vec<serde_json::Value> = args.iter().map(encode_arg).collect();
    serde_json::json!({
        "requests": [
            { "type": "execute", "stmt": { "sql": sql, "args": encoded_args } },
            { "type": "close" }
        ]
    })
}

/// Tagged-union wire encoding for a statement argument.
fn encode_arg(value: &SqlValue) -> serde_json::Value {
    match value {
        SqlValue::Null => serde_json::json!({ "type": "null" }),
        SqlValue::Integer(v) => serde_json::json!({ "type": "integer", "value": v.to_string() }),
        SqlValue::Real(v) => serde_json::json!({ "type": "float", "value": v.to_string() }),
        SqlValue::Text(s) => serde_json::json!({ "type": "text", "value": s }),
        SqlValue::Blob(bytes) => serde_json::json!({ "type": "blob", "base64": BASE64.encode(bytes) }),
    }
}

/// Per-statement error inside an otherwise successful pipeline response.
fn statement_error(body: &serde_json::Value) -> Option<String> {
    let results = body.get("results")?.as_array()?;
    let first = results.first()?;
    if first.get("type").and_then(|t| t.as_str()) == Some("error") {
        let message = first
            .pointer("/error/message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown statement error");
        return Some(message.to_string());
    }
    None
}

/// Decodes rows across the known response shapes. Unknown shapes degrade to
/// an empty result with a warning; the transport already succeeded here.
fn parse_rows(body: &serde_json::Value) -> Vec<Row> {
    // Nested pipeline shape: results[0].response.result.{cols,rows}.
    if let Some(results) = body.get("results").and_then(|r| r.as_array()) {
        if let Some(first) = results.first() {
            let result = first
                .pointer("/response/result")
                .or_else(|| first.get("result"));
            if let Some(result) = result {
                return parse_result_rows(result);
            }
        }
        return Vec::new();
    }

    // Flat shape: a bare array of already-keyed row objects.
    if let Some(rows) = body.as_array() {
        return rows
            .iter()
            .filter_map(|row| row.as_object())
            .map(|obj| {
                obj.iter()
                    .map(|(name, cell)| (name.clone(), decode_cell(cell)))
                    .collect()
            })
            .collect();
    }

    warn!("[RemoteDb] Unrecognized response shape; treating as empty result");
    Vec::new()
}

fn parse_result_rows(result: &serde_json::Value) -> Vec<Row> {
    let col_names: Vec<String> = result
        .get("cols")
        .and_then(|c| c.as_array())
        .map(|cols| {
            cols.iter()
                .enumerate()
                .map(|(i, col)| {
                    col.get("name")
                        .and_then(|n| n.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("col_{}", i))
                })
                .collect()
        })
        .unwrap_or_default();

    let Some(rows) = result.get("rows").and_then(|r| r.as_array()) else {
        return Vec::new();
    };

    rows.iter()
        .map(|row| match row {
            // Positional cells paired with the column-name list.
            serde_json::Value::Array(cells) => cells
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    let name = col_names
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| format!("col_{}", i));
                    (name, decode_cell(cell))
                })
                .collect(),
            // Already-keyed row object.
            serde_json::Value::Object(obj) => obj
                .iter()
                .map(|(name, cell)| (name.clone(), decode_cell(cell)))
                .collect(),
            other => {
                warn!("[RemoteDb] Unrecognized row shape: {}", other);
                Row::new()
            }
        })
        .collect()
}

/// Unboxes a wire cell. Tagged objects carry `{type, value|base64}`; plain
/// JSON scalars are accepted as-is; anything else degrades to raw text.
fn decode_cell(cell: &serde_json::Value) -> SqlValue {
    match cell {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(*b as i64),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        serde_json::Value::Object(obj) => {
            let tag = obj.get("type").and_then(|t| t.as_str()).unwrap_or("");
            let value = obj.get("value");
            match tag {
                "null" => SqlValue::Null,
                "integer" => value
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse::<i64>().ok())
                    .map(SqlValue::Integer)
                    .unwrap_or_else(|| degrade_to_text(cell)),
                "float" => value
                    .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_f64().map(|f| f.to_string())))
                    .and_then(|s| s.parse::<f64>().ok())
                    .map(SqlValue::Real)
                    .unwrap_or_else(|| degrade_to_text(cell)),
                "text" => value
                    .and_then(|v| v.as_str())
                    .map(|s| SqlValue::Text(s.to_string()))
                    .unwrap_or_else(|| degrade_to_text(cell)),
                "blob" => obj
                    .get("base64")
                    .and_then(|b| b.as_str())
                    .and_then(|b| BASE64.decode(b).ok())
                    .map(SqlValue::Blob)
                    .unwrap_or_else(|| degrade_to_text(cell)),
                _ => degrade_to_text(cell),
            }
        }
        other => degrade_to_text(other),
    }
}

fn degrade_to_text(cell: &serde_json::Value) -> SqlValue {
    SqlValue::Text(cell.to_string())
}

/// Affected-count extraction tolerating number and string encodings at the
/// shapes deployments are known to produce.
fn parse_affected_rows(body: &serde_json::Value) -> u64 {
    let candidates = [
        body.pointer("/results/0/response/result/affected_row_count"),
        body.pointer("/results/0/result/affected_row_count"),
        body.get("affected_row_count"),
        body.get("rows_affected"),
    ];
    for candidate in candidates.into_iter().flatten() {
        if let Some(count) = candidate.as_u64() {
            return count;
        }
        if let Some(count) = candidate.as_str().and_then(|s| s.trim().parse::<u64>().ok()) {
            return count;
        }
    }
    0
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Debug, Clone)]
    pub(crate) enum MockOutcome {
        DropConnection,
        Respond { status: u16, body: String },
    }

    pub(crate) fn settings_for(base_url: &str) -> SyncSettings {
        SyncSettings {
            remote_url: base_url.to_string(),
            auth_token: "test-token".to_string(),
            site_id: Some("h1".to_string()),
            roster_refresh_minutes: 0,
        }
    }

    pub(crate) fn nested_rows_body(cols: &[&str], rows: &[Vec<serde_json::Value>]) -> String {
        let cols_json: Vec<serde_json::Value> =
            cols.iter().map(|c| serde_json::json!({ "name": c })).collect();
        serde_json::json!({
            "results": [
                { "type": "ok", "response": { "result": { "cols": cols_json, "rows": rows } } },
                { "type": "ok" }
            ]
        })
        .to_string()
    }

    pub(crate) fn affected_body(count: serde_json::Value) -> String {
        serde_json::json!({
            "results": [
                { "type": "ok", "response": { "result": { "affected_row_count": count, "rows": [] } } },
                { "type": "ok" }
            ]
        })
        .to_string()
    }

    pub(crate) fn statement_error_body(message: &str) -> String {
        serde_json::json!({
            "results": [
                { "type": "error", "error": { "message": message } }
            ]
        })
        .to_string()
    }

    fn header_end_offset(buffer: &[u8]) -> Option<usize> {
        buffer.windows(4).position(|window| window == b"\r\n\r\n")
    }

    async fn read_http_request(
        stream: &mut tokio::net::TcpStream,
    ) -> Option<(HashMap<String, String>, String)> {
        let mut buffer = Vec::new();
        loop {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                return None;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if header_end_offset(&buffer).is_some() {
                break;
            }
        }

        let header_end = header_end_offset(&buffer)?;
        let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
        let mut lines = head.lines();
        let _request_line = lines.next()?.to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        let mut body = buffer[header_end + 4..].to_vec();
        while body.len() < content_length {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }

        Some((headers, String::from_utf8_lossy(&body).to_string()))
    }

    fn status_text(status: u16) -> &'static str {
        match status {
            200 => "OK",
            400 => "Bad Request",
            500 => "Internal Server Error",
            _ => "Error",
        }
    }

    async fn write_http_response(
        stream: &mut tokio::net::TcpStream,
        status: u16,
        body: &str,
    ) -> std::io::Result<()> {
        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            status_text(status),
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await
    }

    /// Serves scripted outcomes one connection at a time and captures every
    /// request body for later assertions.
    pub(crate) async fn start_mock_server(
        outcomes: Vec<MockOutcome>,
    ) -> (
        String,
        Arc<TokioMutex<Vec<String>>>,
        tokio::task::JoinHandle<()>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let captured = Arc::new(TokioMutex::new(Vec::<String>::new()));
        let scripted = Arc::new(TokioMutex::new(VecDeque::from(outcomes)));
        let captured_clone = Arc::clone(&captured);
        let scripted_clone = Arc::clone(&scripted);

        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(value) => value,
                    Err(_) => break,
                };
                let Some((_headers, body)) = read_http_request(&mut stream).await else {
                    continue;
                };
                captured_clone.lock().await.push(body);

                let outcome = scripted_clone
                    .lock()
                    .await
                    .pop_front()
                    .unwrap_or(MockOutcome::Respond {
                        status: 500,
                        body: r#"{"error":"unexpected request"}"#.to_string(),
                    });

                match outcome {
                    MockOutcome::DropConnection => {}
                    MockOutcome::Respond { status, body } => {
                        let _ = write_http_response(&mut stream, status, &body).await;
                    }
                }
            }
        });

        (format!("http://{}", addr), captured, handle)
    }

    #[tokio::test]
    async fn query_parses_nested_shape_with_tagged_cells() {
        let body = nested_rows_body(
            &["id", "nome", "saldo", "foto"],
            &[vec![
                serde_json::json!({ "type": "integer", "value": "42" }),
                serde_json::json!({ "type": "text", "value": "Ana" }),
                serde_json::json!({ "type": "float", "value": "1.5" }),
                serde_json::json!({ "type": "blob", "base64": BASE64.encode(b"tpl") }),
            ]],
        );
        let (base_url, _captured, server) =
            start_mock_server(vec![MockOutcome::Respond { status: 200, body }]).await;

        let client = RemoteDbClient::new(&settings_for(&base_url)).expect("client");
        let rows = client.execute_query("SELECT * FROM t", &[]).await.expect("rows");

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&SqlValue::Integer(42)));
        assert_eq!(rows[0].get("nome"), Some(&SqlValue::Text("Ana".into())));
        assert_eq!(rows[0].get("saldo"), Some(&SqlValue::Real(1.5)));
        assert_eq!(rows[0].get("foto"), Some(&SqlValue::Blob(b"tpl".to_vec())));

        server.abort();
    }

    #[tokio::test]
    async fn query_parses_flat_array_shape() {
        let body = serde_json::json!([
            { "id": 1, "nome": "UTI" },
            { "id": 2, "nome": "ENFERMARIA" }
        ])
        .to_string();
        let (base_url, _captured, server) =
            start_mock_server(vec![MockOutcome::Respond { status: 200, body }]).await;

        let client = RemoteDbClient::new(&settings_for(&base_url)).expect("client");
        let rows = client.execute_query("SELECT * FROM setores", &[]).await.expect("rows");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("nome"), Some(&SqlValue::Text("ENFERMARIA".into())));

        server.abort();
    }

    #[tokio::test]
    async fn query_names_missing_columns_positionally() {
        let body = serde_json::json!({
            "results": [
                { "type": "ok", "response": { "result": { "rows": [["a", "b"]] } } }
            ]
        })
        .to_string();
        let (base_url, _captured, server) =
            start_mock_server(vec![MockOutcome::Respond { status: 200, body }]).await;

        let client = RemoteDbClient::new(&settings_for(&base_url)).expect("client");
        let rows = client.execute_query("SELECT 1", &[]).await.expect("rows");

        assert_eq!(rows[0].get("col_0"), Some(&SqlValue::Text("a".into())));
        assert_eq!(rows[0].get("col_1"), Some(&SqlValue::Text("b".into())));

        server.abort();
    }

    #[tokio::test]
    async fn retry_succeeds_on_third_attempt_within_ceiling() {
        let ok = nested_rows_body(&["x"], &[vec![serde_json::json!({ "type": "integer", "value": "1" })]]);
        let (base_url, captured, server) = start_mock_server(vec![
            MockOutcome::Respond { status: 500, body: "boom".to_string() },
            MockOutcome::DropConnection,
            MockOutcome::Respond { status: 200, body: ok },
        ])
        .await;

        let client = RemoteDbClient::new(&settings_for(&base_url)).expect("client");
        let rows = client.execute_query("SELECT 1", &[]).await.expect("third attempt succeeds");

        assert_eq!(rows.len(), 1);
        assert_eq!(captured.lock().await.len(), 3);

        server.abort();
    }

    #[tokio::test]
    async fn retry_exhaustion_names_url_and_causes() {
        let (base_url, _captured, server) = start_mock_server(vec![
            MockOutcome::Respond { status: 500, body: "boom".to_string() },
            MockOutcome::Respond { status: 500, body: "boom".to_string() },
            MockOutcome::Respond { status: 500, body: "boom".to_string() },
        ])
        .await;

        let client = RemoteDbClient::new(&settings_for(&base_url)).expect("client");
        let err = client
            .execute_query("SELECT 1", &[])
            .await
            .expect_err("retries exhausted");

        let message = err.to_string();
        assert!(message.contains(&base_url));
        assert!(message.contains("auth token"));
        assert!(message.contains("network connectivity"));
        assert!(message.contains("exist on the remote service"));

        server.abort();
    }

    #[tokio::test]
    async fn statement_error_is_not_retried() {
        let (base_url, captured, server) = start_mock_server(vec![MockOutcome::Respond {
            status: 200,
            body: statement_error_body("no such table: pontos"),
        }])
        .await;

        let client = RemoteDbClient::new(&settings_for(&base_url)).expect("client");
        let err = client.execute_query("SELECT * FROM pontos", &[]).await.expect_err("statement error");

        assert!(matches!(err, RemoteDbError::Statement { .. }));
        assert!(err.to_string().contains("no such table"));
        assert_eq!(captured.lock().await.len(), 1);

        server.abort();
    }

    #[tokio::test]
    async fn non_query_parses_string_affected_count() {
        let (base_url, _captured, server) = start_mock_server(vec![MockOutcome::Respond {
            status: 200,
            body: affected_body(serde_json::json!("1")),
        }])
        .await;

        let client = RemoteDbClient::new(&settings_for(&base_url)).expect("client");
        let affected = client
            .execute_non_query("DELETE FROM t", &[])
            .await
            .expect("affected");
        assert_eq!(affected, 1);

        server.abort();
    }

    #[tokio::test]
    async fn args_use_tagged_wire_encoding() {
        let (base_url, captured, server) = start_mock_server(vec![MockOutcome::Respond {
            status: 200,
            body: affected_body(serde_json::json!(1)),
        }])
        .await;

        let client = RemoteDbClient::new(&settings_for(&base_url)).expect("client");
        let args = vec![
            SqlValue::Text("p1".to_string()),
            SqlValue::Integer(7),
            SqlValue::Null,
            SqlValue::Blob(b"tpl".to_vec()),
        ];
        client
            .execute_non_query("INSERT INTO t VALUES (?, ?, ?, ?)", &args)
            .await
            .expect("insert");

        let bodies = captured.lock().await.clone();
        let sent: serde_json::Value = serde_json::from_str(&bodies[0]).expect("json body");
        let sent_args = sent
            .pointer("/requests/0/stmt/args")
            .and_then(|a| a.as_array())
            .expect("args array");
        assert_eq!(sent_args[0], serde_json::json!({ "type": "text", "value": "p1" }));
        assert_eq!(sent_args[1], serde_json::json!({ "type": "integer", "value": "7" }));
        assert_eq!(sent_args[2], serde_json::json!({ "type": "null" }));
        assert_eq!(
            sent_args[3],
            serde_json::json!({ "type": "blob", "base64": BASE64.encode(b"tpl") })
        );
        assert_eq!(
            sent.pointer("/requests/1/type").and_then(|t| t.as_str()),
            Some("close")
        );

        server.abort();
    }

    #[tokio::test]
    async fn test_connection_is_false_on_failure() {
        let (base_url, _captured, server) = start_mock_server(vec![
            MockOutcome::DropConnection,
            MockOutcome::DropConnection,
            MockOutcome::DropConnection,
        ])
        .await;

        let client = RemoteDbClient::new(&settings_for(&base_url)).expect("client");
        assert!(!client.test_connection().await);

        server.abort();
    }

    #[test]
    fn base_url_rewrites_custom_scheme() {
        assert_eq!(
            normalize_base_url("libsql://db.example.turso.io/"),
            "https://db.example.turso.io"
        );
        assert_eq!(
            normalize_base_url(" https://db.example.com "),
            "https://db.example.com"
        );
    }
}
