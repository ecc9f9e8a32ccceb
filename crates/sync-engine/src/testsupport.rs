//! Scripted HTTP mock for exercising full sync cycles against a fake
//! remote service.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex as TokioMutex;

use ponto_core::config::SyncSettings;

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

async fn read_http_request(stream: &mut tokio::net::TcpStream) -> Option<String> {
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
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
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

    Some(String::from_utf8_lossy(&body).to_string())
}

async fn write_http_response(
    stream: &mut tokio::net::TcpStream,
    status: u16,
    body: &str,
) -> std::io::Result<()> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        500 => "Internal Server Error",
        _ => "Error",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

/// Serves scripted outcomes one connection at a time and captures every
/// request body for later assertions. Requests past the script get a 500.
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
            let Some(body) = read_http_request(&mut stream).await else {
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
