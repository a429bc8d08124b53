//! Shared HTTP client, headers, and SSE helpers.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use crate::error::{FinOpsError, Result};

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// The process-wide reqwest client, built on first use.
pub fn shared_client() -> Result<&'static reqwest::Client> {
    if let Some(client) = SHARED_CLIENT.get() {
        return Ok(client);
    }
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .pool_max_idle_per_host(4)
        .build()?;
    Ok(SHARED_CLIENT.get_or_init(|| client))
}

/// Headers for the Anthropic Messages API.
pub fn anthropic_headers(api_key: &str, version: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(api_key) {
        headers.insert("x-api-key", val);
    }
    if let Ok(val) = HeaderValue::from_str(version) {
        headers.insert("anthropic-version", val);
    }
    headers
}

/// Payload of an SSE `data:` line. `[DONE]` and other fields yield `None`.
pub fn parse_sse_data(line: &str) -> Option<&str> {
    let data = line
        .strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))?;
    if data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// Splits a chunked byte stream into SSE lines.
///
/// Bytes are held until a `\n` arrives, so a UTF-8 sequence split across
/// network chunks is only decoded once it is complete.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Next complete line with surrounding whitespace trimmed.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

/// Turn a non-success response into a `ModelEndpoint` error.
///
/// Prefers the API's own `error.message` when the body carries one.
pub fn status_to_error(status: u16, body: &str) -> FinOpsError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string());
    FinOpsError::endpoint_status(status, message)
}
