//! Anthropic Messages API endpoint.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::AgentConfig;
use crate::error::{FinOpsError, Result};
use crate::types::{ContentBlock, Role, StopReason, StreamEvent, ToolUse, Turn, Usage};

use super::http::{anthropic_headers, parse_sse_data, shared_client, status_to_error, SseLineBuffer};
use super::sanitize::sanitize_turns;
use super::{ModelEndpoint, ModelRequest, ModelResponse};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicEndpoint {
    model_id: String,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for AnthropicEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicEndpoint")
            .field("model_id", &self.model_id)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl AnthropicEndpoint {
    pub fn new(model_id: impl Into<String>, api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            model_id: model_id.into(),
            api_key: api_key.into(),
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    /// Build from configuration. A missing API key is a `Config` error.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let api_key = config
            .anthropic_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| FinOpsError::Config("ANTHROPIC_API_KEY is not set".into()))?;
        Ok(Self::new(
            config.model_id.clone(),
            api_key,
            config.anthropic_base_url.clone(),
        ))
    }

    fn build_request_body(&self, request: &ModelRequest, stream: bool) -> Value {
        let messages: Vec<Value> = sanitize_turns(&request.turns)
            .iter()
            .map(turn_to_wire)
            .collect();

        let mut body = json!({
            "model": request.model_id,
            "max_tokens": request.max_output_tokens,
            "messages": messages,
            "stream": stream,
        });

        if let Some(obj) = body.as_object_mut() {
            if !request.system_prompt.is_empty() {
                obj.insert("system".into(), request.system_prompt.clone().into());
            }
            if !request.tools.is_empty() {
                let tools: Vec<Value> = request
                    .tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                            "input_schema": tool.input_schema,
                        })
                    })
                    .collect();
                obj.insert("tools".into(), tools.into());
            }
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/messages", self.base_url);
        let resp = shared_client()?
            .post(&url)
            .headers(anthropic_headers(&self.api_key, API_VERSION))
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelEndpoint for AnthropicEndpoint {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let body = self.build_request_body(request, false);
        debug!(model_id = %request.model_id, turns = request.turns.len(), "anthropic complete");

        let data: WireResponse = self.post(&body).await?.json().await?;

        let content = data
            .content
            .into_iter()
            .filter_map(|block| match block {
                WireBlock::Text { text } => Some(ContentBlock::text(text)),
                WireBlock::Thinking { thinking } => Some(ContentBlock::reasoning(thinking)),
                WireBlock::ToolUse { id, name, input } => {
                    Some(ContentBlock::ToolUse(ToolUse { id, name, input }))
                }
                WireBlock::Other => None,
            })
            .collect();

        Ok(ModelResponse {
            content,
            usage: data
                .usage
                .map(|u| Usage::new(u.input_tokens, u.output_tokens)),
            stop_reason: data.stop_reason.as_deref().map(StopReason::from_wire),
        })
    }

    async fn stream(
        &self,
        request: &ModelRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_request_body(request, true);
        debug!(model_id = %request.model_id, turns = request.turns.len(), "anthropic stream");

        let byte_stream = self.post(&body).await?.bytes_stream();

        let stream = async_stream::stream! {
            let mut lines = SseLineBuffer::default();
            let mut decoder = SseDecoder::default();
            futures::pin_mut!(byte_stream);

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(FinOpsError::Network(e));
                        return;
                    }
                };
                lines.push(&chunk);

                while let Some(line) = lines.next_line() {
                    let Some(data) = parse_sse_data(&line) else {
                        continue;
                    };
                    let Ok(event) = serde_json::from_str::<Value>(data) else {
                        continue;
                    };
                    for item in decoder.on_event(&event) {
                        let failed = item.is_err();
                        yield item;
                        if failed {
                            return;
                        }
                    }
                }
            }

            for item in decoder.finish() {
                yield item;
            }
        };

        Ok(Box::pin(stream))
    }
}

fn turn_to_wire(turn: &Turn) -> Value {
    let role = match turn.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let content: Vec<Value> = turn.content.iter().filter_map(block_to_wire).collect();
    json!({ "role": role, "content": content })
}

fn block_to_wire(block: &ContentBlock) -> Option<Value> {
    match block {
        ContentBlock::Text { text } if text.is_empty() => None,
        ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
        ContentBlock::ToolUse(call) => Some(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call.input,
        })),
        ContentBlock::ToolResult(result) => Some(json!({
            "type": "tool_result",
            "tool_use_id": result.tool_use_id,
            "content": result.text(),
            "is_error": result.is_error(),
        })),
        ContentBlock::Reasoning { .. } => None,
    }
}

/// Folds Messages API stream events into [`StreamEvent`]s.
#[derive(Debug, Default)]
struct SseDecoder {
    tool_id: Option<String>,
    tool_name: Option<String>,
    tool_input: String,
    usage: Usage,
    saw_usage: bool,
    saw_tool_use: bool,
    stopped: bool,
}

impl SseDecoder {
    fn on_event(&mut self, event: &Value) -> Vec<Result<StreamEvent>> {
        let mut out = Vec::new();
        match event.get("type").and_then(Value::as_str).unwrap_or("") {
            "message_start" => {
                if let Some(input) = event
                    .pointer("/message/usage/input_tokens")
                    .and_then(Value::as_u64)
                {
                    self.usage.input_tokens = input;
                    self.saw_usage = true;
                }
            }
            "content_block_start" => {
                let block = event.get("content_block");
                if block.and_then(|b| b.get("type")).and_then(Value::as_str) == Some("tool_use") {
                    self.tool_id = block
                        .and_then(|b| b.get("id"))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    self.tool_name = block
                        .and_then(|b| b.get("name"))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    self.tool_input.clear();
                }
            }
            "content_block_delta" => {
                let delta = event.get("delta");
                let field = |name: &str| {
                    delta
                        .and_then(|d| d.get(name))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                };
                match delta.and_then(|d| d.get("type")).and_then(Value::as_str) {
                    Some("text_delta") => {
                        if let Some(text) = field("text") {
                            out.push(Ok(StreamEvent::TextDelta(text)));
                        }
                    }
                    Some("thinking_delta") => {
                        if let Some(thinking) = field("thinking") {
                            out.push(Ok(StreamEvent::ReasoningDelta(thinking)));
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some(partial) = field("partial_json") {
                            self.tool_input.push_str(&partial);
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                if let (Some(id), Some(name)) = (self.tool_id.take(), self.tool_name.take()) {
                    let raw = std::mem::take(&mut self.tool_input);
                    let input = if raw.trim().is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&raw).unwrap_or(Value::String(raw))
                    };
                    self.saw_tool_use = true;
                    out.push(Ok(StreamEvent::ToolUse(ToolUse { id, name, input })));
                }
            }
            "message_delta" => {
                if let Some(output) = event
                    .pointer("/usage/output_tokens")
                    .and_then(Value::as_u64)
                {
                    self.usage.output_tokens = output;
                    self.saw_usage = true;
                    out.push(Ok(StreamEvent::Usage(self.usage)));
                }
                if let Some(reason) = event.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    self.stopped = true;
                    out.push(Ok(StreamEvent::Stop(StopReason::from_wire(reason))));
                }
            }
            "error" => {
                let message = event
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("stream error")
                    .to_string();
                out.push(Err(FinOpsError::endpoint(message)));
            }
            _ => {}
        }
        out
    }

    /// Close out a stream that ended without a `stop_reason`.
    fn finish(&mut self) -> Vec<Result<StreamEvent>> {
        if self.stopped {
            return Vec::new();
        }
        self.stopped = true;
        let reason = if self.saw_tool_use {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        };
        vec![Ok(StreamEvent::Stop(reason))]
    }
}

#[derive(Deserialize)]
struct WireResponse {
    content: Vec<WireBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: u64,
    output_tokens: u64,
}
