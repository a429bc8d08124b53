//! Shared test helpers: a scripted model endpoint and a fake tool provider.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::json;

use finops_agent::conversation::SUMMARIZATION_PROMPT;
use finops_agent::error::{FinOpsError, Result};
use finops_agent::mcp::{
    AdvertisedTool, ConnectionTimeouts, ProviderConnection, ProviderFault, ToolCallOutput,
    ToolProviderClient,
};
use finops_agent::provider::{ModelEndpoint, ModelRequest, ModelResponse};
use finops_agent::types::{ContentBlock, StopReason, StreamEvent, ToolUse, Usage};

pub const MODEL_ID: &str = "claude-3-7-sonnet-20250219";

pub fn text_response(text: &str, usage: Option<Usage>) -> ModelResponse {
    ModelResponse {
        content: vec![ContentBlock::text(text)],
        usage,
        stop_reason: Some(StopReason::EndTurn),
    }
}

pub fn tool_response(id: &str, name: &str, input: serde_json::Value, usage: Option<Usage>) -> ModelResponse {
    ModelResponse {
        content: vec![
            ContentBlock::text("Let me look that up."),
            ContentBlock::ToolUse(ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input,
            }),
        ],
        usage,
        stop_reason: Some(StopReason::ToolUse),
    }
}

/// Model endpoint that replays queued responses.
///
/// Summarization requests are recognised by their system prompt and answered
/// separately: by default with a summary that repeats the transcript it was
/// given, so every fact survives.
pub struct ScriptedEndpoint {
    script: Mutex<VecDeque<ModelResponse>>,
    summary_usage: Option<Usage>,
    fail_summaries: AtomicBool,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedEndpoint {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            summary_usage: Some(Usage::new(500, 50)),
            fail_summaries: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_summaries(self) -> Self {
        self.fail_summaries.store(true, Ordering::SeqCst);
        self
    }

    pub fn push(&self, response: ModelResponse) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn summary_requests(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.system_prompt == SUMMARIZATION_PROMPT)
            .count()
    }

    fn next(&self, request: &ModelRequest) -> Result<ModelResponse> {
        self.requests.lock().unwrap().push(request.clone());

        if request.system_prompt == SUMMARIZATION_PROMPT {
            if self.fail_summaries.load(Ordering::SeqCst) {
                return Err(FinOpsError::endpoint_status(529, "overloaded"));
            }
            let transcript = request.turns.first().map(|t| t.text()).unwrap_or_default();
            return Ok(text_response(
                &format!("- Facts so far:\n{transcript}"),
                self.summary_usage,
            ));
        }

        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| FinOpsError::endpoint("script exhausted"))
    }
}

#[async_trait]
impl ModelEndpoint for ScriptedEndpoint {
    fn model_id(&self) -> &str {
        MODEL_ID
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        self.next(request)
    }

    async fn stream(&self, request: &ModelRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let response = self.next(request)?;
        let mut events = Vec::new();
        for block in response.content {
            match block {
                ContentBlock::Text { text } => {
                    let chars: Vec<char> = text.chars().collect();
                    for chunk in chars.chunks(4) {
                        events.push(StreamEvent::TextDelta(chunk.iter().collect()));
                    }
                }
                ContentBlock::Reasoning { text } => {
                    let chars: Vec<char> = text.chars().collect();
                    for chunk in chars.chunks(4) {
                        events.push(StreamEvent::ReasoningDelta(chunk.iter().collect()));
                    }
                }
                ContentBlock::ToolUse(call) => events.push(StreamEvent::ToolUse(call)),
                ContentBlock::ToolResult(_) => {}
            }
        }
        if let Some(usage) = response.usage {
            events.push(StreamEvent::Usage(usage));
        }
        events.push(StreamEvent::Stop(response.stop_reason.unwrap_or(StopReason::EndTurn)));

        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

/// Observable state of a [`FakeToolClient`], shared with the test.
#[derive(Clone, Default)]
pub struct FakeProbe {
    pub alive: Arc<AtomicBool>,
    pub calls: Arc<AtomicUsize>,
    pub completed: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
}

/// In-process stand-in for a tool provider subprocess.
pub struct FakeToolClient {
    tools: Vec<String>,
    probe: FakeProbe,
    fail_start: bool,
    delay: Option<Duration>,
}

impl FakeToolClient {
    pub fn new(tools: &[&str]) -> Self {
        Self {
            tools: tools.iter().map(|t| t.to_string()).collect(),
            probe: FakeProbe::default(),
            fail_start: false,
            delay: None,
        }
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn probe(&self) -> FakeProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl ToolProviderClient for FakeToolClient {
    async fn start(&mut self) -> std::result::Result<(), ProviderFault> {
        if self.fail_start {
            return Err(ProviderFault::Exited("exit status: 1".into()));
        }
        self.probe.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_tools(&mut self) -> std::result::Result<Vec<AdvertisedTool>, ProviderFault> {
        Ok(self
            .tools
            .iter()
            .map(|name| AdvertisedTool {
                name: name.clone(),
                description: Some(format!("{name} tool")),
                input_schema: json!({"type": "object"}),
            })
            .collect())
    }

    async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolCallOutput, ProviderFault> {
        self.probe.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if !self.probe.alive.load(Ordering::SeqCst) {
            return Err(ProviderFault::Exited("broken pipe".into()));
        }
        self.probe.completed.fetch_add(1, Ordering::SeqCst);
        if arguments.get("deny").is_some() {
            return Ok(ToolCallOutput {
                content: vec![ContentBlock::text("AccessDeniedException")],
                is_error: true,
            });
        }
        Ok(ToolCallOutput {
            content: vec![ContentBlock::text(format!("{name}: $42.00"))],
            is_error: false,
        })
    }

    fn is_alive(&self) -> bool {
        self.probe.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&mut self, _grace: Duration) -> std::result::Result<(), ProviderFault> {
        self.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.probe.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub fn connection(provider_id: &str, client: FakeToolClient) -> Arc<ProviderConnection> {
    Arc::new(ProviderConnection::new(
        provider_id,
        Box::new(client),
        ConnectionTimeouts::default(),
    ))
}
