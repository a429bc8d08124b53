//! Agent session: one conversation, its tools, and its cost accounting.
//!
//! A turn walks `Idle → AwaitingModel → (ToolCallRequested → AwaitingTool →
//! AwaitingModel)* → Done`. Tool calls from one model response are dispatched
//! in emitted order by a spawned task that owns handles to the store and the
//! registry, so a caller that abandons [`AgentSession::run`] mid-dispatch
//! still gets every result recorded. The next call on the session waits for
//! that task before touching the store.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bon::Builder;
use futures::StreamExt;
use serde::Serialize;
use strum::Display;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::events::{BlockCoalescer, EventSink, NullSink};
use super::prompt::default_system_prompt;
use crate::auth::CallerIdentity;
use crate::config::{check_summarization_bounds, AgentConfig, ModelRate, RateTable};
use crate::conversation::{ConversationStore, LengthAdvisory, Summarizer, SummarizerConfig};
use crate::error::{FinOpsError, Result};
use crate::provider::{ModelEndpoint, ModelRequest, ModelResponse};
use crate::tools::ToolRegistry;
use crate::types::{
    ContentBlock, Cost, StreamEvent, ToolResult, ToolUse, Turn, Usage, UsageSource,
};
use crate::util::usage::UsageLedger;

/// Per-session settings.
#[derive(Debug, Clone, Builder)]
pub struct SessionConfig {
    #[builder(into)]
    pub model_id: String,
    #[builder(into, default = default_system_prompt())]
    pub system_prompt: String,
    #[builder(default = 8192)]
    pub max_output_tokens: u32,
    #[builder(default = 200_000)]
    pub context_window: u64,
    #[builder(default = 0.7)]
    pub summarize_threshold: f64,
    #[builder(default = 0.3)]
    pub summary_ratio: f64,
    #[builder(default = 15)]
    pub preserve_recent_messages: usize,
    /// Model responses with tool calls allowed in one turn.
    #[builder(default = 25)]
    pub max_tool_iterations: usize,
}

impl SessionConfig {
    pub fn from_agent_config(config: &AgentConfig) -> Self {
        Self::builder()
            .model_id(config.model_id.clone())
            .max_output_tokens(config.max_output_tokens)
            .context_window(config.context_window)
            .summarize_threshold(config.summarize_threshold)
            .summary_ratio(config.summary_ratio)
            .preserve_recent_messages(config.preserve_recent_messages)
            .max_tool_iterations(config.max_tool_iterations)
            .build()
    }

    /// Same bounds `AgentConfig::validate` enforces.
    pub fn validate(&self) -> Result<()> {
        check_summarization_bounds(self.context_window, self.summarize_threshold, self.summary_ratio)
    }

    fn summarizer_config(&self) -> SummarizerConfig {
        SummarizerConfig {
            threshold: self.summarize_threshold,
            context_window: self.context_window,
            preserve_recent: self.preserve_recent_messages,
            summary_ratio: self.summary_ratio,
            max_output_tokens: self.max_output_tokens,
        }
    }
}

/// Where the current turn is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum TurnState {
    Idle,
    AwaitingModel,
    ToolCallRequested,
    AwaitingTool,
    Done,
}

/// What one completed turn produced and cost.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub turn_index: usize,
    pub answer: String,
    /// Summed over every model round-trip of the turn, summarization included.
    pub usage: Usage,
    pub usage_source: UsageSource,
    pub cost: Cost,
    pub tool_calls: usize,
    pub summarized: bool,
    pub elapsed: Duration,
}

/// Accumulates a turn's round-trips and records them in the ledger once.
///
/// Recording also happens on drop, so a failed or abandoned turn still
/// accounts for the round-trips it consumed.
struct TurnMeter {
    ledger: UsageLedger,
    rate: ModelRate,
    reported: Usage,
    estimated: Usage,
    all_reported: bool,
    round_trips: usize,
    settled: bool,
}

impl TurnMeter {
    fn new(ledger: UsageLedger, rate: ModelRate) -> Self {
        Self {
            ledger,
            rate,
            reported: Usage::default(),
            estimated: Usage::default(),
            all_reported: true,
            round_trips: 0,
            settled: false,
        }
    }

    fn add(&mut self, reported: Option<Usage>, estimated: Usage) {
        self.round_trips += 1;
        self.estimated.merge(&estimated);
        match reported {
            Some(usage) => self.reported.merge(&usage),
            None => self.all_reported = false,
        }
    }

    fn settle(&mut self) -> Option<(Usage, UsageSource, Cost)> {
        if self.settled || self.round_trips == 0 {
            return None;
        }
        self.settled = true;
        let (usage, source) = if self.all_reported {
            (self.reported, UsageSource::Exact)
        } else {
            (self.estimated, UsageSource::Estimated)
        };
        let cost = self.rate.cost(usage.input_tokens, usage.output_tokens);
        self.ledger.record(&usage, &cost, source);
        Some((usage, source, cost))
    }
}

impl Drop for TurnMeter {
    fn drop(&mut self) {
        if let Some((usage, source, _)) = self.settle() {
            debug!(
                round_trips = self.round_trips,
                tokens = usage.total_tokens(),
                %source,
                "recorded usage for unfinished turn"
            );
        }
    }
}

fn lock(store: &Mutex<ConversationStore>) -> MutexGuard<'_, ConversationStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One chat session. Sessions share nothing mutable except, optionally, a ledger.
pub struct AgentSession {
    id: Uuid,
    config: SessionConfig,
    endpoint: Arc<dyn ModelEndpoint>,
    registry: Arc<ToolRegistry>,
    store: Arc<Mutex<ConversationStore>>,
    summarizer: Summarizer,
    rate: ModelRate,
    ledger: UsageLedger,
    caller: Option<CallerIdentity>,
    state: TurnState,
    turns_started: usize,
    pending_dispatch: Option<JoinHandle<Vec<ToolResult>>>,
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("id", &self.id)
            .field("model_id", &self.config.model_id)
            .field("state", &self.state)
            .field("turns_started", &self.turns_started)
            .finish_non_exhaustive()
    }
}

impl AgentSession {
    /// Fails with `Config` when the rate table has no entry for the model
    /// or the summarization bounds are out of range.
    pub fn new(
        config: SessionConfig,
        endpoint: Arc<dyn ModelEndpoint>,
        registry: ToolRegistry,
        rates: Arc<RateTable>,
    ) -> Result<Self> {
        let rate = *rates.rate(&config.model_id)?;
        config.validate()?;
        let summarizer = Summarizer::new(config.summarizer_config());
        Ok(Self {
            id: Uuid::new_v4(),
            config,
            endpoint,
            registry: Arc::new(registry),
            store: Arc::new(Mutex::new(ConversationStore::new())),
            summarizer,
            rate,
            ledger: UsageLedger::new(),
            caller: None,
            state: TurnState::Idle,
            turns_started: 0,
            pending_dispatch: None,
        })
    }

    /// Record into a ledger shared with other sessions.
    pub fn with_ledger(mut self, ledger: UsageLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_caller(mut self, caller: CallerIdentity) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn snapshot(&self) -> Vec<Turn> {
        lock(&self.store).snapshot()
    }

    pub fn length_advisory(&self) -> LengthAdvisory {
        lock(&self.store).length_advisory()
    }

    /// Run one user turn to completion, buffering the model's output.
    pub async fn run(&mut self, text: impl Into<String>) -> Result<TurnOutcome> {
        let mut sink = NullSink;
        self.drive(text.into(), &mut sink, false).await
    }

    /// Run one user turn, forwarding fragments to `sink` as they arrive.
    pub async fn run_streaming(
        &mut self,
        text: impl Into<String>,
        sink: &mut dyn EventSink,
    ) -> Result<TurnOutcome> {
        self.drive(text.into(), sink, true).await
    }

    /// Drop the conversation ("fresh chat"). The ledger is left alone.
    pub async fn clear_conversation(&mut self) {
        self.settle_pending().await;
        lock(&self.store).clear();
        self.set_state(TurnState::Idle);
    }

    /// Wait for in-flight tool calls, then close every provider. Never fails.
    pub async fn close(&mut self) {
        self.settle_pending().await;
        self.registry.close_all().await;
        self.set_state(TurnState::Idle);
        info!(session_id = %self.id, "session closed");
    }

    fn caller_name(&self) -> String {
        self.caller
            .as_ref()
            .map(CallerIdentity::display_name)
            .unwrap_or_else(|| "anonymous".to_string())
    }

    fn set_state(&mut self, next: TurnState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "turn state change");
            self.state = next;
        }
    }

    async fn settle_pending(&mut self) {
        if let Some(handle) = self.pending_dispatch.as_mut() {
            debug!("waiting for in-flight tool dispatch");
            if let Err(error) = handle.await {
                warn!(%error, "tool dispatch task failed");
            }
            self.pending_dispatch = None;
        }
    }

    async fn drive(
        &mut self,
        text: String,
        sink: &mut dyn EventSink,
        streaming: bool,
    ) -> Result<TurnOutcome> {
        self.settle_pending().await;
        let turn_index = self.turns_started;
        self.turns_started += 1;

        let span = info_span!(
            "turn",
            session_id = %self.id,
            turn_index,
            model_id = %self.config.model_id,
            caller = %self.caller_name(),
        );
        let result = self
            .drive_turn(turn_index, text, sink, streaming)
            .instrument(span)
            .await;
        if result.is_err() {
            self.set_state(TurnState::Idle);
        }
        result
    }

    async fn drive_turn(
        &mut self,
        turn_index: usize,
        text: String,
        sink: &mut dyn EventSink,
        streaming: bool,
    ) -> Result<TurnOutcome> {
        let started = Instant::now();
        let mut meter = TurnMeter::new(self.ledger.clone(), self.rate);
        lock(&self.store).append(Turn::user(text));

        let mut summarized = false;
        let mut tool_calls = 0usize;
        let mut tool_rounds = 0usize;

        let answer = loop {
            self.set_state(TurnState::AwaitingModel);
            summarized |= self.maybe_summarize(turn_index, &mut meter).await?;

            let request = self.build_request();
            let response = self
                .call_model(&request, &mut *sink, streaming)
                .await
                .map_err(|e| e.at_turn(turn_index))?;
            meter.add(
                response.usage,
                Usage::new(
                    request.estimated_input_tokens(),
                    response.estimated_output_tokens(),
                ),
            );

            let calls: Vec<ToolUse> = response
                .content
                .iter()
                .filter_map(ContentBlock::as_tool_use)
                .cloned()
                .collect();
            let assistant = Turn::assistant(response.content).with_usage(response.usage);

            if calls.is_empty() {
                let answer = assistant.text();
                if !assistant.content.is_empty() {
                    lock(&self.store).append(assistant);
                }
                break answer;
            }

            tool_rounds += 1;
            if tool_rounds > self.config.max_tool_iterations {
                warn!(limit = self.config.max_tool_iterations, "tool iteration limit reached");
                return Err(FinOpsError::ModelEndpoint {
                    turn_index: Some(turn_index),
                    status: None,
                    message: format!(
                        "model kept requesting tools past the limit of {} rounds",
                        self.config.max_tool_iterations
                    ),
                });
            }

            self.set_state(TurnState::ToolCallRequested);
            lock(&self.store).append(assistant);
            tool_calls += calls.len();

            self.set_state(TurnState::AwaitingTool);
            let results = self.dispatch_tools(calls.clone()).await?;
            for (call, result) in calls.iter().zip(&results) {
                sink.on_tool_result(call, result);
            }
        };

        self.set_state(TurnState::Done);
        let (usage, usage_source, cost) = meter
            .settle()
            .unwrap_or((Usage::default(), UsageSource::Exact, Cost::default()));
        let elapsed = started.elapsed();

        info!(
            tokens = usage.total_tokens(),
            cost_usd = cost.total_cost,
            %usage_source,
            tool_calls,
            summarized,
            elapsed_ms = elapsed.as_millis() as u64,
            "turn complete"
        );

        Ok(TurnOutcome {
            turn_index,
            answer,
            usage,
            usage_source,
            cost,
            tool_calls,
            summarized,
            elapsed,
        })
    }

    /// Summarize if the history crossed the threshold. Failures are logged
    /// and leave the store untouched; the next model call checks again.
    async fn maybe_summarize(&mut self, turn_index: usize, meter: &mut TurnMeter) -> Result<bool> {
        let turns = lock(&self.store).snapshot();
        if !self
            .summarizer
            .needs_summary(&turns, &self.config.system_prompt)
        {
            return Ok(false);
        }

        match self
            .summarizer
            .summarize(self.endpoint.as_ref(), &turns, turn_index)
            .await
        {
            Ok(Some(summary)) => {
                meter.add(summary.usage, summary.estimated_usage);
                lock(&self.store).replace_prefix(summary.folded, summary.turn)?;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(error) => {
                warn!(%error, "summarization failed; keeping full history");
                Ok(false)
            }
        }
    }

    fn build_request(&self) -> ModelRequest {
        ModelRequest {
            model_id: self.config.model_id.clone(),
            system_prompt: self.config.system_prompt.clone(),
            turns: lock(&self.store).snapshot(),
            tools: self.registry.descriptors().to_vec(),
            max_output_tokens: self.config.max_output_tokens,
        }
    }

    async fn call_model(
        &self,
        request: &ModelRequest,
        sink: &mut dyn EventSink,
        streaming: bool,
    ) -> Result<ModelResponse> {
        if !streaming {
            return self.endpoint.complete(request).await;
        }

        let mut events = self.endpoint.stream(request).await?;
        let mut coalescer = BlockCoalescer::new();
        let mut usage = None;
        let mut stop_reason = None;

        while let Some(event) = events.next().await {
            match event? {
                StreamEvent::TextDelta(delta) => {
                    sink.on_text(&delta);
                    coalescer.push_text(&delta);
                }
                StreamEvent::ReasoningDelta(delta) => {
                    sink.on_reasoning(&delta);
                    coalescer.push_reasoning(&delta);
                }
                StreamEvent::ToolUse(call) => {
                    sink.on_tool_use(&call);
                    coalescer.push_tool_use(call);
                }
                StreamEvent::Usage(reported) => usage = Some(reported),
                StreamEvent::Stop(reason) => stop_reason = Some(reason),
            }
        }

        Ok(ModelResponse {
            content: coalescer.finish(),
            usage,
            stop_reason,
        })
    }

    /// Dispatch `calls` in order on a detached task that appends the results
    /// as one user turn, then wait for it.
    async fn dispatch_tools(&mut self, calls: Vec<ToolUse>) -> Result<Vec<ToolResult>> {
        let registry = Arc::clone(&self.registry);
        let store = Arc::clone(&self.store);

        let task = async move {
            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                debug!(tool_name = %call.name, tool_use_id = %call.id, "dispatching tool");
                let result = registry
                    .dispatch(&call.name, call.input.clone())
                    .await
                    .answering(call.id.clone());
                if result.is_error() {
                    debug!(tool_name = %call.name, "tool returned an error result");
                }
                results.push(result);
            }
            lock(&store).append(Turn::tool_results(results.clone()));
            results
        };

        let handle = self
            .pending_dispatch
            .insert(tokio::spawn(task.in_current_span()));
        let joined = handle.await;
        self.pending_dispatch = None;
        joined.map_err(|e| FinOpsError::InvalidState(format!("tool dispatch task failed: {e}")))
    }
}
