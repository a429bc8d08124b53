//! Agent session turn loop against a scripted endpoint and fake providers.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{connection, text_response, tool_response, FakeProbe, FakeToolClient, ScriptedEndpoint, MODEL_ID};
use finops_agent::agent::{AgentSession, EventSink, SessionConfig, TurnState};
use finops_agent::config::RateTable;
use finops_agent::error::FinOpsError;
use finops_agent::tools::ToolRegistry;
use finops_agent::types::{
    ContentBlock, Role, ToolResult, ToolResultStatus, ToolUse, Usage, UsageSource,
};
use finops_agent::util::usage::UsageLedger;
use pretty_assertions::assert_eq;
use serde_json::json;

const SYSTEM: &str = "You are a FinOps assistant.";

fn config() -> SessionConfig {
    SessionConfig::builder()
        .model_id(MODEL_ID)
        .system_prompt(SYSTEM)
        .build()
}

async fn registry_with(client: FakeToolClient) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register_all(vec![connection("billing", client)]).await;
    registry
}

async fn session(endpoint: &Arc<ScriptedEndpoint>, config: SessionConfig) -> (AgentSession, FakeProbe) {
    let client = FakeToolClient::new(&["get_cost"]);
    let probe = client.probe();
    let session = AgentSession::new(
        config,
        endpoint.clone(),
        registry_with(client).await,
        Arc::new(RateTable::builtin()),
    )
    .expect("session should build");
    (session, probe)
}

#[derive(Default)]
struct RecordingSink {
    text: Vec<String>,
    reasoning: Vec<String>,
    tool_uses: Vec<String>,
    tool_results: Vec<(String, ToolResultStatus)>,
}

impl EventSink for RecordingSink {
    fn on_text(&mut self, delta: &str) {
        self.text.push(delta.to_string());
    }

    fn on_reasoning(&mut self, delta: &str) {
        self.reasoning.push(delta.to_string());
    }

    fn on_tool_use(&mut self, call: &ToolUse) {
        self.tool_uses.push(call.name.clone());
    }

    fn on_tool_result(&mut self, call: &ToolUse, result: &ToolResult) {
        self.tool_results.push((call.name.clone(), result.status));
    }
}

#[tokio::test]
async fn tool_loop_appends_four_turns_and_returns_final_text() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![
        tool_response("tu_1", "get_cost", json!({"period": "last_month"}), Some(Usage::new(100, 20))),
        text_response("You spent $42.00 last month.", Some(Usage::new(150, 30))),
    ]));
    let (mut session, probe) = session(&endpoint, config()).await;

    let outcome = session.run("What did I spend?").await.expect("turn should succeed");

    assert_eq!(outcome.answer, "You spent $42.00 last month.");
    assert_eq!(outcome.tool_calls, 1);
    assert_eq!(probe.completed.load(Ordering::SeqCst), 1);

    let turns = session.snapshot();
    let roles: Vec<Role> = turns.iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
    assert_eq!(turns[0].text(), "What did I spend?");
    assert_eq!(turns[1].tool_uses()[0].name, "get_cost");
    assert!(turns[2].is_tool_result());
    assert!(matches!(
        &turns[2].content[0],
        ContentBlock::ToolResult(result)
            if result.tool_use_id == "tu_1" && result.status == ToolResultStatus::Ok
    ));
    assert_eq!(turns[3].text(), "You spent $42.00 last month.");
    assert_eq!(session.state(), TurnState::Done);
}

#[tokio::test]
async fn model_sees_tools_and_tool_results() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![
        tool_response("tu_1", "get_cost", json!({}), None),
        text_response("done", None),
    ]));
    let (mut session, _probe) = session(&endpoint, config()).await;

    session.run("What did I spend?").await.expect("turn should succeed");

    let requests = endpoint.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].system_prompt, SYSTEM);
    assert_eq!(requests[0].tools[0].name, "get_cost");
    assert_eq!(requests[0].turns.len(), 1);
    assert_eq!(requests[1].turns.len(), 3);
    assert!(requests[1].turns[2].is_tool_result());
}

#[tokio::test]
async fn ledger_totals_equal_sum_of_reported_usage() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![
        tool_response("tu_1", "get_cost", json!({}), Some(Usage::new(1_000, 200))),
        text_response("EC2 was $310.", Some(Usage::new(1_500, 300))),
        text_response("S3 was $12.", Some(Usage::new(2_000, 400))),
    ]));
    let (mut session, _probe) = session(&endpoint, config()).await;

    let first = session.run("EC2 cost?").await.expect("first turn should succeed");
    let second = session.run("S3 cost?").await.expect("second turn should succeed");

    assert_eq!(first.usage, Usage::new(2_500, 500));
    assert_eq!(first.usage_source, UsageSource::Exact);
    assert_eq!(second.usage, Usage::new(2_000, 400));

    let totals = session.ledger().totals();
    assert_eq!(totals.total_tokens, 2_500 + 500 + 2_000 + 400);
    assert_eq!(totals.input_tokens, 4_500);
    assert_eq!(totals.output_tokens, 900);
    assert_eq!(totals.total_requests, 2);
    assert_eq!(totals.exact_requests, 2);

    let expected = 4_500.0 / 1e6 * 3.0 + 900.0 / 1e6 * 15.0;
    assert!((totals.total_cost_usd - expected).abs() < 1e-12);
    assert!((first.cost.total_cost + second.cost.total_cost - expected).abs() < 1e-12);
}

#[tokio::test]
async fn missing_usage_makes_the_whole_turn_estimated() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![
        tool_response("tu_1", "get_cost", json!({}), Some(Usage::new(100, 20))),
        text_response("You spent $42.00.", None),
    ]));
    let (mut session, _probe) = session(&endpoint, config()).await;

    let outcome = session.run("What did I spend?").await.expect("turn should succeed");

    assert_eq!(outcome.usage_source, UsageSource::Estimated);
    assert!(outcome.usage.input_tokens > 0);
    assert!(outcome.usage.output_tokens > 0);
    assert_ne!(outcome.usage, Usage::new(100, 20));

    let totals = session.ledger().totals();
    assert_eq!(totals.total_requests, 1);
    assert_eq!(totals.estimated_requests, 1);
    assert_eq!(totals.total_tokens, outcome.usage.total_tokens());
}

#[tokio::test]
async fn streaming_forwards_fragments_and_stores_coalesced_blocks() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![
        tool_response("tu_1", "get_cost", json!({}), Some(Usage::new(10, 5))),
        finops_agent::provider::ModelResponse {
            content: vec![
                ContentBlock::reasoning("Summing the bill"),
                ContentBlock::text("Total: $42.00 across services."),
            ],
            usage: Some(Usage::new(20, 8)),
            stop_reason: None,
        },
    ]));
    let (mut session, _probe) = session(&endpoint, config()).await;
    let mut sink = RecordingSink::default();

    let outcome = session
        .run_streaming("What did I spend?", &mut sink)
        .await
        .expect("streamed turn should succeed");

    assert!(sink.text.len() > 2, "text should arrive in fragments");
    assert_eq!(sink.text.concat(), "Let me look that up.Total: $42.00 across services.");
    assert_eq!(sink.reasoning.concat(), "Summing the bill");
    assert_eq!(sink.tool_uses, vec!["get_cost".to_string()]);
    assert_eq!(sink.tool_results, vec![("get_cost".to_string(), ToolResultStatus::Ok)]);

    assert_eq!(outcome.answer, "Total: $42.00 across services.");
    assert_eq!(outcome.usage, Usage::new(30, 13));

    let turns = session.snapshot();
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[1].content.len(), 2);
    assert_eq!(turns[1].content[0], ContentBlock::text("Let me look that up."));
    assert_eq!(
        turns[3].content,
        vec![
            ContentBlock::reasoning("Summing the bill"),
            ContentBlock::text("Total: $42.00 across services."),
        ]
    );
}

#[tokio::test]
async fn abandoned_turn_still_records_tool_results() {
    let client = FakeToolClient::new(&["get_cost"]).with_delay(Duration::from_millis(200));
    let probe = client.probe();
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![tool_response(
        "tu_1",
        "get_cost",
        json!({}),
        Some(Usage::new(100, 20)),
    )]));
    let mut session = AgentSession::new(
        config(),
        endpoint.clone(),
        registry_with(client).await,
        Arc::new(RateTable::builtin()),
    )
    .expect("session should build");

    let abandoned = tokio::time::timeout(Duration::from_millis(50), session.run("What did I spend?")).await;
    assert!(abandoned.is_err(), "turn should still be dispatching");
    assert_eq!(probe.completed.load(Ordering::SeqCst), 0);

    endpoint.push(text_response("Your bill was $42.00.", Some(Usage::new(300, 30))));
    let outcome = session.run("Well?").await.expect("next turn should succeed");

    assert_eq!(probe.completed.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.answer, "Your bill was $42.00.");

    let turns = session.snapshot();
    assert_eq!(turns.len(), 5);
    assert!(turns[1].tool_uses().iter().any(|call| call.id == "tu_1"));
    assert!(turns[2].is_tool_result());
    assert_eq!(turns[3].text(), "Well?");

    // The abandoned turn's round-trip was recorded once, on its own.
    let totals = session.ledger().totals();
    assert_eq!(totals.total_requests, 2);
    assert_eq!(totals.total_tokens, 120 + 330);
}

#[tokio::test]
async fn clear_conversation_waits_for_dispatch_then_empties_store() {
    let client = FakeToolClient::new(&["get_cost"]).with_delay(Duration::from_millis(100));
    let probe = client.probe();
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![tool_response("tu_1", "get_cost", json!({}), None)]));
    let mut session = AgentSession::new(
        config(),
        endpoint.clone(),
        registry_with(client).await,
        Arc::new(RateTable::builtin()),
    )
    .expect("session should build");

    let _ = tokio::time::timeout(Duration::from_millis(20), session.run("What did I spend?")).await;
    session.clear_conversation().await;

    assert_eq!(probe.completed.load(Ordering::SeqCst), 1);
    assert!(session.snapshot().is_empty());
    assert_eq!(session.state(), TurnState::Idle);
    assert_eq!(session.ledger().totals().total_requests, 1);
}

#[tokio::test]
async fn tool_iteration_limit_fails_the_turn() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![
        tool_response("tu_1", "get_cost", json!({}), Some(Usage::new(10, 1))),
        tool_response("tu_2", "get_cost", json!({}), Some(Usage::new(10, 1))),
        tool_response("tu_3", "get_cost", json!({}), Some(Usage::new(10, 1))),
    ]));
    let config = SessionConfig::builder()
        .model_id(MODEL_ID)
        .system_prompt(SYSTEM)
        .max_tool_iterations(2)
        .build();
    let (mut session, probe) = session(&endpoint, config).await;

    let err = session.run("Loop forever").await.expect_err("runaway tool loop should stop");

    assert!(matches!(
        err,
        FinOpsError::ModelEndpoint { turn_index: Some(0), status: None, ref message }
            if message.contains("limit of 2")
    ));
    assert_eq!(probe.completed.load(Ordering::SeqCst), 2);
    assert_eq!(session.state(), TurnState::Idle);

    let totals = session.ledger().totals();
    assert_eq!(totals.total_requests, 1);
    assert_eq!(totals.total_tokens, 33);
}

#[tokio::test]
async fn unknown_model_is_rejected_at_construction() {
    let endpoint = Arc::new(ScriptedEndpoint::new(Vec::new()));
    let config = SessionConfig::builder()
        .model_id("gpt-unknown")
        .system_prompt(SYSTEM)
        .build();

    let err = AgentSession::new(config, endpoint, ToolRegistry::new(), Arc::new(RateTable::builtin()))
        .expect_err("unpriced model should be rejected");

    assert!(matches!(err, FinOpsError::Config(ref msg) if msg.contains("gpt-unknown")));
}

#[tokio::test]
async fn out_of_range_summarization_settings_are_rejected() {
    let cases = [
        ("context_window", SessionConfig::builder().model_id(MODEL_ID).context_window(0).build()),
        (
            "summarize_threshold",
            SessionConfig::builder().model_id(MODEL_ID).summarize_threshold(1.5).build(),
        ),
        (
            "summarize_threshold",
            SessionConfig::builder().model_id(MODEL_ID).summarize_threshold(0.0).build(),
        ),
        ("summary_ratio", SessionConfig::builder().model_id(MODEL_ID).summary_ratio(-0.1).build()),
    ];

    for (field, config) in cases {
        let endpoint = Arc::new(ScriptedEndpoint::new(Vec::new()));
        let err = AgentSession::new(config, endpoint, ToolRegistry::new(), Arc::new(RateTable::builtin()))
            .expect_err("out-of-range setting should be rejected");
        assert!(
            matches!(err, FinOpsError::Config(ref msg) if msg.contains(field)),
            "expected a config error naming {field}, got {err:?}"
        );
    }
}

#[tokio::test]
async fn endpoint_failure_carries_turn_index() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![text_response("first", None)]));
    let (mut session, _probe) = session(&endpoint, config()).await;

    session.run("one").await.expect("first turn should succeed");
    let err = session.run("two").await.expect_err("script is exhausted");

    assert!(matches!(err, FinOpsError::ModelEndpoint { turn_index: Some(1), .. }));
    assert_eq!(session.state(), TurnState::Idle);
}

fn tight_config() -> SessionConfig {
    SessionConfig::builder()
        .model_id(MODEL_ID)
        .system_prompt(SYSTEM)
        .context_window(40)
        .preserve_recent_messages(2)
        .build()
}

#[tokio::test]
async fn summarization_folds_history_and_is_billed_to_the_turn() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![
        text_response("EC2 cost $1,204.33 in March; rightsizing could save $300.", Some(Usage::new(100, 20))),
        text_response("S3 was $87.10.", Some(Usage::new(200, 40))),
    ]));
    let (mut session, _probe) = session(&endpoint, tight_config()).await;

    let first = session.run("What did EC2 cost in March?").await.expect("first turn should succeed");
    assert!(!first.summarized);

    let second = session.run("And S3?").await.expect("second turn should succeed");
    assert!(second.summarized);
    assert_eq!(endpoint.summary_requests(), 1);
    assert_eq!(second.usage, Usage::new(200 + 500, 40 + 50));
    assert_eq!(second.usage_source, UsageSource::Exact);

    let turns = session.snapshot();
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[0].role, Role::Assistant);
    assert!(turns[0].text().contains("What did EC2 cost in March?"));
    assert!(turns[1].text().contains("$1,204.33"));
    assert_eq!(turns[2].text(), "And S3?");
    assert_eq!(turns[3].text(), "S3 was $87.10.");
}

#[tokio::test]
async fn failed_summarization_keeps_history_and_finishes_the_turn() {
    let endpoint = Arc::new(
        ScriptedEndpoint::new(vec![
            text_response(
                "EC2 cost $1,204.33 in March; rightsizing could save $300.",
                Some(Usage::new(100, 20)),
            ),
            text_response("S3 was $87.10.", Some(Usage::new(200, 40))),
        ])
        .failing_summaries(),
    );
    let (mut session, _probe) = session(&endpoint, tight_config()).await;

    session.run("What did EC2 cost in March?").await.expect("first turn should succeed");
    let outcome = session.run("S3?").await.expect("summary failure should not fail the turn");

    assert!(!outcome.summarized);
    assert_eq!(outcome.answer, "S3 was $87.10.");
    assert_eq!(endpoint.summary_requests(), 1);

    let turns = session.snapshot();
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[0].text(), "What did EC2 cost in March?");
}

#[tokio::test]
async fn sessions_can_share_a_ledger() {
    let ledger = UsageLedger::new();
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![
        text_response("a", Some(Usage::new(10, 1))),
        text_response("b", Some(Usage::new(20, 2))),
    ]));
    let (first, _) = session(&endpoint, config()).await;
    let (second, _) = session(&endpoint, config()).await;
    let mut first = first.with_ledger(ledger.clone());
    let mut second = second.with_ledger(ledger.clone());

    first.run("one").await.expect("first session should answer");
    second.run("two").await.expect("second session should answer");

    assert_ne!(first.id(), second.id());
    assert_eq!(first.snapshot().len(), 2);
    assert_eq!(second.snapshot().len(), 2);
    assert_eq!(ledger.totals().total_tokens, 33);
}

#[tokio::test]
async fn close_shuts_down_providers() {
    let endpoint = Arc::new(ScriptedEndpoint::new(Vec::new()));
    let (mut session, probe) = session(&endpoint, config()).await;

    session.close().await;
    session.close().await;

    assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 1);
    assert!(!probe.alive.load(Ordering::SeqCst));
}
