use std::time::Duration;

use futures::StreamExt;
use finops_agent::error::FinOpsError;
use finops_agent::provider::{AnthropicEndpoint, ModelEndpoint, ModelRequest};
use finops_agent::types::{ContentBlock, StopReason, StreamEvent, Turn, Usage};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "claude-3-7-sonnet-20250219";

fn endpoint(server: &MockServer) -> AnthropicEndpoint {
    AnthropicEndpoint::new(MODEL, "test-key", Some(server.uri()))
}

fn request() -> ModelRequest {
    ModelRequest {
        model_id: MODEL.into(),
        system_prompt: "You are a FinOps assistant.".into(),
        turns: vec![Turn::user("What did EC2 cost?")],
        tools: Vec::new(),
        max_output_tokens: 1024,
    }
}

#[tokio::test]
async fn complete_parses_text_tool_use_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({"model": MODEL, "max_tokens": 1024})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_cost", "input": {"service": "EC2"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 321, "output_tokens": 45}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = endpoint(&server)
        .complete(&request())
        .await
        .expect("complete should succeed");

    assert_eq!(response.usage, Some(Usage::new(321, 45)));
    assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
    assert_eq!(response.content[0], ContentBlock::text("Checking."));
    assert!(matches!(
        &response.content[1],
        ContentBlock::ToolUse(call) if call.name == "get_cost" && call.input == json!({"service": "EC2"})
    ));
}

#[tokio::test]
async fn stream_yields_ordered_events() {
    let sse = [
        json!({"type": "message_start", "message": {"usage": {"input_tokens": 120, "output_tokens": 1}}}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "EC2 was "}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "$310."}}),
        json!({"type": "content_block_stop", "index": 0}),
        json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 9}}),
        json!({"type": "message_stop"}),
    ]
    .iter()
    .map(|event| format!("event: {}\ndata: {event}\n\n", event["type"].as_str().unwrap_or("")))
    .collect::<String>();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .mount(&server)
        .await;

    let events: Vec<StreamEvent> = endpoint(&server)
        .stream(&request())
        .await
        .expect("stream should open")
        .map(|event| event.expect("event should decode"))
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            StreamEvent::TextDelta("EC2 was ".into()),
            StreamEvent::TextDelta("$310.".into()),
            StreamEvent::Usage(Usage::new(120, 9)),
            StreamEvent::Stop(StopReason::EndTurn),
        ]
    );
}

/// Reads one HTTP request off the socket, headers and body.
async fn read_request(socket: &mut TcpStream) {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.expect("request should be readable");
        if n == 0 {
            return;
        }
        received.extend_from_slice(&buf[..n]);
        let Some(head_end) = received.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&received[..head_end]).to_ascii_lowercase();
        let body_len = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if received.len() >= head_end + 4 + body_len {
            return;
        }
    }
}

#[tokio::test]
async fn stream_keeps_characters_split_across_network_chunks() {
    let body = [
        json!({"type": "message_start", "message": {"usage": {"input_tokens": 10, "output_tokens": 1}}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Cost: \u{20ac}42"}}),
        json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 4}}),
    ]
    .iter()
    .map(|event| format!("data: {event}\n\n"))
    .collect::<String>()
    .into_bytes();
    let split = body
        .iter()
        .position(|b| *b == 0xE2)
        .expect("body should carry the euro sign")
        + 1;

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
    let addr = listener.local_addr().expect("listener should have an address");
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("client should connect");
        read_request(&mut socket).await;
        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n",
            )
            .await
            .expect("head should be written");
        for part in [&body[..split], &body[split..]] {
            socket
                .write_all(format!("{:x}\r\n", part.len()).as_bytes())
                .await
                .expect("chunk size should be written");
            socket.write_all(part).await.expect("chunk should be written");
            socket.write_all(b"\r\n").await.expect("chunk end should be written");
            socket.flush().await.expect("chunk should flush");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        socket.write_all(b"0\r\n\r\n").await.expect("trailer should be written");
        socket.flush().await.expect("trailer should flush");
    });

    let endpoint = AnthropicEndpoint::new(MODEL, "test-key", Some(format!("http://{addr}")));
    let events: Vec<StreamEvent> = endpoint
        .stream(&request())
        .await
        .expect("stream should open")
        .map(|event| event.expect("event should decode"))
        .collect()
        .await;
    server.await.expect("server task should finish");

    let text: String = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::TextDelta(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "Cost: \u{20ac}42");
    assert!(events.contains(&StreamEvent::Usage(Usage::new(10, 4))));
}

#[tokio::test]
async fn server_error_becomes_endpoint_error_with_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "type": "error",
            "error": {"type": "api_error", "message": "Internal server error"}
        })))
        .mount(&server)
        .await;

    let err = endpoint(&server)
        .complete(&request())
        .await
        .expect_err("500 should fail");

    assert!(matches!(
        err,
        FinOpsError::ModelEndpoint { status: Some(500), ref message, .. }
            if message.contains("Internal server error")
    ));
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn unauthorized_is_an_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
        .mount(&server)
        .await;

    let err = endpoint(&server)
        .stream(&request())
        .await
        .err()
        .expect("401 should fail before streaming");

    assert!(matches!(err, FinOpsError::ModelEndpoint { status: Some(401), .. }));
    assert_eq!(err.category(), finops_agent::error::ErrorCategory::Authentication);
}
