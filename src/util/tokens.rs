//! Token estimation for when the model endpoint does not report usage.
//!
//! The estimate is a pure function of character count: one token per 3.2
//! characters, rounded up. Exact endpoint-reported usage always wins over
//! anything computed here.

use serde_json::Value;

use crate::types::{ContentBlock, Turn};

/// Estimate tokens for a text payload: `max(1, ceil(chars / 3.2))`, or 0 when empty.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    if chars == 0 {
        return 0;
    }
    // ceil(chars / 3.2) == ceil(chars * 5 / 16), kept in integers so the
    // result never depends on float rounding.
    ((chars * 5 + 15) / 16).max(1)
}

/// Estimate tokens for structured content by serializing each field to
/// text and summing.
pub fn estimate_value_tokens(value: &Value) -> u64 {
    match value {
        Value::Null => 0,
        Value::Bool(_) | Value::Number(_) => estimate_tokens(&value.to_string()),
        Value::String(text) => estimate_tokens(text),
        Value::Array(items) => items.iter().map(estimate_value_tokens).sum(),
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| estimate_tokens(key) + estimate_value_tokens(value))
            .sum(),
    }
}

/// Estimate tokens for one content block, including tool payloads.
pub fn estimate_block_tokens(block: &ContentBlock) -> u64 {
    match block {
        ContentBlock::Text { text } | ContentBlock::Reasoning { text } => estimate_tokens(text),
        ContentBlock::ToolUse(call) => {
            estimate_tokens(&call.id) + estimate_tokens(&call.name) + estimate_value_tokens(&call.input)
        }
        ContentBlock::ToolResult(result) => {
            estimate_tokens(&result.tool_use_id)
                + estimate_tokens(&result.status.to_string())
                + result.content.iter().map(estimate_block_tokens).sum::<u64>()
        }
    }
}

/// Estimate tokens for a turn: its role label plus every block.
pub fn estimate_turn_tokens(turn: &Turn) -> u64 {
    estimate_tokens(&turn.role.to_string())
        + turn.content.iter().map(estimate_block_tokens).sum::<u64>()
}

/// Estimate tokens for everything a conversation sends to the model.
pub fn estimate_conversation_tokens(turns: &[Turn], system_prompt: &str) -> u64 {
    estimate_tokens(system_prompt) + turns.iter().map(estimate_turn_tokens).sum::<u64>()
}
