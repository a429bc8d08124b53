//! Streaming types.

use serde::{Deserialize, Serialize};
use strum::Display;

use super::message::ToolUse;
use super::usage::Usage;

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Other,
}

impl StopReason {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "end_turn" => Self::EndTurn,
            "tool_use" => Self::ToolUse,
            "max_tokens" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            _ => Self::Other,
        }
    }
}

/// One incremental event from a streaming model response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ReasoningDelta(String),
    /// A complete tool use; emitted once its arguments have fully arrived.
    ToolUse(ToolUse),
    /// Running usage totals for the response. Later events supersede earlier ones.
    Usage(Usage),
    Stop(StopReason),
}
