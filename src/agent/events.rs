//! Streaming event sink and fragment coalescing.

use crate::types::{ContentBlock, ToolResult, ToolUse};

/// Receives incremental output from [`AgentSession::run_streaming`](super::AgentSession::run_streaming).
///
/// Deltas arrive in model order. Tool results are reported after the
/// whole batch for one model response has been dispatched.
pub trait EventSink: Send {
    fn on_text(&mut self, delta: &str);

    fn on_reasoning(&mut self, delta: &str);

    fn on_tool_use(&mut self, call: &ToolUse);

    fn on_tool_result(&mut self, _call: &ToolUse, _result: &ToolResult) {}
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_text(&mut self, _delta: &str) {}
    fn on_reasoning(&mut self, _delta: &str) {}
    fn on_tool_use(&mut self, _call: &ToolUse) {}
}

/// Merges consecutive fragments of the same kind into single content blocks.
#[derive(Debug, Default)]
pub struct BlockCoalescer {
    blocks: Vec<ContentBlock>,
}

impl BlockCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        match self.blocks.last_mut() {
            Some(ContentBlock::Text { text }) => text.push_str(delta),
            _ => self.blocks.push(ContentBlock::text(delta)),
        }
    }

    pub fn push_reasoning(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        match self.blocks.last_mut() {
            Some(ContentBlock::Reasoning { text }) => text.push_str(delta),
            _ => self.blocks.push(ContentBlock::reasoning(delta)),
        }
    }

    pub fn push_tool_use(&mut self, call: ToolUse) {
        self.blocks.push(ContentBlock::ToolUse(call));
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn finish(self) -> Vec<ContentBlock> {
        self.blocks
    }
}
