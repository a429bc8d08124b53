//! Model endpoint trait and the Anthropic Messages implementation.

pub mod anthropic;
pub mod http;
pub mod sanitize;

pub use anthropic::AnthropicEndpoint;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::tools::ToolDescriptor;
use crate::types::{ContentBlock, StopReason, StreamEvent, Turn, Usage};
use crate::util::tokens::{
    estimate_block_tokens, estimate_conversation_tokens, estimate_tokens, estimate_value_tokens,
};

/// Everything sent to the model for one round-trip.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model_id: String,
    pub system_prompt: String,
    pub turns: Vec<Turn>,
    pub tools: Vec<ToolDescriptor>,
    pub max_output_tokens: u32,
}

impl ModelRequest {
    /// Estimated input size, used when the endpoint does not report usage.
    ///
    /// Tool descriptors are transmitted too, so they are counted alongside
    /// the system prompt and turns.
    pub fn estimated_input_tokens(&self) -> u64 {
        let tools: u64 = self
            .tools
            .iter()
            .map(|tool| {
                estimate_tokens(&tool.name)
                    + estimate_tokens(&tool.description)
                    + estimate_value_tokens(&tool.input_schema)
            })
            .sum();
        estimate_conversation_tokens(&self.turns, &self.system_prompt) + tools
    }
}

/// One complete model response.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub content: Vec<ContentBlock>,
    /// Exact usage, when the endpoint reported it.
    pub usage: Option<Usage>,
    pub stop_reason: Option<StopReason>,
}

impl ModelResponse {
    pub fn estimated_output_tokens(&self) -> u64 {
        self.content.iter().map(estimate_block_tokens).sum()
    }
}

/// A language model the session can talk to.
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    fn model_id(&self) -> &str;

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse>;

    /// Same content as [`complete`](Self::complete), delivered as ordered
    /// incremental events.
    async fn stream(
        &self,
        request: &ModelRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}
