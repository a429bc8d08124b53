//! Convenience re-exports for common use.

pub use crate::agent::{AgentSession, EventSink, SessionConfig, TurnOutcome, TurnState};
pub use crate::config::{AgentConfig, RateTable};
pub use crate::conversation::{ConversationStore, LengthAdvisory};
pub use crate::error::{FinOpsError, Result};
pub use crate::mcp::{ConnectionState, ProviderConnection};
pub use crate::provider::{AnthropicEndpoint, ModelEndpoint, ModelRequest, ModelResponse};
pub use crate::tools::{ToolDescriptor, ToolRegistry};
pub use crate::types::{
    ContentBlock, Cost, Role, ToolResult, ToolResultStatus, ToolUse, Turn, Usage, UsageSource,
};
pub use crate::util::usage::UsageLedger;
