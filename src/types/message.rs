//! Conversation turns and the content blocks they carry.

use serde::{Deserialize, Serialize};
use strum::Display;

use super::usage::Usage;

/// Who a turn is attributed to.
///
/// Tool results are attributed to the user side of the exchange, which is how
/// the model expects to see them; [`Turn::is_tool_result`] tells them apart.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Outcome of a tool invocation as seen by the model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolResultStatus {
    Ok,
    Error,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// The result of a tool invocation, linked back to its [`ToolUse`] by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    #[serde(default)]
    pub tool_use_id: String,
    pub status: ToolResultStatus,
    pub content: Vec<ContentBlock>,
}

impl ToolResult {
    pub fn ok(content: Vec<ContentBlock>) -> Self {
        Self {
            tool_use_id: String::new(),
            status: ToolResultStatus::Ok,
            content,
        }
    }

    /// An error result whose only content is the failure message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            tool_use_id: String::new(),
            status: ToolResultStatus::Error,
            content: vec![ContentBlock::text(message)],
        }
    }

    /// Link this result to the tool use it answers.
    pub fn answering(mut self, tool_use_id: impl Into<String>) -> Self {
        self.tool_use_id = tool_use_id.into();
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolResultStatus::Error
    }

    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        collect_text(&self.content)
    }
}

/// One typed fragment within a turn. Order within a turn is significant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse(ToolUse),
    ToolResult(ToolResult),
    Reasoning { text: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_use(&self) -> Option<&ToolUse> {
        match self {
            Self::ToolUse(call) => Some(call),
            _ => None,
        }
    }
}

/// One role-tagged entry in the conversation.
///
/// Turns are immutable once appended to a
/// [`ConversationStore`](crate::conversation::ConversationStore).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
            usage: None,
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            usage: None,
        }
    }

    /// A user-side turn carrying one result block per tool use, in order.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::User,
            content: results.into_iter().map(ContentBlock::ToolResult).collect(),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: Option<Usage>) -> Self {
        self.usage = usage;
        self
    }

    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        collect_text(&self.content)
    }

    /// Tool uses requested in this turn, in emitted order.
    pub fn tool_uses(&self) -> Vec<&ToolUse> {
        self.content
            .iter()
            .filter_map(ContentBlock::as_tool_use)
            .collect()
    }

    pub fn is_tool_result(&self) -> bool {
        self.role == Role::User
            && !self.content.is_empty()
            && self
                .content
                .iter()
                .all(|block| matches!(block, ContentBlock::ToolResult(_)))
    }
}

fn collect_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(ContentBlock::as_text)
        .collect::<Vec<_>>()
        .join("")
}
