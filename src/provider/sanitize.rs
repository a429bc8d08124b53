//! Transcript cleanup before turns go over the wire.
//!
//! The Messages API wants strictly alternating roles, every `tool_use` answered
//! by a `tool_result` in the very next message, and no result without its call.
//! Summarization and abandoned turns can leave histories that break those
//! rules, so the request body is always built from [`sanitize_turns`].

use std::collections::HashSet;

use crate::types::{ContentBlock, Role, ToolResult, Turn};

/// Opening user message when history starts with the assistant summary turn.
pub const CONTINUATION_PROMPT: &str = "Continue our conversation.";

pub fn sanitize_turns(turns: &[Turn]) -> Vec<Turn> {
    let stripped: Vec<Turn> = turns.iter().filter_map(strip_reasoning).collect();
    let paired = pair_tool_blocks(&stripped);
    let mut merged = merge_same_role(paired);

    if merged.first().is_some_and(|turn| turn.role == Role::Assistant) {
        merged.insert(0, Turn::user(CONTINUATION_PROMPT));
    }
    merged
}

fn strip_reasoning(turn: &Turn) -> Option<Turn> {
    let content: Vec<ContentBlock> = turn
        .content
        .iter()
        .filter(|block| !matches!(block, ContentBlock::Reasoning { .. }))
        .cloned()
        .collect();
    if content.is_empty() {
        return None;
    }
    Some(Turn {
        role: turn.role,
        content,
        usage: turn.usage,
    })
}

fn tool_use_ids(turn: &Turn) -> HashSet<&str> {
    turn.tool_uses().into_iter().map(|call| call.id.as_str()).collect()
}

fn tool_result_ids(turn: &Turn) -> HashSet<&str> {
    turn.content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolResult(result) => Some(result.tool_use_id.as_str()),
            _ => None,
        })
        .collect()
}

/// Keep a tool use only if the next turn answers it; keep a tool result only
/// if the previous turn asked for it. Orphaned results become plain text so
/// the facts they carry still reach the model.
fn pair_tool_blocks(turns: &[Turn]) -> Vec<Turn> {
    let mut out = Vec::with_capacity(turns.len());

    for (i, turn) in turns.iter().enumerate() {
        let content: Vec<ContentBlock> = match turn.role {
            Role::Assistant => {
                let answered = turns
                    .get(i + 1)
                    .filter(|next| next.role == Role::User)
                    .map(tool_result_ids)
                    .unwrap_or_default();
                turn.content
                    .iter()
                    .filter(|block| match block {
                        ContentBlock::ToolUse(call) => answered.contains(call.id.as_str()),
                        _ => true,
                    })
                    .cloned()
                    .collect()
            }
            Role::User => {
                let requested = i
                    .checked_sub(1)
                    .and_then(|prev| turns.get(prev))
                    .filter(|prev| prev.role == Role::Assistant)
                    .map(tool_use_ids)
                    .unwrap_or_default();
                turn.content
                    .iter()
                    .map(|block| match block {
                        ContentBlock::ToolResult(result)
                            if !requested.contains(result.tool_use_id.as_str()) =>
                        {
                            orphan_to_text(result)
                        }
                        other => other.clone(),
                    })
                    .collect()
            }
        };

        if !content.is_empty() {
            out.push(Turn {
                role: turn.role,
                content,
                usage: turn.usage,
            });
        }
    }
    out
}

fn orphan_to_text(result: &ToolResult) -> ContentBlock {
    let label = if result.is_error() {
        "Earlier tool error"
    } else {
        "Earlier tool result"
    };
    ContentBlock::text(format!("{label}: {}", result.text()))
}

fn merge_same_role(turns: Vec<Turn>) -> Vec<Turn> {
    let mut out: Vec<Turn> = Vec::with_capacity(turns.len());
    for turn in turns {
        match out.last_mut() {
            Some(prev) if prev.role == turn.role => prev.content.extend(turn.content),
            _ => out.push(turn),
        }
    }
    out
}
