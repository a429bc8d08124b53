//! Folds old turns into one summary turn when the history outgrows its budget.
//!
//! The trigger is token based: once the estimated size of the system prompt
//! plus every turn exceeds `threshold × context_window`, everything but the
//! most recent `preserve_recent` turns is sent to the model with
//! [`SUMMARIZATION_PROMPT`] and replaced by a single assistant turn.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use super::ConversationStore;
use crate::error::{FinOpsError, Result};
use crate::provider::{ModelEndpoint, ModelRequest};
use crate::types::{ContentBlock, Role, Turn, Usage};
use crate::util::tokens::{estimate_conversation_tokens, estimate_tokens};

/// Instructions for the summarization round-trip.
pub const SUMMARIZATION_PROMPT: &str = r#"You condense FinOps conversations so they can continue within a limited context.

Summarize the transcript you are given. Keep, as structured bullet points:
- AWS cost findings with every specific dollar amount exactly as written
- Service recommendations and cost optimization opportunities
- The user's business goals and cost concerns
- Key resource configurations and usage patterns
- Billing insights and anomalies

Drop pleasantries and tool mechanics. Do not invent figures.
Focus on facts that support the next cost decision."#;

/// Prefix of the synthetic summary turn's text.
pub const SUMMARY_HEADER: &str = "Summary of earlier conversation:";

/// Lower bound on the summary output budget.
const MIN_SUMMARY_TOKENS: u32 = 256;

static DOLLAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\s?\d[\d,]*(?:\.\d+)?").expect("dollar amount regex must compile")
});

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummarizerConfig {
    /// Fraction of the context window that triggers summarization.
    pub threshold: f64,
    pub context_window: u64,
    pub preserve_recent: usize,
    /// Summary budget as a fraction of the folded turns' estimated size.
    pub summary_ratio: f64,
    pub max_output_tokens: u32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            context_window: 200_000,
            preserve_recent: 15,
            summary_ratio: 0.3,
            max_output_tokens: 8192,
        }
    }
}

/// Result of one successful summarization.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// The synthetic assistant turn that replaces the folded prefix.
    pub turn: Turn,
    /// How many leading turns it replaces.
    pub folded: usize,
    /// Usage reported by the endpoint, if any.
    pub usage: Option<Usage>,
    /// Estimator figures for the round-trip.
    pub estimated_usage: Usage,
    /// Dollar figures from the folded turns that the summary dropped.
    pub missing_amounts: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Summarizer {
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(config: SummarizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SummarizerConfig {
        &self.config
    }

    /// Token count above which the history must be summarized.
    pub fn trigger_tokens(&self) -> u64 {
        (self.config.context_window as f64 * self.config.threshold) as u64
    }

    pub fn needs_summary(&self, turns: &[Turn], system_prompt: &str) -> bool {
        turns.len() > self.config.preserve_recent
            && estimate_conversation_tokens(turns, system_prompt) > self.trigger_tokens()
    }

    /// Output budget for summarizing `folded` turns.
    pub fn summary_budget(&self, folded: &[Turn]) -> u32 {
        let folded_tokens = estimate_conversation_tokens(folded, "");
        let scaled = (folded_tokens as f64 * self.config.summary_ratio).ceil();
        let scaled = if scaled >= u32::MAX as f64 {
            u32::MAX
        } else {
            scaled as u32
        };
        scaled
            .max(MIN_SUMMARY_TOKENS)
            .min(self.config.max_output_tokens)
    }

    /// Summarize everything but the most recent turns.
    ///
    /// Returns `Ok(None)` when there is nothing old enough to fold. Any
    /// endpoint failure becomes a recoverable `Summarization` error; the
    /// caller's turns are never touched here.
    pub async fn summarize(
        &self,
        endpoint: &dyn ModelEndpoint,
        turns: &[Turn],
        turn_index: usize,
    ) -> Result<Option<Summary>> {
        let folded = turns.len().saturating_sub(self.config.preserve_recent);
        if folded == 0 {
            return Ok(None);
        }
        let prefix = &turns[..folded];

        let request = ModelRequest {
            model_id: endpoint.model_id().to_string(),
            system_prompt: SUMMARIZATION_PROMPT.to_string(),
            turns: vec![Turn::user(transcript_for_summary(prefix))],
            tools: Vec::new(),
            max_output_tokens: self.summary_budget(prefix),
        };
        debug!(turn_index, folded, budget = request.max_output_tokens, "requesting summary");

        let response = endpoint
            .complete(&request)
            .await
            .map_err(|e| FinOpsError::Summarization {
                turn_index,
                message: e.to_string(),
            })?;

        let text: String = response
            .content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n");
        let text = text.trim();
        if text.is_empty() {
            return Err(FinOpsError::Summarization {
                turn_index,
                message: "model returned an empty summary".into(),
            });
        }

        let missing_amounts = missing_dollar_amounts(prefix, text);
        if !missing_amounts.is_empty() {
            warn!(turn_index, missing = ?missing_amounts, "summary dropped dollar amounts");
        }

        let estimated_usage = Usage::new(
            request.estimated_input_tokens(),
            response.estimated_output_tokens(),
        );
        let turn = Turn::assistant(vec![ContentBlock::text(format!(
            "{SUMMARY_HEADER}\n{text}"
        ))])
        .with_usage(response.usage);

        info!(turn_index, folded, summary_tokens = estimate_tokens(text), "conversation summarized");
        Ok(Some(Summary {
            turn,
            folded,
            usage: response.usage,
            estimated_usage,
            missing_amounts,
        }))
    }

    /// Check the threshold and, if crossed, summarize and fold `store` in place.
    ///
    /// On failure the store is left exactly as it was.
    pub async fn compact(
        &self,
        endpoint: &dyn ModelEndpoint,
        store: &mut ConversationStore,
        system_prompt: &str,
        turn_index: usize,
    ) -> Result<Option<Summary>> {
        if !self.needs_summary(store.turns(), system_prompt) {
            return Ok(None);
        }
        let Some(summary) = self.summarize(endpoint, store.turns(), turn_index).await? else {
            return Ok(None);
        };
        store.replace_prefix(summary.folded, summary.turn.clone())?;
        Ok(Some(summary))
    }
}

/// Flatten turns into a labelled plain-text transcript for the summary request.
pub fn transcript_for_summary(turns: &[Turn]) -> String {
    let mut lines = Vec::new();
    for turn in turns {
        for block in &turn.content {
            match (turn.role, block) {
                (Role::User, ContentBlock::Text { text }) => lines.push(format!("[user] {text}")),
                (Role::Assistant, ContentBlock::Text { text }) => {
                    lines.push(format!("[assistant] {text}"))
                }
                (_, ContentBlock::ToolUse(call)) => {
                    lines.push(format!("[assistant.tool_use] {} {}", call.name, call.input))
                }
                (_, ContentBlock::ToolResult(result)) => lines.push(format!(
                    "[tool_result] status={} {}",
                    result.status,
                    result.text()
                )),
                (_, ContentBlock::Reasoning { .. }) => {}
            }
        }
    }
    lines.join("\n")
}

fn normalize_amount(raw: &str) -> String {
    raw.chars().filter(|c| !matches!(c, ' ' | ',')).collect()
}

fn dollar_amounts(text: &str) -> BTreeSet<String> {
    DOLLAR_RE
        .find_iter(text)
        .map(|m| normalize_amount(m.as_str()))
        .collect()
}

fn missing_dollar_amounts(folded: &[Turn], summary: &str) -> Vec<String> {
    let kept = dollar_amounts(summary);
    dollar_amounts(&transcript_for_summary(folded))
        .into_iter()
        .filter(|amount| !kept.contains(amount))
        .collect()
}
