//! In-memory conversation history for one session.

pub mod summarizer;

pub use summarizer::{Summarizer, SummarizerConfig, Summary, SUMMARIZATION_PROMPT};

use serde::Serialize;
use strum::Display;

use crate::error::{FinOpsError, Result};
use crate::types::Turn;

/// Turn count past which the conversation is reported as growing.
pub const GROWING_AFTER_TURNS: usize = 10;
/// Turn count past which the conversation is reported as long.
pub const LONG_AFTER_TURNS: usize = 20;

/// Hint for a UI about whether to suggest starting a fresh chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum LengthAdvisory {
    Ok,
    Growing,
    Long,
}

/// Append-only ordered sequence of turns.
///
/// The one exception to append-only is [`replace_prefix`](Self::replace_prefix),
/// which the summarizer uses to fold old turns into a single summary turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationStore {
    turns: Vec<Turn>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Turns currently eligible to be sent to the model.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Replace the first `count` turns with `replacement`.
    pub fn replace_prefix(&mut self, count: usize, replacement: Turn) -> Result<()> {
        if count > self.turns.len() {
            return Err(FinOpsError::InvalidState(format!(
                "cannot fold {count} turns; store holds {}",
                self.turns.len()
            )));
        }
        self.turns.splice(..count, std::iter::once(replacement));
        Ok(())
    }

    /// Drop every turn ("fresh chat").
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn length_advisory(&self) -> LengthAdvisory {
        match self.turns.len() {
            n if n > LONG_AFTER_TURNS => LengthAdvisory::Long,
            n if n > GROWING_AFTER_TURNS => LengthAdvisory::Growing,
            _ => LengthAdvisory::Ok,
        }
    }
}
