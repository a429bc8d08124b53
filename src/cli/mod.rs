//! CLI definitions for the `finops-agent` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::AgentConfig;
use crate::error::Result;
use crate::util::tokens::estimate_tokens;

/// FinOps assistant
#[derive(Parser, Debug)]
#[command(name = "finops-agent", version, about = "Chat with a FinOps assistant backed by AWS cost tools")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive chat (or a single prompt with --prompt)
    Chat(ChatArgs),
    /// Start the tool providers and list the tools they expose
    Tools(ToolsArgs),
    /// Estimate tokens and input cost for a piece of text
    Estimate(EstimateArgs),
}

#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Config file (defaults to FINOPS_AGENT_CONFIG or the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Model id, overriding configuration
    #[arg(short, long)]
    pub model: Option<String>,

    /// Wait for complete answers instead of streaming
    #[arg(long)]
    pub no_stream: bool,

    /// Run a single prompt and exit
    #[arg(short, long)]
    pub prompt: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ToolsArgs {
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct EstimateArgs {
    /// Text to estimate
    pub text: String,

    /// Model id whose input rate is applied (defaults to the configured model)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Config file supplying the rate table
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Token count and input cost of a piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextEstimate {
    pub model_id: String,
    pub tokens: u64,
    pub input_cost: f64,
}

impl EstimateArgs {
    /// Price the text with the configured rate table.
    pub fn estimate(&self, config: &AgentConfig) -> Result<TextEstimate> {
        let model_id = self.model.clone().unwrap_or_else(|| config.model_id.clone());
        let tokens = estimate_tokens(&self.text);
        let cost = config.rates.rate(&model_id)?.cost(tokens, 0);
        Ok(TextEstimate {
            model_id,
            tokens,
            input_cost: cost.input_cost,
        })
    }
}

/// A line typed at the chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Ask(String),
    Usage,
    ResetUsage,
    Fresh,
    Quit,
    Empty,
    Unknown(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line {
            "" => Self::Empty,
            "/usage" => Self::Usage,
            "/reset" => Self::ResetUsage,
            "/fresh" => Self::Fresh,
            "/quit" | "/exit" => Self::Quit,
            other if other.starts_with('/') => Self::Unknown(other.to_string()),
            other => Self::Ask(other.to_string()),
        }
    }
}
