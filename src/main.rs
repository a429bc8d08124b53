//! finops-agent CLI binary entry point.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use finops_agent::agent::{AgentSession, EventSink, SessionConfig, TurnOutcome};
use finops_agent::cli::{ChatArgs, Cli, Commands, EstimateArgs, ReplCommand, ToolsArgs};
use finops_agent::config::{AgentConfig, RoleAssumer, StsRoleAssumer};
use finops_agent::conversation::LengthAdvisory;
use finops_agent::error::{FinOpsError, Result};
use finops_agent::mcp::connections_from_config;
use finops_agent::provider::AnthropicEndpoint;
use finops_agent::tools::ToolRegistry;
use finops_agent::types::{ToolResult, ToolUse};
use finops_agent::util::usage::UsageLedger;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Chat(args) => handle_chat(args).await,
        Commands::Tools(args) => handle_tools(args).await,
        Commands::Estimate(args) => handle_estimate(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        if let Some(hint) = hint_for(&e) {
            eprintln!("Hint: {hint}");
        }
        std::process::exit(1);
    }
}

fn hint_for(error: &FinOpsError) -> Option<&'static str> {
    match error {
        FinOpsError::Config(_) => Some("check your config file and environment variables"),
        FinOpsError::ModelEndpoint {
            status: Some(401 | 403),
            ..
        } => Some("check ANTHROPIC_API_KEY"),
        _ => None,
    }
}

struct TerminalSink;

impl EventSink for TerminalSink {
    fn on_text(&mut self, delta: &str) {
        print!("{delta}");
        let _ = std::io::stdout().flush();
    }

    fn on_reasoning(&mut self, _delta: &str) {}

    fn on_tool_use(&mut self, call: &ToolUse) {
        eprintln!("\n🔧 {} {}", call.name, call.input);
    }

    fn on_tool_result(&mut self, call: &ToolUse, result: &ToolResult) {
        let marker = if result.is_error() { "❌" } else { "✅" };
        eprintln!("  {marker} {} {}", call.name, truncate(&result.text(), 200));
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

async fn assumer_for(config: &AgentConfig) -> Option<StsRoleAssumer> {
    config.target_role_arn.as_ref()?;
    Some(StsRoleAssumer::from_region(config.aws_region.clone()).await)
}

async fn open_registry(config: &AgentConfig) -> Result<ToolRegistry> {
    let assumer = assumer_for(config).await;
    let connections = connections_from_config(
        config,
        assumer.as_ref().map(|a| a as &dyn RoleAssumer),
    )
    .await?;

    let mut registry = ToolRegistry::new();
    registry.register_all(connections).await;
    for diagnostic in registry.diagnostics() {
        eprintln!("⚠️  {diagnostic}");
    }
    Ok(registry)
}

fn load_config(path: Option<&Path>, model: Option<String>) -> Result<AgentConfig> {
    let mut config = AgentConfig::load(path)?;
    if let Some(model) = model {
        config.model_id = model;
        config.validate()?;
    }
    Ok(config)
}

async fn handle_tools(args: ToolsArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), None)?;
    let registry = open_registry(&config).await?;

    for tool in registry.descriptors() {
        let summary = tool.description.lines().next().unwrap_or_default();
        println!("{:<10} {:<40} {}", tool.provider_id, tool.name, summary);
    }
    println!("{} tools from {} providers", registry.len(), registry.provider_ids().len());

    registry.close_all().await;
    Ok(())
}

fn handle_estimate(args: EstimateArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), None)?;
    let estimate = args.estimate(&config)?;

    println!("tokens: {}", estimate.tokens);
    println!("input cost ({}): ${:.6}", estimate.model_id, estimate.input_cost);
    Ok(())
}

async fn handle_chat(args: ChatArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), args.model)?;
    let endpoint = Arc::new(AnthropicEndpoint::from_config(&config)?);
    let registry = open_registry(&config).await?;
    if registry.is_empty() {
        eprintln!("⚠️  no tools available; answers will not use live AWS data");
    }

    let ledger = UsageLedger::new();
    let mut session = AgentSession::new(
        SessionConfig::from_agent_config(&config),
        endpoint,
        registry,
        Arc::new(config.rates.clone()),
    )?
    .with_ledger(ledger.clone());

    let streaming = !args.no_stream;
    let result = match args.prompt {
        Some(prompt) => ask(&mut session, &prompt, streaming).await,
        None => repl(&mut session, &ledger, streaming).await,
    };

    session.close().await;
    result
}

async fn ask(session: &mut AgentSession, prompt: &str, streaming: bool) -> Result<()> {
    let outcome = if streaming {
        let mut sink = TerminalSink;
        let outcome = session.run_streaming(prompt, &mut sink).await?;
        println!();
        outcome
    } else {
        let outcome = session.run(prompt).await?;
        println!("{}", outcome.answer);
        outcome
    };
    print_metrics(&outcome);
    Ok(())
}

async fn repl(session: &mut AgentSession, ledger: &UsageLedger, streaming: bool) -> Result<()> {
    eprintln!("FinOps assistant. Commands: /usage /reset /fresh /quit");
    let stdin = std::io::stdin();

    loop {
        eprint!("\n> ");
        let _ = std::io::stderr().flush();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }

        match ReplCommand::parse(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Quit => return Ok(()),
            ReplCommand::Usage => print_usage(ledger),
            ReplCommand::ResetUsage => {
                ledger.reset();
                eprintln!("usage statistics reset");
            }
            ReplCommand::Fresh => {
                session.clear_conversation().await;
                eprintln!("started a fresh conversation");
            }
            ReplCommand::Unknown(command) => eprintln!("unknown command {command}"),
            ReplCommand::Ask(prompt) => {
                // A failed turn is reported and the chat continues.
                if let Err(e) = ask(session, &prompt, streaming).await {
                    eprintln!("Error: {e}");
                }
                match session.length_advisory() {
                    LengthAdvisory::Ok => {}
                    LengthAdvisory::Growing => {
                        eprintln!("ℹ️  conversation is growing; /fresh starts over")
                    }
                    LengthAdvisory::Long => {
                        eprintln!("⚠️  long conversation; /fresh is recommended to keep costs down")
                    }
                }
            }
        }
    }
}

fn print_metrics(outcome: &TurnOutcome) {
    eprintln!(
        "[turn {}] {} in / {} out tokens ({}), ${:.4}, {} tool calls{}, {:.1}s",
        outcome.turn_index,
        outcome.usage.input_tokens,
        outcome.usage.output_tokens,
        outcome.usage_source,
        outcome.cost.total_cost,
        outcome.tool_calls,
        if outcome.summarized { ", summarized" } else { "" },
        outcome.elapsed.as_secs_f64(),
    );
}

fn print_usage(ledger: &UsageLedger) {
    let totals = ledger.totals();
    let projection = ledger.default_projection();
    eprintln!("since {}", ledger.since().format("%Y-%m-%d %H:%M UTC"));
    eprintln!(
        "requests: {} ({} exact, {} estimated)",
        totals.total_requests, totals.exact_requests, totals.estimated_requests
    );
    eprintln!(
        "tokens: {} ({} in / {} out)",
        totals.total_tokens, totals.input_tokens, totals.output_tokens
    );
    eprintln!(
        "cost: ${:.4} (${:.4} in / ${:.4} out)",
        totals.total_cost_usd, totals.input_cost_usd, totals.output_cost_usd
    );
    eprintln!(
        "projection: ${:.4}/request, ${:.2}/day, ${:.2}/month",
        projection.average_cost_per_request, projection.daily, projection.monthly
    );
}
