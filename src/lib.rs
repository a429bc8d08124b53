//! finops-agent: the session core of a FinOps chat assistant.
//!
//! Supervises tool provider subprocesses spoken to over MCP, keeps a
//! token-budgeted conversation per session, drives the model/tool loop,
//! and accounts for the cost of every turn.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use finops_agent::prelude::*;
//!
//! # async fn example() -> finops_agent::error::Result<()> {
//! let config = AgentConfig::load(None)?;
//! let endpoint = Arc::new(AnthropicEndpoint::from_config(&config)?);
//!
//! let mut registry = ToolRegistry::new();
//! registry
//!     .register_all(finops_agent::mcp::connections_from_config(&config, None).await?)
//!     .await;
//!
//! let mut session = AgentSession::new(
//!     SessionConfig::from_agent_config(&config),
//!     endpoint,
//!     registry,
//!     Arc::new(config.rates.clone()),
//! )?;
//! let outcome = session.run("What did I spend on EC2 last month?").await?;
//! println!("{} (${:.4})", outcome.answer, outcome.cost.total_cost);
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod auth;
pub mod config;
pub mod conversation;
pub mod error;
pub mod mcp;
pub mod prelude;
pub mod provider;
pub mod tools;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
