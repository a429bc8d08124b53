//! Tool provider subprocesses spoken to over the Model Context Protocol.
//!
//! [`ProviderConnection`] owns the lifecycle state machine for one provider.
//! The wire work sits behind [`ToolProviderClient`]; the stdio client built on
//! `rmcp` is the production implementation.

pub mod connection;
pub mod transport;

#[cfg(feature = "mcp")]
pub mod client;

pub use connection::{ConnectionState, ConnectionTimeouts, ProviderConnection};
pub use transport::ProviderLaunch;

#[cfg(feature = "mcp")]
pub use client::StdioMcpClient;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::ContentBlock;
use crate::util::timeout::Elapsed;

#[cfg(feature = "mcp")]
use crate::config::{credentials, AgentConfig, RoleAssumer};

/// A tool as advertised by a provider, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvertisedTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// What a provider returned for one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallOutput {
    pub content: Vec<ContentBlock>,
    /// The provider flagged the call as failed.
    pub is_error: bool,
}

/// Low-level failure reported by a [`ToolProviderClient`].
///
/// [`ProviderConnection`] turns these into the crate-level taxonomy:
/// `Exited` means the subprocess is gone, everything else is a per-call failure.
#[derive(Debug, Error)]
pub enum ProviderFault {
    #[error("provider process exited: {0}")]
    Exited(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to spawn provider: {0}")]
    Spawn(#[from] std::io::Error),
}

impl From<Elapsed> for ProviderFault {
    fn from(elapsed: Elapsed) -> Self {
        Self::Timeout(elapsed.0)
    }
}

/// Wire-level operations against one tool provider.
#[async_trait]
pub trait ToolProviderClient: Send {
    /// Spawn the provider and complete the protocol handshake.
    async fn start(&mut self) -> Result<(), ProviderFault>;

    async fn list_tools(&mut self) -> Result<Vec<AdvertisedTool>, ProviderFault>;

    async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallOutput, ProviderFault>;

    /// Whether the provider process is still reachable.
    fn is_alive(&self) -> bool;

    /// Ask the provider to stop; force termination once `grace` runs out.
    async fn shutdown(&mut self, grace: Duration) -> Result<(), ProviderFault>;
}

/// Unopened stdio connections for every enabled provider, in priority order.
///
/// Credentials are resolved once here and frozen into each provider's
/// launch environment.
#[cfg(feature = "mcp")]
pub async fn connections_from_config(
    config: &AgentConfig,
    assumer: Option<&dyn RoleAssumer>,
) -> crate::error::Result<Vec<std::sync::Arc<ProviderConnection>>> {
    let base = credentials::process_environment();
    let resolved = credentials::resolve_credentials(config, &base, assumer).await?;
    let env = credentials::provider_environment(&base, &config.aws_region, resolved.as_ref());
    let timeouts = ConnectionTimeouts::from_config(config);

    Ok(config
        .enabled_providers()
        .map(|spec| {
            std::sync::Arc::new(ProviderConnection::stdio(
                spec.id.clone(),
                ProviderLaunch::from_spec(spec, &env),
                timeouts,
            ))
        })
        .collect())
}
