//! Lifecycle of one tool provider subprocess.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use strum::Display;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ProviderFault, ToolProviderClient};
use crate::config::AgentConfig;
use crate::error::{FinOpsError, Result};
use crate::tools::ToolDescriptor;
use crate::types::ToolResult;
use crate::util::timeout::with_timeout;

/// Connection lifecycle.
///
/// `Unstarted → Starting → Ready → Closing → Closed`, with `Starting → Failed`
/// and `Ready → Failed` on crash or protocol failure. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Unstarted,
    Starting,
    Ready,
    Failed,
    Closing,
    Closed,
}

/// Bounded waits for a provider connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    pub handshake: Duration,
    pub request: Duration,
    pub shutdown_grace: Duration,
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(30),
            request: Duration::from_secs(120),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl ConnectionTimeouts {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            handshake: config.handshake_timeout(),
            request: config.tool_timeout(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

/// One tool provider subprocess and its state machine.
///
/// All methods take `&self` so the connection can be shared between the
/// registry and in-flight dispatch tasks; calls to the provider are
/// serialized through an async mutex.
pub struct ProviderConnection {
    provider_id: String,
    timeouts: ConnectionTimeouts,
    state: RwLock<ConnectionState>,
    client: Mutex<Box<dyn ToolProviderClient>>,
}

impl std::fmt::Debug for ProviderConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConnection")
            .field("provider_id", &self.provider_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ProviderConnection {
    pub fn new(
        provider_id: impl Into<String>,
        client: Box<dyn ToolProviderClient>,
        timeouts: ConnectionTimeouts,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            timeouts,
            state: RwLock::new(ConnectionState::Unstarted),
            client: Mutex::new(client),
        }
    }

    /// A connection to a stdio MCP provider launched from `launch`.
    #[cfg(feature = "mcp")]
    pub fn stdio(
        provider_id: impl Into<String>,
        launch: super::ProviderLaunch,
        timeouts: ConnectionTimeouts,
    ) -> Self {
        Self::new(
            provider_id,
            Box::new(super::StdioMcpClient::new(launch)),
            timeouts,
        )
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            debug!(provider_id = %self.provider_id, from = %*state, to = %next, "provider state change");
            *state = next;
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Ready => Ok(()),
            state => Err(FinOpsError::ProviderNotReady {
                provider_id: self.provider_id.clone(),
                state: state.to_string(),
            }),
        }
    }

    /// Launch the subprocess and complete the handshake.
    pub async fn open(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Unstarted => {}
            ConnectionState::Ready => return Ok(()),
            state => {
                return Err(FinOpsError::ProviderStart {
                    provider_id: self.provider_id.clone(),
                    reason: format!("cannot open a connection in state {state}"),
                })
            }
        }

        self.set_state(ConnectionState::Starting);
        let mut client = self.client.lock().await;
        match with_timeout(self.timeouts.handshake, client.start()).await {
            Ok(()) => {
                self.set_state(ConnectionState::Ready);
                info!(provider_id = %self.provider_id, "tool provider ready");
                Ok(())
            }
            Err(fault) => {
                self.set_state(ConnectionState::Failed);
                // Reap anything that did get spawned.
                let _ = client.shutdown(Duration::ZERO).await;
                warn!(provider_id = %self.provider_id, error = %fault, "tool provider failed to start");
                Err(FinOpsError::ProviderStart {
                    provider_id: self.provider_id.clone(),
                    reason: fault.to_string(),
                })
            }
        }
    }

    /// Tools advertised by the provider, normalized and tagged with this provider's id.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.ensure_ready()?;
        let mut client = self.client.lock().await;
        let advertised = with_timeout(self.timeouts.request, client.list_tools())
            .await
            .map_err(|fault| self.classify_fault("list_tools", fault))?;

        Ok(advertised
            .into_iter()
            .map(|tool| ToolDescriptor::from_advertised(tool, &self.provider_id))
            .collect())
    }

    /// Invoke one tool. A provider-flagged failure is a `ToolInvocation`
    /// error; a dead subprocess is `ProviderCrashed` and fails the connection.
    pub async fn invoke(&self, tool_name: &str, arguments: serde_json::Value) -> Result<ToolResult> {
        self.ensure_ready()?;
        let mut client = self.client.lock().await;

        if !client.is_alive() {
            self.set_state(ConnectionState::Failed);
            warn!(provider_id = %self.provider_id, tool_name, "tool provider is no longer running");
            return Err(FinOpsError::ProviderCrashed {
                provider_id: self.provider_id.clone(),
                reason: "subprocess exited".into(),
            });
        }

        let output = with_timeout(self.timeouts.request, client.call_tool(tool_name, arguments))
            .await
            .map_err(|fault| self.classify_fault(tool_name, fault))?;

        if output.is_error {
            let cause = ToolResult::ok(output.content).text();
            return Err(FinOpsError::ToolInvocation {
                provider_id: self.provider_id.clone(),
                tool_name: tool_name.to_string(),
                cause: if cause.is_empty() {
                    "provider reported an error without details".into()
                } else {
                    cause
                },
            });
        }

        Ok(ToolResult::ok(output.content))
    }

    fn classify_fault(&self, tool_name: &str, fault: ProviderFault) -> FinOpsError {
        match fault {
            ProviderFault::Exited(reason) => {
                self.set_state(ConnectionState::Failed);
                warn!(provider_id = %self.provider_id, tool_name, %reason, "tool provider crashed");
                FinOpsError::ProviderCrashed {
                    provider_id: self.provider_id.clone(),
                    reason,
                }
            }
            other => FinOpsError::ToolInvocation {
                provider_id: self.provider_id.clone(),
                tool_name: tool_name.to_string(),
                cause: other.to_string(),
            },
        }
    }

    /// Shut the provider down. Idempotent, never fails, always ends `Closed`.
    pub async fn close(&self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.set_state(ConnectionState::Closing);

        let grace = self.timeouts.shutdown_grace;
        let mut client = self.client.lock().await;
        // The client forces termination itself at `grace`; the outer bound
        // only guards against a client that ignores it.
        match with_timeout(grace + Duration::from_secs(1), client.shutdown(grace)).await {
            Ok(()) => debug!(provider_id = %self.provider_id, "tool provider closed"),
            Err(fault) => {
                warn!(provider_id = %self.provider_id, error = %fault, "tool provider did not shut down cleanly")
            }
        }
        self.set_state(ConnectionState::Closed);
    }
}
