//! Tool registry: one callable tool set over many provider connections.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::ToolDescriptor;
use crate::error::Result;
use crate::mcp::{ConnectionState, ProviderConnection};
use crate::types::ToolResult;

/// Something the registry noticed while registering providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistryDiagnostic {
    /// A later provider advertised a name that was already taken; the
    /// earlier registration was kept.
    NameCollision {
        tool_name: String,
        kept_provider: String,
        dropped_provider: String,
    },
    /// A provider could not be opened or listed and contributes no tools.
    ProviderUnavailable { provider_id: String, reason: String },
}

impl std::fmt::Display for RegistryDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NameCollision {
                tool_name,
                kept_provider,
                dropped_provider,
            } => write!(
                f,
                "tool '{tool_name}' from '{dropped_provider}' ignored; already provided by '{kept_provider}'"
            ),
            Self::ProviderUnavailable {
                provider_id,
                reason,
            } => write!(f, "provider '{provider_id}' unavailable: {reason}"),
        }
    }
}

/// Outcome of registering one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    pub added: Vec<String>,
    pub dropped: Vec<String>,
}

/// Aggregates tools from provider connections, first registration wins.
#[derive(Default)]
pub struct ToolRegistry {
    connections: Vec<Arc<ProviderConnection>>,
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
    routes: HashMap<String, Arc<ProviderConnection>>,
    diagnostics: Vec<RegistryDiagnostic>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("providers", &self.provider_ids())
            .field("tools", &self.tools.len())
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every tool a ready connection advertises.
    ///
    /// Fails only when the connection cannot list its tools; name collisions
    /// are recorded as diagnostics and never fail the registration.
    pub async fn register(
        &mut self,
        connection: Arc<ProviderConnection>,
    ) -> Result<RegistrationReport> {
        let descriptors = connection.list_tools().await?;
        let provider_id = connection.provider_id().to_string();
        let mut report = RegistrationReport::default();

        for descriptor in descriptors {
            if let Some(&existing) = self.index.get(&descriptor.name) {
                let kept_provider = self.tools[existing].provider_id.clone();
                warn!(
                    tool_name = %descriptor.name,
                    kept_provider = %kept_provider,
                    dropped_provider = %provider_id,
                    "duplicate tool name; keeping earlier registration"
                );
                self.diagnostics.push(RegistryDiagnostic::NameCollision {
                    tool_name: descriptor.name.clone(),
                    kept_provider,
                    dropped_provider: provider_id.clone(),
                });
                report.dropped.push(descriptor.name);
                continue;
            }

            self.index.insert(descriptor.name.clone(), self.tools.len());
            self.routes
                .insert(descriptor.name.clone(), Arc::clone(&connection));
            report.added.push(descriptor.name.clone());
            self.tools.push(descriptor);
        }

        info!(
            provider_id = %provider_id,
            added = report.added.len(),
            dropped = report.dropped.len(),
            "registered tool provider"
        );
        self.connections.push(connection);
        Ok(report)
    }

    /// Open and register connections in the given priority order.
    ///
    /// A provider that fails to open or list is closed, recorded as a
    /// diagnostic, and skipped; the rest still register.
    pub async fn register_all(&mut self, connections: Vec<Arc<ProviderConnection>>) {
        for connection in connections {
            if connection.state() == ConnectionState::Unstarted {
                if let Err(error) = connection.open().await {
                    self.mark_unavailable(&connection, error.to_string()).await;
                    continue;
                }
            }
            if let Err(error) = self.register(Arc::clone(&connection)).await {
                self.mark_unavailable(&connection, error.to_string()).await;
            }
        }
    }

    async fn mark_unavailable(&mut self, connection: &ProviderConnection, reason: String) {
        warn!(provider_id = %connection.provider_id(), %reason, "skipping tool provider");
        self.diagnostics.push(RegistryDiagnostic::ProviderUnavailable {
            provider_id: connection.provider_id().to_string(),
            reason,
        });
        connection.close().await;
    }

    /// Invoke a tool by name. Every failure comes back as an error result,
    /// never as an `Err`, so the model can react to it.
    pub async fn dispatch(&self, tool_name: &str, arguments: serde_json::Value) -> ToolResult {
        let Some(connection) = self.routes.get(tool_name) else {
            warn!(tool_name, "model requested an unknown tool");
            return ToolResult::error(format!("Unknown tool '{tool_name}'"));
        };

        match connection.invoke(tool_name, arguments).await {
            Ok(result) => result,
            Err(error) => {
                warn!(
                    provider_id = %connection.provider_id(),
                    tool_name,
                    error = %error,
                    "tool call failed"
                );
                ToolResult::error(format!("Tool '{tool_name}' failed: {error}"))
            }
        }
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn get(&self, tool_name: &str) -> Option<&ToolDescriptor> {
        self.index.get(tool_name).map(|&i| &self.tools[i])
    }

    pub fn diagnostics(&self) -> &[RegistryDiagnostic] {
        &self.diagnostics
    }

    /// Registered provider ids, in registration order.
    pub fn provider_ids(&self) -> Vec<&str> {
        self.connections.iter().map(|c| c.provider_id()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Close every registered connection. Failures are logged by the connections.
    pub async fn close_all(&self) {
        for connection in &self.connections {
            connection.close().await;
        }
    }
}
