//! Stdio MCP client built on `rmcp`.

use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, ClientInfo, Content, JsonObject, ProtocolVersion,
    ResourceContents,
};
use rmcp::service::{
    ClientInitializeError, DynService, RoleClient, RunningService, ServiceError, ServiceExt,
};
use rmcp::transport::TokioChildProcess;
use tracing::debug;

use super::transport::ProviderLaunch;
use super::{AdvertisedTool, ProviderFault, ToolCallOutput, ToolProviderClient};
use crate::types::ContentBlock;

type McpService = RunningService<RoleClient, Box<dyn DynService<RoleClient>>>;

/// Talks MCP to a child process over its stdin/stdout.
pub struct StdioMcpClient {
    launch: ProviderLaunch,
    service: Option<McpService>,
}

impl StdioMcpClient {
    pub fn new(launch: ProviderLaunch) -> Self {
        Self {
            launch,
            service: None,
        }
    }

    pub fn launch(&self) -> &ProviderLaunch {
        &self.launch
    }

    fn service(&mut self) -> Result<&mut McpService, ProviderFault> {
        self.service
            .as_mut()
            .ok_or_else(|| ProviderFault::Exited("provider session is not running".into()))
    }
}

#[async_trait]
impl ToolProviderClient for StdioMcpClient {
    async fn start(&mut self) -> Result<(), ProviderFault> {
        debug!(command = %self.launch.command, args = ?self.launch.args, "spawning tool provider");
        let transport = TokioChildProcess::new(self.launch.to_command())?;
        let client_info = ClientInfo {
            protocol_version: ProtocolVersion::LATEST,
            ..Default::default()
        };
        let service = client_info
            .into_dyn()
            .serve(transport)
            .await
            .map_err(map_initialize_error)?;
        self.service = Some(service);
        Ok(())
    }

    async fn list_tools(&mut self) -> Result<Vec<AdvertisedTool>, ProviderFault> {
        let service = self.service()?;
        let tools = match service.list_all_tools().await {
            Ok(tools) => tools,
            Err(ServiceError::UnexpectedResponse) => service
                .list_tools(None)
                .await
                .map(|page| page.tools)
                .map_err(map_service_error)?,
            Err(error) => return Err(map_service_error(error)),
        };

        Ok(tools
            .into_iter()
            .map(|tool| AdvertisedTool {
                name: tool.name.to_string(),
                description: tool.description.map(|d| d.to_string()),
                input_schema: serde_json::Value::Object((*tool.input_schema).clone()),
            })
            .collect())
    }

    async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallOutput, ProviderFault> {
        let arguments = coerce_arguments(arguments)?;
        let result = self
            .service()?
            .call_tool(CallToolRequestParams {
                meta: None,
                name: name.to_owned().into(),
                arguments,
                task: None,
            })
            .await
            .map_err(map_service_error)?;
        Ok(map_call_result(result))
    }

    fn is_alive(&self) -> bool {
        self.service.as_ref().is_some_and(|service| !service.is_closed())
    }

    async fn shutdown(&mut self, grace: Duration) -> Result<(), ProviderFault> {
        let Some(service) = self.service.take() else {
            return Ok(());
        };
        // Dropping the service on timeout drops the child handle, which kills it.
        match tokio::time::timeout(grace, service.cancel()).await {
            Ok(Ok(reason)) => {
                debug!(?reason, "tool provider stopped");
                Ok(())
            }
            Ok(Err(join_error)) => Err(ProviderFault::Protocol(format!(
                "provider service task failed: {join_error}"
            ))),
            Err(_) => Err(ProviderFault::Timeout(grace)),
        }
    }
}

fn coerce_arguments(value: serde_json::Value) -> Result<Option<JsonObject>, ProviderFault> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) => Ok(Some(map)),
        serde_json::Value::String(raw) if raw.trim().is_empty() => Ok(None),
        serde_json::Value::String(raw) => {
            let parsed: serde_json::Value = serde_json::from_str(raw.trim()).map_err(|e| {
                ProviderFault::Protocol(format!("tool arguments must be valid JSON: {e}"))
            })?;
            coerce_arguments(parsed)
        }
        other => Err(ProviderFault::Protocol(format!(
            "tool arguments must be a JSON object; got {other}"
        ))),
    }
}

fn content_to_block(item: &Content) -> ContentBlock {
    if let Some(text) = item.as_text() {
        return ContentBlock::text(text.text.clone());
    }
    if let Some(resource) = item.as_resource() {
        if let ResourceContents::TextResourceContents { text, .. } = &resource.resource {
            return ContentBlock::text(text.clone());
        }
    }
    ContentBlock::text(serde_json::to_string(item).unwrap_or_default())
}

fn map_call_result(result: CallToolResult) -> ToolCallOutput {
    let mut content: Vec<ContentBlock> = result.content.iter().map(content_to_block).collect();
    if content.is_empty() {
        if let Some(structured) = &result.structured_content {
            content.push(ContentBlock::text(structured.to_string()));
        }
    }
    ToolCallOutput {
        content,
        is_error: result.is_error.unwrap_or(false),
    }
}

fn map_initialize_error(error: ClientInitializeError) -> ProviderFault {
    match error {
        ClientInitializeError::ConnectionClosed(context) => {
            ProviderFault::Exited(format!("connection closed during handshake: {context}"))
        }
        ClientInitializeError::Cancelled => ProviderFault::Exited("handshake cancelled".into()),
        other => ProviderFault::Protocol(format!("handshake failed: {other}")),
    }
}

fn map_service_error(error: ServiceError) -> ProviderFault {
    match error {
        ServiceError::TransportClosed => ProviderFault::Exited("transport closed".into()),
        ServiceError::TransportSend(error) => {
            ProviderFault::Exited(format!("transport send failed: {error}"))
        }
        ServiceError::Cancelled { reason } => ProviderFault::Exited(format!(
            "request cancelled{}",
            reason.map(|r| format!(": {r}")).unwrap_or_default()
        )),
        ServiceError::McpError(error) => {
            ProviderFault::Protocol(format!("MCP error {}: {}", error.code.0, error.message))
        }
        ServiceError::Timeout { timeout } => ProviderFault::Timeout(timeout),
        other => ProviderFault::Protocol(other.to_string()),
    }
}
