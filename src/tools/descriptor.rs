//! Normalized tool description exposed to the model.

use serde::{Deserialize, Serialize};

use crate::mcp::AdvertisedTool;

/// A tool as the registry and the model see it.
///
/// Built once at registration from whatever the provider advertised; nothing
/// downstream looks at provider-specific shapes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: serde_json::Value,
    pub provider_id: String,
}

impl ToolDescriptor {
    pub fn from_advertised(tool: AdvertisedTool, provider_id: &str) -> Self {
        Self {
            name: tool.name.trim().to_string(),
            description: tool.description.unwrap_or_default(),
            input_schema: normalize_schema(tool.input_schema),
            provider_id: provider_id.to_string(),
        }
    }
}

/// Providers sometimes omit the schema or its `type`; the model endpoint
/// requires an object schema.
fn normalize_schema(schema: serde_json::Value) -> serde_json::Value {
    match schema {
        serde_json::Value::Object(mut map) => {
            map.entry("type")
                .or_insert_with(|| serde_json::Value::String("object".into()));
            serde_json::Value::Object(map)
        }
        _ => serde_json::json!({"type": "object", "properties": {}}),
    }
}
