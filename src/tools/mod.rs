pub mod dynamic;
pub mod portfolio;
pub mod providers;
pub mod registry;
pub mod token;
pub mod web_search;

pub use dynamic::{DynamicApiTool, DynamicToolConfig, ToolContext, ToolMode};
pub use portfolio::WalletPortfolioTool;
pub use registry::ToolRegistry;
pub use token::TokenSearchTool;
pub use web_search::WebSearchTool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ToolError};

/// Standard tool request format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Tool definition advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Standard tool response format
///
/// Failures carry a user-facing `message`, the underlying `error` and its
/// `kind` tag; a tool never reports failure any other way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ToolResponse {
    pub fn success(data: Value) -> Self {
        ToolResponse {
            success: true,
            message: None,
            data,
            error: None,
            kind: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn failure(message: impl Into<String>, error: &ToolError) -> Self {
        ToolResponse {
            success: false,
            message: Some(message.into()),
            data: Value::Null,
            error: Some(error.to_string()),
            kind: Some(error.kind().to_string()),
        }
    }
}

/// A capability the model can call.
///
/// `execute` is total: bad input and upstream trouble come back as a
/// failure payload, never as a panic.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn input_schema(&self) -> Value;

    async fn execute(&self, arguments: Value) -> ToolResponse;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

pub(crate) fn required_str(arguments: &Value, key: &str) -> Result<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing or invalid '{}'", key)))
}

pub(crate) fn optional_str(arguments: &Value, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Wallet addresses and token mints are plain alphanumerics.
pub(crate) fn validate_address(address: &str) -> Result<()> {
    if address.len() < 3 || !address.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ToolError::InvalidArguments(format!(
            "Invalid address: {}",
            address
        )));
    }
    Ok(())
}
