use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ToolError {
    #[error("Failed to load API specification: {0}")]
    SpecLoad(String),

    #[error("Path not found in API specification: {0}")]
    PathNotFound(String),

    #[error("Endpoint selection failed: {0}")]
    Selection(String),

    #[error("Upstream API error{}: {message}", status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("精度转换错误: {0}")]
    Precision(String),

    #[error("网络错误: {0}")]
    Network(String),
}

impl ToolError {
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        ToolError::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Stable tag carried in failure payloads so the model can branch on it.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::SpecLoad(_) => "spec_load_error",
            ToolError::PathNotFound(_) => "path_not_found",
            ToolError::Selection(_) => "selection_error",
            ToolError::Upstream { .. } => "upstream_error",
            ToolError::Timeout(_) => "timeout_error",
            ToolError::Config(_) => "config_error",
            ToolError::InvalidArguments(_) => "invalid_arguments",
            ToolError::Precision(_) => "precision_error",
            ToolError::Network(_) => "network_error",
        }
    }

    /// Timeouts are the only failures worth repeating; an upstream gateway
    /// timeout status counts as one.
    pub fn is_retryable(&self) -> bool {
        match self {
            ToolError::Timeout(_) => true,
            ToolError::Upstream {
                status: Some(status),
                ..
            } => matches!(status, 408 | 429 | 502 | 503 | 504),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ToolError>;
