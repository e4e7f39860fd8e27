pub mod config;
pub mod error;
pub mod http;
pub mod normalize;
pub mod openapi;
pub mod precision;
pub mod router;
pub mod server;
pub mod tools;
pub mod transform;

pub use config::Config;
pub use error::{Result, ToolError};
pub use server::McpServer;
pub use tools::{Tool, ToolRegistry, ToolResponse};
