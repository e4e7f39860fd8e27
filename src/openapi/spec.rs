use serde_json::{Map, Value};

use crate::error::{Result, ToolError};

/// A fully dereferenced OpenAPI (or Swagger 2) document.
#[derive(Debug, Clone)]
pub struct ApiSpecification {
    document: Value,
    paths: Map<String, Value>,
}

impl ApiSpecification {
    pub fn from_document(document: Value) -> Result<Self> {
        let paths = document
            .get("paths")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| ToolError::SpecLoad("Document has no paths object".to_string()))?;
        Ok(ApiSpecification { document, paths })
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Path templates in document order.
    pub fn paths(&self) -> &Map<String, Value> {
        &self.paths
    }

    pub fn path_item(&self, path: &str) -> Option<&Map<String, Value>> {
        self.paths().get(path).and_then(Value::as_object)
    }

    pub fn title(&self) -> Option<&str> {
        self.document.pointer("/info/title").and_then(Value::as_str)
    }

    /// Document-level base URL: OpenAPI 3 `servers[0].url`, or the Swagger 2
    /// `schemes`/`host`/`basePath` triple.
    pub fn default_server(&self) -> Option<String> {
        if let Some(url) = first_server_url(&self.document) {
            return Some(url);
        }

        let host = self.document.get("host").and_then(Value::as_str)?;
        let scheme = self
            .document
            .pointer("/schemes/0")
            .and_then(Value::as_str)
            .unwrap_or("https");
        let base_path = self
            .document
            .get("basePath")
            .and_then(Value::as_str)
            .unwrap_or("");
        Some(format!("{}://{}{}", scheme, host, base_path))
    }
}

pub(crate) fn first_server_url(node: &Value) -> Option<String> {
    node.pointer("/servers/0/url")
        .and_then(Value::as_str)
        .map(|url| url.trim_end_matches('/').to_string())
}
