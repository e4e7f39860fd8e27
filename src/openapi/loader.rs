use reqwest::Client;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::error::{Result, ToolError};
use crate::openapi::spec::ApiSpecification;

/// Where an OpenAPI document comes from.
#[derive(Debug, Clone)]
pub enum SpecSource {
    /// Remote YAML or JSON document.
    Url(String),
    /// Bundled document text, YAML or JSON.
    Text(String),
    /// Already-parsed document.
    Document(Value),
}

impl SpecSource {
    fn cache_key(&self) -> Option<&str> {
        match self {
            SpecSource::Url(url) => Some(url),
            _ => None,
        }
    }
}

/// Fetches, parses and dereferences OpenAPI documents
#[derive(Clone)]
pub struct SpecLoader {
    client: Client,
    timeout: Duration,
}

impl SpecLoader {
    pub fn new(client: Client, timeout: Duration) -> Self {
        SpecLoader { client, timeout }
    }

    /// Load a spec and inline every local `$ref`.
    ///
    /// Fetch, parse and dereference failures all surface as `SpecLoad`;
    /// there is no partial result.
    pub async fn load(&self, source: &SpecSource) -> Result<ApiSpecification> {
        let document = match source {
            SpecSource::Url(url) => {
                let text = self.fetch(url).await?;
                parse_document(&text)?
            }
            SpecSource::Text(text) => parse_document(text)?,
            SpecSource::Document(document) => document.clone(),
        };

        let resolved = dereference(&document)?;
        let spec = ApiSpecification::from_document(resolved)?;
        info!(
            "Loaded API specification {} with {} paths",
            spec.title().unwrap_or("<untitled>"),
            spec.paths().len()
        );
        Ok(spec)
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        debug!("Fetching API specification from {}", url);

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to fetch API specification: {}", e);
                ToolError::SpecLoad(format!("Failed to fetch {}: {}", url, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::SpecLoad(format!(
                "Fetching {} returned HTTP {}",
                url,
                status.as_u16()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| ToolError::SpecLoad(format!("Failed to read {}: {}", url, e)))
    }
}

/// Parse a document as JSON when it looks like JSON, YAML otherwise.
pub fn parse_document(text: &str) -> Result<Value> {
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| ToolError::SpecLoad(format!("Invalid JSON document: {}", e)));
    }

    let yaml: serde_yaml::Value = serde_yaml::from_str(trimmed)
        .map_err(|e| ToolError::SpecLoad(format!("Invalid YAML document: {}", e)))?;
    yaml_to_json(yaml)
}

// YAML allows non-string keys (unquoted response codes such as `200:`),
// JSON objects do not.
fn yaml_to_json(value: serde_yaml::Value) -> Result<Value> {
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(u) = n.as_u64() {
                Value::from(u)
            } else if let Some(i) = n.as_i64() {
                Value::from(i)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut out = Map::with_capacity(mapping.len());
            for (key, value) in mapping {
                let key = match key {
                    Yaml::String(s) => s,
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Bool(b) => b.to_string(),
                    other => {
                        return Err(ToolError::SpecLoad(format!(
                            "Unsupported YAML mapping key: {:?}",
                            other
                        )))
                    }
                };
                out.insert(key, yaml_to_json(value)?);
            }
            Value::Object(out)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

/// Replace every `$ref` object with its target, producing a self-contained tree.
///
/// Only document-local references (`#/...`) are supported. Keys that sit
/// next to a `$ref` are merged over the resolved target.
pub fn dereference(document: &Value) -> Result<Value> {
    let mut stack = Vec::new();
    resolve_node(document, document, &mut stack)
}

fn resolve_node(root: &Value, node: &Value, stack: &mut Vec<String>) -> Result<Value> {
    match node {
        Value::Object(map) => {
            if let Some(reference) = map.get("$ref") {
                let pointer = reference.as_str().ok_or_else(|| {
                    ToolError::SpecLoad(format!("$ref must be a string, got {}", reference))
                })?;

                if stack.iter().any(|seen| seen == pointer) {
                    return Err(ToolError::SpecLoad(format!(
                        "Circular reference: {}",
                        pointer
                    )));
                }

                let target = lookup_reference(root, pointer)?;
                stack.push(pointer.to_string());
                let resolved = resolve_node(root, target, stack);
                stack.pop();
                let mut resolved = resolved?;

                if let Value::Object(resolved_map) = &mut resolved {
                    for (key, value) in map.iter().filter(|(k, _)| k.as_str() != "$ref") {
                        resolved_map.insert(key.clone(), resolve_node(root, value, stack)?);
                    }
                }
                return Ok(resolved);
            }

            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), resolve_node(root, value, stack)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_node(root, item, stack))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

pub(crate) fn lookup_reference<'a>(root: &'a Value, reference: &str) -> Result<&'a Value> {
    let pointer = reference.strip_prefix('#').ok_or_else(|| {
        ToolError::SpecLoad(format!("External reference not supported: {}", reference))
    })?;

    root.pointer(pointer)
        .ok_or_else(|| ToolError::SpecLoad(format!("Dangling reference: {}", reference)))
}

/// Process-lifetime memo of specs loaded from URLs.
#[derive(Clone, Default)]
pub struct SpecCache {
    entries: Arc<RwLock<HashMap<String, Arc<ApiSpecification>>>>,
}

impl SpecCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_load(
        &self,
        loader: &SpecLoader,
        source: &SpecSource,
    ) -> Result<Arc<ApiSpecification>> {
        if let Some(key) = source.cache_key() {
            if let Some(spec) = self.entries.read().await.get(key) {
                debug!("Spec cache hit: {}", key);
                return Ok(Arc::clone(spec));
            }
        }

        let spec = Arc::new(loader.load(source).await?);

        if let Some(key) = source.cache_key() {
            self.entries
                .write()
                .await
                .insert(key.to_string(), Arc::clone(&spec));
        }
        Ok(spec)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
