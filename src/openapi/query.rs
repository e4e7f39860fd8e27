use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Result, ToolError};
use crate::openapi::loader::lookup_reference;
use crate::openapi::spec::{first_server_url, ApiSpecification};

/// HTTP methods in the order OpenAPI lists them.
pub const HTTP_METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// One catalog line handed to the endpoint router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSummary {
    pub path: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub name: String,
    /// `path`, `query`, `header` or `cookie`.
    pub location: String,
    pub required: bool,
    pub schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDetails {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Vec<ParameterInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn is_http_method(key: &str) -> bool {
    HTTP_METHODS.contains(&key)
}

fn operation_text(operation: &Value) -> Option<String> {
    operation
        .get("description")
        .and_then(Value::as_str)
        .or_else(|| operation.get("summary").and_then(Value::as_str))
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// List every path whose primary method carries a description.
///
/// The primary method is the first non-POST method listed for the path, so
/// POST-only paths never reach the router: downstream calls are GET only.
pub fn list_paths_with_descriptions(spec: &ApiSpecification) -> Vec<PathSummary> {
    spec.paths()
        .iter()
        .filter_map(|(path, item)| {
            let item = item.as_object()?;
            let (_, operation) = item
                .iter()
                .find(|(method, _)| is_http_method(method) && method.as_str() != "post")?;
            let description = operation_text(operation)?;
            Some(PathSummary {
                path: path.clone(),
                description,
            })
        })
        .collect()
}

/// Per-method details for one path, with referenced parameters resolved.
pub fn get_path_details(spec: &ApiSpecification, path: &str) -> Result<Vec<OperationDetails>> {
    let item = spec
        .path_item(path)
        .ok_or_else(|| ToolError::PathNotFound(path.to_string()))?;

    let path_parameters = read_parameters(spec, item.get("parameters"))?;
    let path_server = item
        .get("servers")
        .and_then(|servers| servers.pointer("/0/url"))
        .and_then(Value::as_str)
        .map(|url| url.trim_end_matches('/').to_string());
    let document_server = spec.default_server();

    let mut details = Vec::new();
    for (method, operation) in item.iter().filter(|(m, _)| is_http_method(m)) {
        let mut parameters = path_parameters.clone();
        for parameter in read_parameters(spec, operation.get("parameters"))? {
            match parameters
                .iter_mut()
                .find(|p| p.name == parameter.name && p.location == parameter.location)
            {
                Some(existing) => *existing = parameter,
                None => parameters.push(parameter),
            }
        }

        let base_url = first_server_url(operation)
            .or_else(|| path_server.clone())
            .or_else(|| document_server.clone());

        details.push(OperationDetails {
            method: method.to_uppercase(),
            description: operation_text(operation),
            parameters,
            base_url,
        });
    }

    debug!("Resolved {} operations for {}", details.len(), path);
    Ok(details)
}

fn read_parameters(spec: &ApiSpecification, raw: Option<&Value>) -> Result<Vec<ParameterInfo>> {
    let Some(items) = raw.and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    items
        .iter()
        .map(|item| {
            // specs built directly from a document may still hold references
            let parameter = match item.get("$ref").and_then(Value::as_str) {
                Some(reference) => lookup_reference(spec.document(), reference)?,
                None => item,
            };
            parse_parameter(parameter)
        })
        .collect()
}

fn parse_parameter(parameter: &Value) -> Result<ParameterInfo> {
    let name = parameter
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::SpecLoad(format!("Parameter without name: {}", parameter)))?;
    let location = parameter
        .get("in")
        .and_then(Value::as_str)
        .unwrap_or("query");

    // Swagger 2 puts the type on the parameter itself
    let schema = parameter.get("schema").cloned().unwrap_or_else(|| {
        let mut schema = Map::new();
        for key in ["type", "format", "enum", "default", "items"] {
            if let Some(value) = parameter.get(key) {
                schema.insert(key.to_string(), value.clone());
            }
        }
        Value::Object(schema)
    });

    Ok(ParameterInfo {
        name: name.to_string(),
        location: location.to_string(),
        required: location == "path"
            || parameter
                .get("required")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        schema,
        description: parameter
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Substitute `{name}` placeholders and append the remaining parameters as
/// a query string.
pub fn resolve_path(template: &str, params: &Map<String, Value>) -> Result<String> {
    let mut path = String::with_capacity(template.len());
    let mut used = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        let end = rest[start..]
            .find('}')
            .map(|offset| start + offset)
            .ok_or_else(|| {
                ToolError::InvalidArguments(format!("Unclosed placeholder in {}", template))
            })?;
        let name = &rest[start + 1..end];
        let value = params
            .get(name)
            .and_then(param_to_string)
            .ok_or_else(|| {
                ToolError::InvalidArguments(format!("Missing path parameter '{}' for {}", name, template))
            })?;

        path.push_str(&rest[..start]);
        path.push_str(&urlencoding::encode(&value));
        used.push(name.to_string());
        rest = &rest[end + 1..];
    }
    path.push_str(rest);

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    let mut has_query = false;
    for (key, value) in params.iter().filter(|(k, _)| !used.contains(k)) {
        if let Some(value) = param_to_string(value) {
            query.append_pair(key, &value);
            has_query = true;
        }
    }

    if has_query {
        let separator = if path.contains('?') { '&' } else { '?' };
        path.push(separator);
        path.push_str(&query.finish());
    }
    Ok(path)
}

fn param_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}
