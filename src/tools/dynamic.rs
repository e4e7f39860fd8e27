use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::RetryPolicy;
use crate::error::{Result, ToolError};
use crate::http::{ApiExecutor, AuthStrategy, EndpointOutcome};
use crate::normalize::{self, ScaleConfig};
use crate::openapi::{list_paths_with_descriptions, ApiSpecification, SpecCache, SpecLoader, SpecSource};
use crate::router::{AgentLoop, EndpointSelector, Router, StepModel, DEFAULT_MAX_ENDPOINTS};
use crate::tools::{required_str, Tool, ToolResponse};

/// How the model gets from a question to API calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolMode {
    /// The router proposes ready-to-call endpoints which are fanned out.
    SingleShot,
    /// The model discovers parameters and issues calls itself.
    MultiStep { max_steps: usize },
}

/// Everything that differs between two explorer integrations.
#[derive(Debug, Clone)]
pub struct DynamicToolConfig {
    pub name: String,
    pub description: String,
    pub spec_source: SpecSource,
    /// Used instead of the spec's `servers` entry when set.
    pub base_url_override: Option<String>,
    pub auth: AuthStrategy,
    pub policy: RetryPolicy,
    pub scale: Option<ScaleConfig>,
    /// Fields rescaled by a sibling `decimals` field before the magnitude
    /// heuristic is considered.
    pub amount_keys: Vec<&'static str>,
    pub max_endpoints: usize,
    pub instructions: Vec<String>,
    pub mode: ToolMode,
}

impl DynamicToolConfig {
    pub fn new(name: impl Into<String>, description: impl Into<String>, spec_source: SpecSource) -> Self {
        DynamicToolConfig {
            name: name.into(),
            description: description.into(),
            spec_source,
            base_url_override: None,
            auth: AuthStrategy::None,
            policy: RetryPolicy::default(),
            scale: None,
            amount_keys: Vec::new(),
            max_endpoints: DEFAULT_MAX_ENDPOINTS,
            instructions: Vec::new(),
            mode: ToolMode::SingleShot,
        }
    }
}

/// Shared collaborators handed to every dynamic tool.
#[derive(Clone)]
pub struct ToolContext {
    pub client: Client,
    pub loader: SpecLoader,
    pub cache: SpecCache,
    pub router: Arc<dyn Router>,
    pub step_model: Option<Arc<dyn StepModel>>,
}

/// Spec-driven explorer tool: load spec, pick endpoints, call, normalize.
pub struct DynamicApiTool {
    config: DynamicToolConfig,
    context: ToolContext,
    selector: EndpointSelector,
}

impl DynamicApiTool {
    pub fn new(config: DynamicToolConfig, context: ToolContext) -> Self {
        let selector = EndpointSelector::new(Arc::clone(&context.router), config.max_endpoints);
        DynamicApiTool {
            config,
            context,
            selector,
        }
    }

    pub fn config(&self) -> &DynamicToolConfig {
        &self.config
    }

    fn executor_for(&self, spec: &ApiSpecification) -> Result<ApiExecutor> {
        let base_url = self
            .config
            .base_url_override
            .clone()
            .or_else(|| spec.default_server())
            .ok_or_else(|| {
                ToolError::Config(format!(
                    "No base URL for {}: the API specification declares no server",
                    self.config.name
                ))
            })?;

        Ok(ApiExecutor::new(
            self.context.client.clone(),
            self.config.auth.clone(),
            self.config.policy,
        )
        .with_base_url(base_url))
    }

    fn normalize(&self, value: &Value) -> Value {
        if !self.config.amount_keys.is_empty() {
            return normalize::normalize_with_decimals(
                value,
                &self.config.amount_keys,
                self.config.scale.as_ref(),
            );
        }
        match &self.config.scale {
            Some(scale) => normalize::normalize(value, scale),
            None => value.clone(),
        }
    }

    async fn run(&self, query: &str) -> Result<ToolResponse> {
        let spec = self
            .context
            .cache
            .get_or_load(&self.context.loader, &self.config.spec_source)
            .await?;
        let catalog = list_paths_with_descriptions(&spec);
        let executor = self.executor_for(&spec)?;

        match self.config.mode {
            ToolMode::SingleShot => {
                let endpoints = self
                    .selector
                    .select(query, &catalog, &self.config.instructions)
                    .await?;
                let outcomes = executor.execute_all(&endpoints).await;
                Ok(self.fan_out_response(query, outcomes))
            }
            ToolMode::MultiStep { max_steps } => {
                let model = self.context.step_model.clone().ok_or_else(|| {
                    ToolError::Config(format!(
                        "{} needs a chat model; set ROUTER_API_KEY",
                        self.config.name
                    ))
                })?;
                let normalize = |value: &Value| self.normalize(value);
                let outcome = AgentLoop::new(model, max_steps)
                    .run(
                        query,
                        &self.config.instructions,
                        &spec,
                        &catalog,
                        &executor,
                        &normalize,
                    )
                    .await?;

                Ok(ToolResponse::success(json!({
                    "query": query,
                    "answer": outcome.answer,
                    "data": outcome.data,
                    "steps": outcome.steps,
                    "timestamp": Utc::now().to_rfc3339(),
                })))
            }
        }
    }

    fn fan_out_response(&self, query: &str, outcomes: Vec<EndpointOutcome>) -> ToolResponse {
        let total = outcomes.len();
        let succeeded = outcomes.iter().filter(|o| o.is_ok()).count();
        let results: Vec<Value> = outcomes
            .into_iter()
            .map(|mut outcome| {
                if let Ok(data) = outcome.result.as_mut() {
                    *data = self.normalize(data);
                }
                outcome.to_json()
            })
            .collect();

        let payload = json!({
            "query": query,
            "results": results,
            "timestamp": Utc::now().to_rfc3339(),
        });

        if succeeded == 0 {
            warn!("{}: every selected endpoint failed", self.config.name);
            let error = ToolError::upstream(None, "Every selected endpoint failed");
            return ToolResponse::failure(format!("{} could not fetch any data", self.config.name), &error)
                .with_data(payload);
        }

        info!(
            "{}: {}/{} endpoints succeeded",
            self.config.name,
            succeeded,
            total
        );
        ToolResponse::success(payload)
    }
}

#[async_trait]
impl Tool for DynamicApiTool {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn description(&self) -> &str {
        &self.config.description
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Natural-language question about on-chain data, including any addresses or hashes"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolResponse {
        let query = match required_str(&arguments, "query") {
            Ok(query) => query,
            Err(e) => return ToolResponse::failure("A query is required", &e),
        };

        match self.run(&query).await {
            Ok(response) => response,
            Err(e) => {
                error!("{} failed: {}", self.config.name, e);
                ToolResponse::failure(format!("{} failed", self.config.name), &e)
            }
        }
    }
}
