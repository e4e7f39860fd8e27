use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Result, ToolError};
use crate::openapi::{SpecCache, SpecLoader};
use crate::router::{KeywordRouter, LlmClient, LlmRouter, LlmStepModel, Router, StepModel};
use crate::tools::dynamic::{DynamicApiTool, ToolContext};
use crate::tools::{
    providers, Tool, ToolDefinition, ToolResponse, TokenSearchTool, WalletPortfolioTool, WebSearchTool,
};

/// Group whose tools are offered alongside every other group.
pub const GENERAL_GROUP: &str = "general";

const SPEC_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Tools keyed by name, each belonging to one tool group.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<(String, Arc<dyn Tool>)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every explorer preset plus the general tools, wired from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("barzakh-tools/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ToolError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let (router, step_model) = if config.router.api_key.is_some() {
            let llm = LlmClient::from_settings(client.clone(), &config.router)?;
            info!("Routing queries with model {}", llm.model());
            let router: Arc<dyn Router> = Arc::new(LlmRouter::new(llm.clone()));
            let model: Arc<dyn StepModel> = Arc::new(LlmStepModel::new(llm));
            (router, Some(model))
        } else {
            warn!("ROUTER_API_KEY not set; using keyword routing and no multi-step tools");
            let router: Arc<dyn Router> = Arc::new(KeywordRouter);
            (router, None)
        };

        let context = ToolContext {
            client: client.clone(),
            loader: SpecLoader::new(client.clone(), SPEC_FETCH_TIMEOUT),
            cache: SpecCache::new(),
            router,
            step_model,
        };

        let mut registry = ToolRegistry::new();
        for (group, preset) in providers::all(&config.keys, config.http) {
            registry.register(group, Arc::new(DynamicApiTool::new(preset, context.clone())));
        }
        registry.register(
            GENERAL_GROUP,
            Arc::new(WalletPortfolioTool::new(client.clone(), &config.keys, config.http)),
        );
        registry.register(
            GENERAL_GROUP,
            Arc::new(TokenSearchTool::new(client.clone(), &config.keys, config.http)),
        );
        registry.register(
            GENERAL_GROUP,
            Arc::new(WebSearchTool::new(client, &config.keys, config.http)),
        );

        info!("Registered {} tools", registry.len());
        Ok(registry)
    }

    /// Adds a tool; a tool with the same name is replaced.
    pub fn register(&mut self, group: &str, tool: Arc<dyn Tool>) {
        self.tools.retain(|(_, existing)| existing.name() != tool.name());
        self.tools.push((group.to_string(), tool));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = Vec::new();
        for (group, _) in &self.tools {
            if !groups.contains(&group.as_str()) {
                groups.push(group);
            }
        }
        groups
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|(_, tool)| tool.name() == name)
            .map(|(_, tool)| Arc::clone(tool))
    }

    /// Tools offered for a chat turn: the group's own plus the general ones.
    /// Without a group every tool is listed.
    pub fn definitions(&self, group: Option<&str>) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|(tool_group, _)| match group {
                Some(group) => tool_group == group || tool_group == GENERAL_GROUP,
                None => true,
            })
            .map(|(_, tool)| tool.definition())
            .collect()
    }

    pub async fn call(&self, name: &str, arguments: Value) -> ToolResponse {
        match self.get(name) {
            Some(tool) => {
                info!("Calling tool {}", name);
                tool.execute(arguments).await
            }
            None => {
                warn!("Unknown tool requested: {}", name);
                ToolResponse::failure(
                    format!("No tool named {}", name),
                    &ToolError::InvalidArguments(format!("Unknown tool: {}", name)),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiKeys;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo(&'static str);

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "Echo the arguments"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, arguments: Value) -> ToolResponse {
            ToolResponse::success(arguments)
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register("aptos", Arc::new(Echo("aptos_explorer")));
        registry.register("sei", Arc::new(Echo("sei_explorer")));
        registry.register(GENERAL_GROUP, Arc::new(Echo("web_search")));
        registry
    }

    #[test]
    fn test_definitions_by_group() {
        let registry = registry();

        let names: Vec<String> = registry
            .definitions(Some("sei"))
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["sei_explorer", "web_search"]);

        assert_eq!(registry.definitions(None).len(), 3);
        assert_eq!(registry.groups(), vec!["aptos", "sei", GENERAL_GROUP]);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = registry();
        registry.register(GENERAL_GROUP, Arc::new(Echo("sei_explorer")));
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.definitions(Some("sei")).len(), 2);
    }

    #[tokio::test]
    async fn test_call_dispatches_and_rejects_unknown() {
        let registry = registry();

        let response = registry.call("web_search", json!({"query": "x"})).await;
        assert_eq!(response.data, json!({"query": "x"}));

        let response = registry.call("nope", json!({})).await;
        assert!(!response.success);
        assert_eq!(response.kind.as_deref(), Some("invalid_arguments"));
    }

    #[test]
    fn test_from_config_registers_every_group() {
        let config = Config {
            keys: ApiKeys::default(),
            ..Config::default()
        };
        let registry = ToolRegistry::from_config(&config).unwrap();

        assert_eq!(
            registry.groups(),
            vec!["aptos", "sei", "creditcoin", "noves", GENERAL_GROUP]
        );
        assert!(registry.get("get_wallet_portfolio").is_some());
        assert!(registry.get("creditcoin_explorer").is_some());
    }

    #[tokio::test]
    async fn test_every_tool_survives_garbage_arguments() {
        let registry = ToolRegistry::from_config(&Config::default()).unwrap();
        for definition in registry.definitions(None) {
            let response = registry.call(&definition.name, json!([1, 2, 3])).await;
            assert!(!response.success, "{} accepted garbage", definition.name);
            assert!(response.kind.is_some());
        }
    }
}
