use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::config::{ApiKeys, RetryPolicy};
use crate::error::{Result, ToolError};
use crate::http::{ApiExecutor, AuthStrategy};
use crate::tools::{Tool, ToolResponse};

pub const TAVILY_BASE_URL: &str = "https://api.tavily.com";
const DEFAULT_MAX_RESULTS: u64 = 5;
const MAX_QUERIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyItem>,
}

#[derive(Debug, Deserialize)]
struct TavilyItem {
    title: Option<String>,
    url: Option<String>,
    content: Option<String>,
    score: Option<f64>,
}

pub struct WebSearchTool {
    client: Client,
    policy: RetryPolicy,
    api_key: Option<String>,
    base_url: String,
}

impl WebSearchTool {
    pub fn new(client: Client, keys: &ApiKeys, policy: RetryPolicy) -> Self {
        WebSearchTool {
            client,
            policy,
            api_key: keys.tavily.clone(),
            base_url: TAVILY_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Accepts `query` as a string or `queries` as a list of strings.
    fn queries(arguments: &Value) -> Result<Vec<String>> {
        let raw: Vec<&Value> = match (arguments.get("queries"), arguments.get("query")) {
            (Some(Value::Array(items)), _) => items.iter().collect(),
            (_, Some(Value::Array(items))) => items.iter().collect(),
            (_, Some(single)) => vec![single],
            _ => Vec::new(),
        };

        let mut queries: Vec<String> = Vec::new();
        for query in raw.iter().filter_map(|v| v.as_str()).map(str::trim) {
            if !query.is_empty() && !queries.iter().any(|q| q == query) {
                queries.push(query.to_string());
            }
        }

        if queries.is_empty() {
            return Err(ToolError::InvalidArguments(
                "Provide 'query' or a non-empty 'queries' list".to_string(),
            ));
        }
        if queries.len() > MAX_QUERIES {
            warn!("Web search got {} queries, keeping {}", queries.len(), MAX_QUERIES);
            queries.truncate(MAX_QUERIES);
        }
        Ok(queries)
    }

    async fn search_one(
        &self,
        executor: &ApiExecutor,
        api_key: &str,
        query: &str,
        max_results: u64,
    ) -> Result<Value> {
        let body = json!({
            "api_key": api_key,
            "query": query,
            "search_depth": "basic",
            "include_answer": true,
            "max_results": max_results,
        });
        let response = executor.post("/search", &body).await?;

        let parsed: TavilyResponse = serde_json::from_value(response).map_err(|e| {
            ToolError::upstream(None, format!("Unexpected search response: {}", e))
        })?;
        let results: Vec<SearchHit> = parsed
            .results
            .into_iter()
            .filter_map(|item| {
                Some(SearchHit {
                    title: item.title?,
                    url: item.url?,
                    content: item.content,
                    score: item.score,
                })
            })
            .collect();

        Ok(json!({
            "query": query,
            "answer": parsed.answer,
            "results": results,
        }))
    }

    async fn run(&self, arguments: &Value) -> Result<ToolResponse> {
        let queries = Self::queries(arguments)?;
        let max_results = arguments
            .get("max_results")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, 20);
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| ToolError::Config("TAVILY_API_KEY not set".to_string()))?;

        let executor = ApiExecutor::new(self.client.clone(), AuthStrategy::None, self.policy)
            .with_base_url(self.base_url.as_str());
        let limit = self.policy.max_concurrency.max(1);

        let this = self;
        let executor = &executor;
        let api_key = api_key.as_str();
        let outcomes: Vec<(String, Result<Value>)> = stream::iter(queries)
            .map(move |query| async move {
                let result = this.search_one(executor, api_key, &query, max_results).await;
                (query, result)
            })
            .buffered(limit)
            .collect()
            .await;

        let succeeded = outcomes.iter().filter(|(_, r)| r.is_ok()).count();
        let total = outcomes.len();
        let results: Vec<Value> = outcomes
            .into_iter()
            .map(|(query, result)| match result {
                Ok(value) => value,
                Err(e) => {
                    warn!("Web search for '{}' failed: {}", query, e);
                    json!({"query": query, "error": e.to_string(), "kind": e.kind()})
                }
            })
            .collect();

        if succeeded == 0 {
            let error = ToolError::upstream(None, "Every search query failed");
            return Ok(ToolResponse::failure("Web search returned nothing", &error)
                .with_data(Value::Array(results)));
        }

        info!("Web search: {}/{} queries succeeded", succeeded, total);
        Ok(ToolResponse::success(Value::Array(results)))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current news and information; several queries run in parallel"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "queries": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Several related queries to run at once"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum results per query (default 5)"
                }
            }
        })
    }

    async fn execute(&self, arguments: Value) -> ToolResponse {
        match self.run(&arguments).await {
            Ok(response) => response,
            Err(e) => {
                error!("Web search failed: {}", e);
                ToolResponse::failure("Web search failed", &e)
            }
        }
    }
}
