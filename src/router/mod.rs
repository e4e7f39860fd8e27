pub mod agent;
pub mod llm;

pub use agent::{AgentAction, AgentLoop, AgentOutcome, AgentStep, LlmStepModel, StepContext, StepModel};
pub use llm::{ChatMessage, LlmClient, LlmRouter};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{Result, ToolError};
use crate::openapi::PathSummary;

/// Default fan-out cap for one selection.
pub const DEFAULT_MAX_ENDPOINTS: usize = 5;

/// Everything a router sees when mapping a query onto the API surface.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionRequest {
    pub query: String,
    pub catalog: Vec<PathSummary>,
    /// Provider-specific contracts, e.g. which address format an endpoint takes.
    pub instructions: Vec<String>,
    pub max_endpoints: usize,
}

/// Maps a natural-language query onto endpoint candidates.
#[async_trait]
pub trait Router: Send + Sync {
    async fn select(&self, request: &SelectionRequest) -> Result<Vec<String>>;
}

/// Wraps a router with the cap and the empty-result check.
#[derive(Clone)]
pub struct EndpointSelector {
    router: Arc<dyn Router>,
    max_endpoints: usize,
}

impl EndpointSelector {
    pub fn new(router: Arc<dyn Router>, max_endpoints: usize) -> Self {
        EndpointSelector {
            router,
            max_endpoints: max_endpoints.max(1),
        }
    }

    pub fn max_endpoints(&self) -> usize {
        self.max_endpoints
    }

    /// Ask the router, then keep at most `max_endpoints` candidates in the
    /// router's own order.
    pub async fn select(
        &self,
        query: &str,
        catalog: &[PathSummary],
        instructions: &[String],
    ) -> Result<Vec<String>> {
        let request = SelectionRequest {
            query: query.to_string(),
            catalog: catalog.to_vec(),
            instructions: instructions.to_vec(),
            max_endpoints: self.max_endpoints,
        };

        let raw = self.router.select(&request).await?;
        let mut candidates = dedup_candidates(raw);

        if candidates.is_empty() {
            return Err(ToolError::Selection(
                "Router returned no endpoints".to_string(),
            ));
        }

        if candidates.len() > self.max_endpoints {
            warn!(
                "Router returned {} endpoints, keeping the first {}",
                candidates.len(),
                self.max_endpoints
            );
            candidates.truncate(self.max_endpoints);
        }

        info!("Selected endpoints: {:?}", candidates);
        Ok(candidates)
    }
}

fn dedup_candidates(raw: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for candidate in raw {
        let candidate = candidate.trim().to_string();
        if !candidate.is_empty() && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

/// Parse a model reply into endpoint strings.
///
/// Accepts a JSON array, an object with an `endpoints` array, or either of
/// those inside a markdown code fence.
pub fn parse_endpoint_list(text: &str) -> Result<Vec<String>> {
    let body = strip_code_fence(text.trim());

    let value: Value = serde_json::from_str(body).map_err(|e| {
        ToolError::Selection(format!("Router reply is not a JSON list ({}): {}", e, text))
    })?;

    let items = match &value {
        Value::Array(items) => items,
        Value::Object(map) => map
            .get("endpoints")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ToolError::Selection(format!("Router reply has no endpoints array: {}", text))
            })?,
        _ => {
            return Err(ToolError::Selection(format!(
                "Router reply is not a JSON list: {}",
                text
            )))
        }
    };

    Ok(items
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // drop the language tag line, e.g. ```json
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Offline router: ranks catalog entries by word overlap with the query.
#[derive(Debug, Clone, Default)]
pub struct KeywordRouter;

const STOPWORDS: [&str; 12] = [
    "the", "for", "and", "what", "show", "get", "with", "from", "this", "that", "are", "how",
];

impl KeywordRouter {
    fn tokens(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| t.len() >= 3 && !STOPWORDS.contains(t))
            .map(str::to_string)
            .collect()
    }

    fn address_in(query: &str) -> Option<&str> {
        query
            .split(|c: char| c.is_whitespace() || c == ',' || c == '?')
            .find(|t| t.starts_with("0x") && t.len() > 2)
    }

    fn fill_placeholders(path: &str, address: Option<&str>) -> String {
        let Some(address) = address else {
            return path.to_string();
        };

        let mut out = String::with_capacity(path.len());
        let mut rest = path;
        while let Some(start) = rest.find('{') {
            let Some(end) = rest[start..].find('}').map(|o| start + o) else {
                break;
            };
            let name = rest[start + 1..end].to_lowercase();
            out.push_str(&rest[..start]);
            if ["address", "account", "hash", "wallet"].iter().any(|k| name.contains(k)) {
                out.push_str(address);
            } else {
                out.push_str(&rest[start..=end]);
            }
            rest = &rest[end + 1..];
        }
        out.push_str(rest);
        out
    }
}

#[async_trait]
impl Router for KeywordRouter {
    async fn select(&self, request: &SelectionRequest) -> Result<Vec<String>> {
        let query_tokens = Self::tokens(&request.query);
        let address = Self::address_in(&request.query);

        let mut scored: Vec<(usize, &PathSummary)> = request
            .catalog
            .iter()
            .map(|entry| {
                let haystack = format!("{} {}", entry.path, entry.description).to_lowercase();
                let score = query_tokens
                    .iter()
                    .filter(|t| haystack.contains(t.as_str()))
                    .count();
                (score, entry)
            })
            .filter(|(score, _)| *score > 0)
            .collect();

        // stable sort keeps catalog order among equal scores
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        debug!("Keyword router scored {} candidates", scored.len());

        Ok(scored
            .into_iter()
            .map(|(_, entry)| Self::fill_placeholders(&entry.path, address))
            .collect())
    }
}

/// Router that replays a fixed answer and records what it was asked.
pub struct FixtureRouter {
    answer: std::result::Result<Vec<String>, String>,
    requests: Mutex<Vec<SelectionRequest>>,
}

impl FixtureRouter {
    pub fn new(endpoints: Vec<&str>) -> Self {
        FixtureRouter {
            answer: Ok(endpoints.into_iter().map(str::to_string).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        FixtureRouter {
            answer: Err(message.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SelectionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Router for FixtureRouter {
    async fn select(&self, request: &SelectionRequest) -> Result<Vec<String>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.answer.clone().map_err(ToolError::Selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<PathSummary> {
        vec![
            PathSummary {
                path: "/accounts/{address}/resources".to_string(),
                description: "Get account resources such as coin balances".to_string(),
            },
            PathSummary {
                path: "/accounts/{address}/transactions".to_string(),
                description: "Get account transactions".to_string(),
            },
            PathSummary {
                path: "/blocks/by_height/{height}".to_string(),
                description: "Get block by height".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn test_selector_truncates_to_prefix() {
        let router = Arc::new(FixtureRouter::new(vec!["/a", "/b", "/c", "/d", "/e", "/f", "/g"]));
        let selector = EndpointSelector::new(router, 5);

        let selected = selector.select("query", &catalog(), &[]).await.unwrap();
        assert_eq!(selected, vec!["/a", "/b", "/c", "/d", "/e"]);
    }

    #[tokio::test]
    async fn test_selector_passes_cap_and_instructions_to_router() {
        let router = Arc::new(FixtureRouter::new(vec!["/a"]));
        let selector = EndpointSelector::new(router.clone(), 3);
        let instructions = vec!["Use EVM addresses for /evm paths".to_string()];

        selector.select("balances", &catalog(), &instructions).await.unwrap();

        let requests = router.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].max_endpoints, 3);
        assert_eq!(requests[0].catalog.len(), 3);
        assert_eq!(requests[0].instructions, instructions);
    }

    #[tokio::test]
    async fn test_selector_rejects_empty_output() {
        let router = Arc::new(FixtureRouter::new(vec!["", "  "]));
        let selector = EndpointSelector::new(router, 5);
        let err = selector.select("query", &catalog(), &[]).await.unwrap_err();
        assert!(matches!(err, ToolError::Selection(_)));
    }

    #[tokio::test]
    async fn test_selector_propagates_router_failure() {
        let selector = EndpointSelector::new(Arc::new(FixtureRouter::failing("model down")), 5);
        let err = selector.select("query", &catalog(), &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "Endpoint selection failed: model down");
    }

    #[test]
    fn test_parse_endpoint_list_shapes() {
        assert_eq!(
            parse_endpoint_list("[\"/a\", \"/b\"]").unwrap(),
            vec!["/a", "/b"]
        );
        assert_eq!(
            parse_endpoint_list("{\"endpoints\": [\"/a\", 3]}").unwrap(),
            vec!["/a"]
        );
        assert_eq!(
            parse_endpoint_list("```json\n[\"/accounts/0x1\"]\n```").unwrap(),
            vec!["/accounts/0x1"]
        );
    }

    #[test]
    fn test_parse_endpoint_list_rejects_prose() {
        let err = parse_endpoint_list("I think you should call /accounts").unwrap_err();
        assert!(matches!(err, ToolError::Selection(_)));

        assert!(parse_endpoint_list("{\"paths\": []}").is_err());
    }

    #[tokio::test]
    async fn test_keyword_router_ranks_and_fills_address() {
        let request = SelectionRequest {
            query: "Show the transactions of account 0xabc".to_string(),
            catalog: catalog(),
            instructions: Vec::new(),
            max_endpoints: 5,
        };

        let selected = KeywordRouter.select(&request).await.unwrap();
        assert_eq!(
            selected,
            vec![
                "/accounts/0xabc/transactions".to_string(),
                "/accounts/0xabc/resources".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_keyword_router_no_match() {
        let request = SelectionRequest {
            query: "weather in Paris".to_string(),
            catalog: catalog(),
            instructions: Vec::new(),
            max_endpoints: 5,
        };
        assert!(KeywordRouter.select(&request).await.unwrap().is_empty());
    }
}
