use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::RouterSettings;
use crate::error::{Result, ToolError};
use crate::router::{parse_endpoint_list, Router, SelectionRequest};

const ROUTER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as the chat completions API sends them.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

/// One chat completions message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        ChatMessage {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text("user", content)
    }

    pub fn assistant_tool_call(call: ToolCall) -> Self {
        ChatMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(vec![call]),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

/// Minimal OpenAI-compatible chat completions client
#[derive(Clone)]
pub struct LlmClient {
    inner: Arc<LlmClientInner>,
}

struct LlmClientInner {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(client: Client, base_url: String, api_key: String, model: String) -> Self {
        LlmClient {
            inner: Arc::new(LlmClientInner {
                client,
                base_url,
                api_key,
                model,
            }),
        }
    }

    pub fn from_settings(client: Client, settings: &RouterSettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| ToolError::Config("ROUTER_API_KEY not set".to_string()))?;

        settings
            .base_url
            .parse::<url::Url>()
            .map_err(|_| ToolError::Config("Invalid ROUTER_BASE_URL format".to_string()))?;

        Ok(Self::new(
            client,
            settings.base_url.clone(),
            api_key,
            settings.model.clone(),
        ))
    }

    pub fn model(&self) -> &str {
        &self.inner.model
    }

    /// Send one completion request; `tools` is the function-calling schema.
    pub async fn complete(&self, messages: &[ChatMessage], tools: Option<&Value>) -> Result<ChatMessage> {
        let url = format!("{}/chat/completions", self.inner.base_url.trim_end_matches('/'));

        let mut body = json!({
            "model": self.inner.model,
            "messages": messages,
            "temperature": 0,
        });
        if let Some(tools) = tools {
            body["tools"] = tools.clone();
        }

        debug!("Router request to {} model={}", url, self.inner.model);

        let response = self
            .inner
            .client
            .post(&url)
            .bearer_auth(&self.inner.api_key)
            .timeout(ROUTER_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Router request failed: {}", e);
                ToolError::Selection(format!("Model request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ToolError::Selection(format!(
                "Model returned HTTP {}: {}",
                status.as_u16(),
                text.chars().take(200).collect::<String>()
            )));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Selection(format!("Unreadable model response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| ToolError::Selection("Model returned no choices".to_string()))
    }
}

/// Build the routing instruction for a single-shot selection.
pub fn build_system_prompt(request: &SelectionRequest) -> String {
    let mut prompt = String::from(
        "You route user questions to blockchain explorer API endpoints.\n\
         Available GET paths:\n",
    );
    for entry in &request.catalog {
        prompt.push_str(&format!("- {}: {}\n", entry.path, entry.description));
    }

    if !request.instructions.is_empty() {
        prompt.push_str("\nRules:\n");
        for rule in &request.instructions {
            prompt.push_str(&format!("- {}\n", rule));
        }
    }

    prompt.push_str(&format!(
        "\nChoose at most {} paths that answer the question. Substitute path \
         parameters with concrete values from the question and inline any query \
         parameters. Answer with a JSON array of strings only, most relevant first.",
        request.max_endpoints
    ));
    prompt
}

/// Router backed by a chat model
#[derive(Clone)]
pub struct LlmRouter {
    client: LlmClient,
}

impl LlmRouter {
    pub fn new(client: LlmClient) -> Self {
        LlmRouter { client }
    }
}

#[async_trait]
impl Router for LlmRouter {
    async fn select(&self, request: &SelectionRequest) -> Result<Vec<String>> {
        let messages = vec![
            ChatMessage::system(build_system_prompt(request)),
            ChatMessage::user(request.query.clone()),
        ];

        let reply = self.client.complete(&messages, None).await?;
        let text = reply
            .content
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ToolError::Selection("Model returned an empty reply".to_string()))?;

        let endpoints = parse_endpoint_list(&text)?;
        info!("Model {} proposed {} endpoints", self.client.model(), endpoints.len());
        Ok(endpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openapi::PathSummary;

    fn request() -> SelectionRequest {
        SelectionRequest {
            query: "What coins does 0x1 hold?".to_string(),
            catalog: vec![PathSummary {
                path: "/accounts/{address}/resources".to_string(),
                description: "Get account resources".to_string(),
            }],
            instructions: vec!["Use the native address format".to_string()],
            max_endpoints: 3,
        }
    }

    fn client_for(server: &mockito::Server) -> LlmClient {
        LlmClient::new(
            Client::new(),
            server.url(),
            "sk-test".to_string(),
            "test-model".to_string(),
        )
    }

    #[test]
    fn test_system_prompt_lists_catalog_rules_and_cap() {
        let prompt = build_system_prompt(&request());
        assert!(prompt.contains("- /accounts/{address}/resources: Get account resources"));
        assert!(prompt.contains("- Use the native address format"));
        assert!(prompt.contains("at most 3 paths"));
    }

    #[test]
    fn test_from_settings_requires_key() {
        let err = LlmClient::from_settings(Client::new(), &RouterSettings::default()).err();
        assert!(matches!(err, Some(ToolError::Config(_))));
    }

    #[test]
    fn test_chat_message_accepts_null_content() {
        let message: ChatMessage = serde_json::from_value(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "makeApiCall", "arguments": "{\"endpoint\":\"/x\"}"}
            }]
        }))
        .unwrap();
        assert!(message.content.is_none());
        assert_eq!(message.tool_calls.unwrap()[0].function.name, "makeApiCall");
    }

    #[tokio::test]
    async fn test_llm_router_parses_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "choices": [{"message": {
                        "role": "assistant",
                        "content": "```json\n[\"/accounts/0x1/resources\"]\n```"
                    }}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let router = LlmRouter::new(client_for(&server));
        let endpoints = router.select(&request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(endpoints, vec!["/accounts/0x1/resources"]);
    }

    #[tokio::test]
    async fn test_llm_router_http_error_is_selection_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("overloaded")
            .create_async()
            .await;

        let err = LlmRouter::new(client_for(&server))
            .select(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Selection(_)));
    }

    #[tokio::test]
    async fn test_llm_router_unparsable_reply() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(
                json!({"choices": [{"message": {"role": "assistant", "content": "Sorry, no idea."}}]})
                    .to_string(),
            )
            .create_async()
            .await;

        let err = LlmRouter::new(client_for(&server))
            .select(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Selection(_)));
    }
}
