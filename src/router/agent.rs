use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Result, ToolError};
use crate::http::ApiExecutor;
use crate::openapi::{get_path_details, resolve_path, ApiSpecification, PathSummary};
use crate::router::llm::{ChatMessage, FunctionCall, LlmClient, ToolCall};

pub const DEFAULT_MAX_STEPS: usize = 5;
const OBSERVATION_CHARS: usize = 12_000;

/// What the model wants to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    GetPathParameters { path: String },
    /// `params` fill `{name}` placeholders; leftovers become the query string.
    MakeApiCall {
        endpoint: String,
        params: Map<String, Value>,
    },
    Finish { answer: String },
}

impl AgentAction {
    fn name(&self) -> &'static str {
        match self {
            AgentAction::GetPathParameters { .. } => "getPathParameters",
            AgentAction::MakeApiCall { .. } => "makeApiCall",
            AgentAction::Finish { .. } => "finish",
        }
    }
}

/// One executed step and what it produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStep {
    pub action: String,
    pub input: String,
    pub observation: Value,
}

pub struct StepContext<'a> {
    pub query: &'a str,
    pub catalog: &'a [PathSummary],
    pub instructions: &'a [String],
    pub transcript: &'a [AgentStep],
}

/// Model side of the multi-step loop.
#[async_trait]
pub trait StepModel: Send + Sync {
    async fn next_action(&self, context: &StepContext<'_>) -> Result<AgentAction>;
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub steps: Vec<AgentStep>,
}

/// Drives a `StepModel` through parameter discovery and API calls, with a
/// hard step budget.
#[derive(Clone)]
pub struct AgentLoop {
    model: Arc<dyn StepModel>,
    max_steps: usize,
}

impl AgentLoop {
    pub fn new(model: Arc<dyn StepModel>, max_steps: usize) -> Self {
        AgentLoop {
            model,
            max_steps: max_steps.max(1),
        }
    }

    pub async fn run(
        &self,
        query: &str,
        instructions: &[String],
        spec: &ApiSpecification,
        catalog: &[PathSummary],
        executor: &ApiExecutor,
        normalize: &(dyn Fn(&Value) -> Value + Sync),
    ) -> Result<AgentOutcome> {
        let mut steps: Vec<AgentStep> = Vec::new();
        let mut last_data: Option<Value> = None;

        for step in 1..=self.max_steps {
            let context = StepContext {
                query,
                catalog,
                instructions,
                transcript: &steps,
            };
            let action = match self.model.next_action(&context).await {
                Ok(action) => action,
                Err(e) => match last_data {
                    Some(data) => {
                        warn!("Agent model failed at step {}, keeping last result: {}", step, e);
                        return Ok(AgentOutcome {
                            answer: None,
                            data: Some(data),
                            steps,
                        });
                    }
                    None => return Err(e),
                },
            };
            debug!("Agent step {}/{}: {:?}", step, self.max_steps, action);

            let (input, observation) = match &action {
                AgentAction::Finish { answer } => {
                    info!("Agent finished after {} steps", step - 1);
                    return Ok(AgentOutcome {
                        answer: Some(answer.clone()),
                        data: last_data,
                        steps,
                    });
                }
                AgentAction::GetPathParameters { path } => {
                    let observation = match get_path_details(spec, path) {
                        Ok(details) => json!(details),
                        // recoverable: the model can try another path
                        Err(e) => error_observation(&e),
                    };
                    (path.clone(), observation)
                }
                AgentAction::MakeApiCall { endpoint, params } => {
                    let resolved = if params.is_empty() {
                        Ok(endpoint.clone())
                    } else {
                        resolve_path(endpoint, params)
                    };
                    let observation = match resolved {
                        Ok(ref url) => match executor.execute(url).await {
                            Ok(value) => {
                                let value = normalize(&value);
                                last_data = Some(value.clone());
                                value
                            }
                            Err(e) => {
                                warn!("Agent API call {} failed: {}", url, e);
                                error_observation(&e)
                            }
                        },
                        // fed back so the model can fix its params
                        Err(ref e) => error_observation(e),
                    };
                    (resolved.unwrap_or_else(|_| endpoint.clone()), observation)
                }
            };

            steps.push(AgentStep {
                action: action.name().to_string(),
                input,
                observation,
            });
        }

        warn!("Agent step budget of {} exhausted", self.max_steps);
        match last_data {
            Some(data) => Ok(AgentOutcome {
                answer: None,
                data: Some(data),
                steps,
            }),
            None => Err(ToolError::Selection(format!(
                "Step budget of {} exhausted without a successful API call",
                self.max_steps
            ))),
        }
    }
}

fn error_observation(e: &ToolError) -> Value {
    json!({ "error": e.to_string(), "kind": e.kind() })
}

/// Function-calling schema offered to the model.
pub fn step_tools_schema() -> Value {
    json!([
        {
            "type": "function",
            "function": {
                "name": "getPathParameters",
                "description": "Get the methods, parameters and base URL of one API path",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Path template from the catalog"}
                    },
                    "required": ["path"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "makeApiCall",
                "description": "Issue a GET request and return the JSON response",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "endpoint": {
                            "type": "string",
                            "description": "Relative path, either fully substituted or a path template"
                        },
                        "params": {
                            "type": "object",
                            "description": "Values for {name} placeholders; the rest become query parameters"
                        }
                    },
                    "required": ["endpoint"]
                }
            }
        }
    ])
}

/// `StepModel` backed by a chat model with native tool calling
#[derive(Clone)]
pub struct LlmStepModel {
    client: LlmClient,
}

impl LlmStepModel {
    pub fn new(client: LlmClient) -> Self {
        LlmStepModel { client }
    }

    fn messages(context: &StepContext<'_>) -> Vec<ChatMessage> {
        let mut system = String::from(
            "You answer blockchain questions by calling explorer API endpoints.\n\
             Look up a path's parameters with getPathParameters, then call it with makeApiCall.\n\
             Available GET paths:\n",
        );
        for entry in context.catalog {
            system.push_str(&format!("- {}: {}\n", entry.path, entry.description));
        }
        for rule in context.instructions {
            system.push_str(&format!("Rule: {}\n", rule));
        }

        let mut messages = vec![ChatMessage::system(system), ChatMessage::user(context.query)];
        for (i, step) in context.transcript.iter().enumerate() {
            let call_id = format!("call_{}", i);
            let argument_key = if step.action == "getPathParameters" {
                "path"
            } else {
                "endpoint"
            };
            messages.push(ChatMessage::assistant_tool_call(ToolCall {
                id: call_id.clone(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: step.action.clone(),
                    arguments: json!({ argument_key: step.input }).to_string(),
                },
            }));

            let observation = step.observation.to_string();
            let observation: String = observation.chars().take(OBSERVATION_CHARS).collect();
            messages.push(ChatMessage::tool_result(call_id, observation));
        }
        messages
    }
}

/// Read the model's reply as an action.
pub fn parse_step_reply(reply: ChatMessage) -> Result<AgentAction> {
    if let Some(call) = reply.tool_calls.and_then(|calls| calls.into_iter().next()) {
        let arguments: Value = serde_json::from_str(&call.function.arguments).map_err(|e| {
            ToolError::Selection(format!("Malformed tool arguments from model: {}", e))
        })?;
        let argument = |key: &str| {
            arguments
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    ToolError::Selection(format!("{} call without '{}'", call.function.name, key))
                })
        };

        return match call.function.name.as_str() {
            "getPathParameters" => Ok(AgentAction::GetPathParameters {
                path: argument("path")?,
            }),
            "makeApiCall" => Ok(AgentAction::MakeApiCall {
                endpoint: argument("endpoint")?,
                params: arguments
                    .get("params")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            }),
            other => Err(ToolError::Selection(format!(
                "Model called unknown tool {}",
                other
            ))),
        };
    }

    match reply.content {
        Some(answer) if !answer.trim().is_empty() => Ok(AgentAction::Finish { answer }),
        _ => Err(ToolError::Selection(
            "Model returned neither a tool call nor an answer".to_string(),
        )),
    }
}

#[async_trait]
impl StepModel for LlmStepModel {
    async fn next_action(&self, context: &StepContext<'_>) -> Result<AgentAction> {
        let tools = step_tools_schema();
        let reply = self
            .client
            .complete(&Self::messages(context), Some(&tools))
            .await?;
        parse_step_reply(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::normalize::{normalize, ScaleConfig};
    use crate::openapi::list_paths_with_descriptions;
    use reqwest::Client;
    use std::sync::Mutex;

    /// Replays a script of actions, one per step.
    struct ScriptedModel {
        script: Mutex<Vec<AgentAction>>,
        seen_transcripts: Mutex<Vec<usize>>,
    }

    impl ScriptedModel {
        fn new(mut actions: Vec<AgentAction>) -> Self {
            actions.reverse();
            ScriptedModel {
                script: Mutex::new(actions),
                seen_transcripts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StepModel for ScriptedModel {
        async fn next_action(&self, context: &StepContext<'_>) -> Result<AgentAction> {
            self.seen_transcripts
                .lock()
                .unwrap()
                .push(context.transcript.len());
            self.script
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ToolError::Selection("script exhausted".to_string()))
        }
    }

    fn spec() -> ApiSpecification {
        ApiSpecification::from_document(json!({
            "paths": {
                "/accounts/{address}": {
                    "get": {
                        "description": "Get account",
                        "parameters": [{"name": "address", "in": "path"}]
                    }
                }
            }
        }))
        .unwrap()
    }

    fn executor(base: String) -> ApiExecutor {
        ApiExecutor::new(
            Client::new(),
            crate::http::AuthStrategy::None,
            RetryPolicy::default().with_max_retries(0).with_timeout_ms(2000),
        )
        .with_base_url(base)
    }

    fn get_params(path: &str) -> AgentAction {
        AgentAction::GetPathParameters {
            path: path.to_string(),
        }
    }

    fn call(endpoint: &str) -> AgentAction {
        AgentAction::MakeApiCall {
            endpoint: endpoint.to_string(),
            params: Map::new(),
        }
    }

    fn call_with(endpoint: &str, params: Value) -> AgentAction {
        AgentAction::MakeApiCall {
            endpoint: endpoint.to_string(),
            params: params.as_object().cloned().unwrap_or_default(),
        }
    }

    fn aptos(value: &Value) -> Value {
        normalize(value, &ScaleConfig::APTOS)
    }

    fn raw(value: &Value) -> Value {
        value.clone()
    }

    #[tokio::test]
    async fn test_loop_recovers_from_unknown_path_and_finishes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/accounts/0x1")
            .with_status(200)
            .with_body("{\"balance\": 250000000}")
            .create_async()
            .await;

        let model = Arc::new(ScriptedModel::new(vec![
            get_params("/account/{addr}"),
            get_params("/accounts/{address}"),
            call("/accounts/0x1"),
            AgentAction::Finish {
                answer: "2.5 APT".to_string(),
            },
        ]));
        let agent = AgentLoop::new(model.clone(), DEFAULT_MAX_STEPS);
        let spec = spec();
        let catalog = list_paths_with_descriptions(&spec);

        let outcome = agent
            .run("balance of 0x1", &[], &spec, &catalog, &executor(server.url()), &aptos)
            .await
            .unwrap();

        assert_eq!(outcome.answer.as_deref(), Some("2.5 APT"));
        assert_eq!(outcome.data, Some(json!({"balance": 2.5})));
        assert_eq!(outcome.steps.len(), 3);
        assert_eq!(outcome.steps[0].observation["kind"], json!("path_not_found"));
        assert_eq!(outcome.steps[1].observation[0]["method"], json!("GET"));
        assert_eq!(*model.seen_transcripts.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_loop_enforces_step_budget() {
        let model = Arc::new(ScriptedModel::new(vec![
            get_params("/nope"),
            get_params("/nope"),
            get_params("/nope"),
            get_params("/nope"),
        ]));
        let agent = AgentLoop::new(model.clone(), 2);
        let spec = spec();

        let err = agent
            .run("q", &[], &spec, &[], &executor("http://127.0.0.1:9".to_string()), &raw)
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::Selection(_)));
        // only two actions were requested
        assert_eq!(model.script.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_loop_returns_last_data_when_budget_runs_out() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/accounts/0x2")
            .with_status(200)
            .with_body("{\"ok\": true}")
            .create_async()
            .await;

        let model = Arc::new(ScriptedModel::new(vec![
            call("/accounts/0x2"),
            get_params("/accounts/{address}"),
        ]));
        let agent = AgentLoop::new(model, 2);
        let spec = spec();

        let outcome = agent
            .run("q", &[], &spec, &[], &executor(server.url()), &raw)
            .await
            .unwrap();
        assert!(outcome.answer.is_none());
        assert_eq!(outcome.data, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_loop_feeds_unresolvable_template_back_to_model() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/accounts/0x1/transactions")
            .match_query(mockito::Matcher::UrlEncoded("limit".into(), "5".into()))
            .with_status(200)
            .with_body("{\"count\": 2}")
            .create_async()
            .await;

        let model = Arc::new(ScriptedModel::new(vec![
            call_with("/accounts/{address}/transactions", json!({"limit": 5})),
            call_with(
                "/accounts/{address}/transactions",
                json!({"address": "0x1", "limit": 5}),
            ),
            AgentAction::Finish {
                answer: "2 transactions".to_string(),
            },
        ]));
        let agent = AgentLoop::new(model, DEFAULT_MAX_STEPS);
        let spec = spec();

        let outcome = agent
            .run("q", &[], &spec, &[], &executor(server.url()), &raw)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(outcome.steps[0].observation["kind"], json!("invalid_arguments"));
        assert_eq!(outcome.steps[0].input, "/accounts/{address}/transactions");
        assert_eq!(outcome.steps[1].input, "/accounts/0x1/transactions?limit=5");
        assert_eq!(outcome.data, Some(json!({"count": 2})));
    }

    #[tokio::test]
    async fn test_model_error_after_successful_call_keeps_data() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/accounts/0x3")
            .with_status(200)
            .with_body("{\"balance\": 100000000}")
            .create_async()
            .await;

        // the script runs dry on the second step
        let model = Arc::new(ScriptedModel::new(vec![call("/accounts/0x3")]));
        let agent = AgentLoop::new(model, DEFAULT_MAX_STEPS);
        let spec = spec();

        let outcome = agent
            .run("q", &[], &spec, &[], &executor(server.url()), &aptos)
            .await
            .unwrap();
        assert!(outcome.answer.is_none());
        assert_eq!(outcome.data, Some(json!({"balance": 1.0})));
        assert_eq!(outcome.steps.len(), 1);

        // with nothing fetched yet the model error surfaces
        let model = Arc::new(ScriptedModel::new(vec![]));
        let err = AgentLoop::new(model, DEFAULT_MAX_STEPS)
            .run("q", &[], &spec, &[], &executor(server.url()), &raw)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Selection(_)));
    }

    #[test]
    fn test_parse_step_reply() {
        let reply = ChatMessage::assistant_tool_call(ToolCall {
            id: "call_0".to_string(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: "makeApiCall".to_string(),
                arguments: "{\"endpoint\": \"/accounts/0x1\"}".to_string(),
            },
        });
        assert_eq!(parse_step_reply(reply).unwrap(), call("/accounts/0x1"));

        let reply = ChatMessage::assistant_tool_call(ToolCall {
            id: "call_1".to_string(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: "makeApiCall".to_string(),
                arguments: json!({
                    "endpoint": "/accounts/{address}/transactions",
                    "params": {"address": "0x1", "limit": 5}
                })
                .to_string(),
            },
        });
        assert_eq!(
            parse_step_reply(reply).unwrap(),
            call_with(
                "/accounts/{address}/transactions",
                json!({"address": "0x1", "limit": 5})
            )
        );

        // an unfilled placeholder is still a well-formed action
        let reply = ChatMessage::assistant_tool_call(ToolCall {
            id: "call_2".to_string(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: "makeApiCall".to_string(),
                arguments: json!({"endpoint": "/tokens/{a}", "params": {"limit": 5}}).to_string(),
            },
        });
        assert_eq!(
            parse_step_reply(reply).unwrap(),
            call_with("/tokens/{a}", json!({"limit": 5}))
        );

        let reply = ChatMessage::user("done");
        assert_eq!(
            parse_step_reply(reply).unwrap(),
            AgentAction::Finish {
                answer: "done".to_string()
            }
        );

        let reply = ChatMessage::assistant_tool_call(ToolCall {
            id: "call_0".to_string(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: "deleteEverything".to_string(),
                arguments: "{}".to_string(),
            },
        });
        assert!(parse_step_reply(reply).is_err());
    }

    #[test]
    fn test_messages_replay_transcript_as_tool_calls() {
        let transcript = vec![AgentStep {
            action: "getPathParameters".to_string(),
            input: "/accounts/{address}".to_string(),
            observation: json!([{"method": "GET"}]),
        }];
        let context = StepContext {
            query: "q",
            catalog: &[],
            instructions: &[],
            transcript: &transcript,
        };

        let messages = LlmStepModel::messages(&context);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role, "assistant");
        let call = &messages[2].tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.function.arguments, "{\"path\":\"/accounts/{address}\"}");
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_0"));
    }
}
