use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::RetryPolicy;
use crate::error::{Result, ToolError};
use crate::normalize::{self, ScaleConfig};

const BODY_SNIPPET_CHARS: usize = 200;
const HTML_SNIFF_CHARS: usize = 1024;

/// How a provider expects its API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    None,
    /// `Authorization: Bearer <key>`
    Bearer(String),
    /// `Authorization: Basic base64(<key>:)`
    Basic(String),
    /// Custom header such as `x-api-key` or `apiKey`.
    Header { name: String, value: String },
}

impl AuthStrategy {
    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        AuthStrategy::Header {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            AuthStrategy::None => request,
            AuthStrategy::Bearer(key) => request.bearer_auth(key),
            AuthStrategy::Basic(key) => request.header(
                "Authorization",
                format!("Basic {}", STANDARD.encode(format!("{}:", key))),
            ),
            AuthStrategy::Header { name, value } => request.header(name.as_str(), value.as_str()),
        }
    }
}

/// Result of one endpoint in a fan-out.
#[derive(Debug, Clone)]
pub struct EndpointOutcome {
    pub endpoint: String,
    pub result: Result<Value>,
}

impl EndpointOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn to_json(&self) -> Value {
        match &self.result {
            Ok(data) => json!({ "endpoint": self.endpoint, "data": data }),
            Err(e) => json!({
                "endpoint": self.endpoint,
                "error": e.to_string(),
                "kind": e.kind(),
            }),
        }
    }
}

/// Issues GET requests against one upstream provider
#[derive(Clone)]
pub struct ApiExecutor {
    inner: Arc<ApiExecutorInner>,
}

#[derive(Clone)]
struct ApiExecutorInner {
    client: Client,
    base_url: Option<String>,
    auth: AuthStrategy,
    headers: Vec<(String, String)>,
    policy: RetryPolicy,
    timeout_markers: Vec<String>,
    text_scale: Option<(ScaleConfig, bool)>,
}

impl ApiExecutor {
    pub fn new(client: Client, auth: AuthStrategy, policy: RetryPolicy) -> Self {
        ApiExecutor {
            inner: Arc::new(ApiExecutorInner {
                client,
                base_url: None,
                auth,
                headers: Vec::new(),
                policy,
                timeout_markers: vec!["timed out".to_string(), "timeout".to_string()],
                text_scale: None,
            }),
        }
    }

    fn with_inner<F: FnOnce(&mut ApiExecutorInner)>(self, update: F) -> Self {
        let mut inner = Arc::unwrap_or_clone(self.inner);
        update(&mut inner);
        ApiExecutor {
            inner: Arc::new(inner),
        }
    }

    pub fn with_base_url(self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.with_inner(|inner| inner.base_url = Some(base_url))
    }

    /// Extra header sent with every request, e.g. a chain selector.
    pub fn with_header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let header = (name.into(), value.into());
        self.with_inner(|inner| inner.headers.push(header))
    }

    /// Error codes/messages in a JSON error body that mean "retry me".
    pub fn with_timeout_markers(self, markers: Vec<String>) -> Self {
        self.with_inner(|inner| inner.timeout_markers = markers)
    }

    /// Rescale large integers in the raw body before it is parsed.
    pub fn with_text_scaling(self, scale: ScaleConfig, tag: bool) -> Self {
        self.with_inner(|inner| inner.text_scale = Some((scale, tag)))
    }

    pub fn base_url(&self) -> Option<&str> {
        self.inner.base_url.as_deref()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// Absolute endpoints pass through; relative ones are joined to the base URL.
    pub fn build_url(&self, endpoint: &str) -> Result<String> {
        let endpoint = endpoint.trim();
        let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            let base = self.inner.base_url.as_deref().ok_or_else(|| {
                ToolError::Config(format!("No base URL configured for endpoint {}", endpoint))
            })?;
            format!(
                "{}/{}",
                base.trim_end_matches('/'),
                endpoint.trim_start_matches('/')
            )
        };

        url::Url::parse(&url)
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid endpoint URL {}: {}", url, e)))?;
        Ok(url)
    }

    /// GET one endpoint, retrying timeouts with linear backoff.
    pub async fn execute(&self, endpoint: &str) -> Result<Value> {
        self.send(Method::GET, endpoint, None).await
    }

    /// POST a JSON body with the same auth, retry and classification as GET.
    pub async fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
        self.send(Method::POST, endpoint, Some(body)).await
    }

    async fn send(&self, method: Method, endpoint: &str, body: Option<&Value>) -> Result<Value> {
        let url = self.build_url(endpoint)?;
        let policy = self.inner.policy;

        let mut retries = 0;
        loop {
            match self.send_once(method.clone(), &url, body).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retries < policy.max_retries => {
                    retries += 1;
                    let delay = policy.backoff_for(retries);
                    warn!(
                        "Retrying {} ({}/{}) after {}ms: {}",
                        url,
                        retries,
                        policy.max_retries,
                        delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("Request to {} failed: {}", url, e);
                    return Err(e);
                }
            }
        }
    }

    async fn send_once(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
        debug!("{} {}", method, url);

        let mut request = self
            .inner
            .client
            .request(method, url)
            .header("Accept", "application/json")
            .timeout(self.inner.policy.timeout());
        for (name, value) in &self.inner.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = self
            .inner
            .auth
            .apply(request)
            .send()
            .await
            .map_err(|e| map_transport_error(url, e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| map_transport_error(url, e))?;

        let body = match &self.inner.text_scale {
            Some((scale, tag)) => normalize::normalize_text(&body, scale, *tag),
            None => body,
        };

        classify_response(status, &body, &self.inner.timeout_markers)
    }

    /// Run every endpoint concurrently, at most `max_concurrency` in flight.
    ///
    /// Outcomes come back in input order; a failed endpoint never cancels
    /// its siblings.
    pub async fn execute_all(&self, endpoints: &[String]) -> Vec<EndpointOutcome> {
        let limit = self.inner.policy.max_concurrency.max(1);
        let this = self;

        stream::iter(endpoints.iter().cloned())
            .map(move |endpoint| async move {
                let result = this.execute(&endpoint).await;
                EndpointOutcome { endpoint, result }
            })
            .buffered(limit)
            .collect()
            .await
    }
}

fn map_transport_error(url: &str, e: reqwest::Error) -> ToolError {
    if e.is_timeout() {
        ToolError::Timeout(url.to_string())
    } else {
        ToolError::Network(format!("{}: {}", url, e))
    }
}

/// Heuristic HTML sniff over the start of the body.
pub fn looks_like_html(body: &str) -> bool {
    let head: String = body
        .trim_start()
        .chars()
        .take(HTML_SNIFF_CHARS)
        .collect::<String>()
        .to_ascii_lowercase();
    head.contains("<!doctype") || head.contains("<html")
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > BODY_SNIPPET_CHARS {
        format!("{}...", trimmed.chars().take(BODY_SNIPPET_CHARS).collect::<String>())
    } else {
        trimmed.to_string()
    }
}

/// Turn a raw response into data or a classified error.
pub fn classify_response(status: u16, body: &str, timeout_markers: &[String]) -> Result<Value> {
    if looks_like_html(body) {
        return Err(ToolError::upstream(
            Some(status),
            "Received an HTML page instead of JSON; the endpoint is probably invalid",
        ));
    }

    // error bodies may carry a timeout marker whatever the status
    let parsed = serde_json::from_str::<Value>(body);
    if let Ok(value) = &parsed {
        if body_signals_timeout(value, timeout_markers) {
            return Err(ToolError::Timeout(format!(
                "Upstream reported a timeout (HTTP {}): {}",
                status,
                snippet(body)
            )));
        }
    }

    if !(200..300).contains(&status) {
        return Err(ToolError::upstream(Some(status), snippet(body)));
    }

    parsed.map_err(|e| {
        ToolError::upstream(
            Some(status),
            format!("Response is not valid JSON ({}): {}", e, snippet(body)),
        )
    })
}

fn body_signals_timeout(value: &Value, markers: &[String]) -> bool {
    if markers.is_empty() {
        return false;
    }

    let candidates = [
        value.get("error"),
        value.pointer("/error/code"),
        value.pointer("/error/message"),
        value.get("error_code"),
        value.get("errorCode"),
    ];

    candidates
        .iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .any(|text| {
            let text = text.to_lowercase();
            markers.iter().any(|m| text.contains(&m.to_lowercase()))
        })
}
