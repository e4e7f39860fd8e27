use crate::error::{Result, ToolError};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_ROUTER_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_ROUTER_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Timeout, retry and fan-out limits for one upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub max_concurrency: usize,
}

impl RetryPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Linear backoff: the wait before retry `n` (1-based) is `n * backoff_ms`.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(retry)))
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.backoff_ms = backoff_ms;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            timeout_ms: 30_000,
            max_retries: 2,
            backoff_ms: 2_000,
            max_concurrency: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeys {
    pub zerion: Option<String>,
    pub blockscout: Option<String>,
    pub seitrace: Option<String>,
    pub aptos: Option<String>,
    pub noves: Option<String>,
    pub tavily: Option<String>,
    pub birdeye: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl Default for RouterSettings {
    fn default() -> Self {
        RouterSettings {
            api_key: None,
            base_url: DEFAULT_ROUTER_BASE_URL.to_string(),
            model: DEFAULT_ROUTER_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub keys: ApiKeys,
    pub router: RouterSettings,
    pub http: RetryPolicy,
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            keys: ApiKeys::default(),
            router: RouterSettings::default(),
            http: RetryPolicy::default(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source, so callers and
    /// tests never have to mutate the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let keys = ApiKeys {
            zerion: var("ZERION_API_KEY"),
            blockscout: var("BLOCKSCOUT_API_KEY"),
            seitrace: var("SEITRACE_API_KEY"),
            aptos: var("APTOS_API_KEY"),
            noves: var("NOVES_API_KEY"),
            tavily: var("TAVILY_API_KEY"),
            birdeye: var("BIRDEYE_API_KEY"),
        };

        let router = RouterSettings {
            api_key: var("ROUTER_API_KEY").or_else(|| var("OPENAI_API_KEY")),
            base_url: var("ROUTER_BASE_URL").unwrap_or_else(|| DEFAULT_ROUTER_BASE_URL.to_string()),
            model: var("ROUTER_MODEL").unwrap_or_else(|| DEFAULT_ROUTER_MODEL.to_string()),
        };

        let defaults = RetryPolicy::default();
        let http = RetryPolicy {
            timeout_ms: parse_var(&var, "HTTP_TIMEOUT_MS", defaults.timeout_ms)?,
            max_retries: parse_var(&var, "HTTP_MAX_RETRIES", defaults.max_retries)?,
            backoff_ms: parse_var(&var, "HTTP_BACKOFF_MS", defaults.backoff_ms)?,
            max_concurrency: parse_var(&var, "HTTP_MAX_CONCURRENCY", defaults.max_concurrency)?
                .max(1),
        };

        Ok(Config {
            keys,
            router,
            http,
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        })
    }
}

fn parse_var<T, F>(var: &F, name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ToolError::Config(format!("Invalid {}: {}", name, e))),
        None => Ok(default),
    }
}
