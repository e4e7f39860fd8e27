use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::config::{ApiKeys, RetryPolicy};
use crate::error::{Result, ToolError};
use crate::http::{ApiExecutor, AuthStrategy};
use crate::precision;
use crate::tools::{optional_str, required_str, validate_address, Tool, ToolResponse};
use crate::transform::portfolio::{self, PortfolioData, DEFAULT_LIMIT, DEFAULT_MIN_VALUE};

pub const ZERION_BASE_URL: &str = "https://api.zerion.io";
pub const BIRDEYE_BASE_URL: &str = "https://public-api.birdeye.so";

/// Chains served by Birdeye instead of Zerion.
pub const BIRDEYE_CHAINS: [&str; 2] = ["solana", "sui"];

/// Picks the Birdeye chain for a request, or `None` for Zerion.
pub(crate) fn birdeye_chain(chain: Option<&str>, address: &str) -> Option<String> {
    match chain.map(str::to_lowercase) {
        Some(chain) if BIRDEYE_CHAINS.contains(&chain.as_str()) => Some(chain),
        Some(_) => None,
        None if !address.starts_with("0x") => Some("solana".to_string()),
        None => None,
    }
}

pub struct WalletPortfolioTool {
    client: Client,
    policy: RetryPolicy,
    zerion_key: Option<String>,
    birdeye_key: Option<String>,
    zerion_base: String,
    birdeye_base: String,
    min_value: f64,
    limit: usize,
}

impl WalletPortfolioTool {
    pub fn new(client: Client, keys: &ApiKeys, policy: RetryPolicy) -> Self {
        WalletPortfolioTool {
            client,
            policy,
            zerion_key: keys.zerion.clone(),
            birdeye_key: keys.birdeye.clone(),
            zerion_base: ZERION_BASE_URL.to_string(),
            birdeye_base: BIRDEYE_BASE_URL.to_string(),
            min_value: DEFAULT_MIN_VALUE,
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn with_base_urls(mut self, zerion: impl Into<String>, birdeye: impl Into<String>) -> Self {
        self.zerion_base = zerion.into();
        self.birdeye_base = birdeye.into();
        self
    }

    pub fn with_filter(mut self, min_value: f64, limit: usize) -> Self {
        self.min_value = min_value;
        self.limit = limit;
        self
    }

    async fn from_zerion(&self, address: &str) -> Result<PortfolioData> {
        let key = self
            .zerion_key
            .clone()
            .ok_or_else(|| ToolError::Config("ZERION_API_KEY not set".to_string()))?;

        let executor = ApiExecutor::new(self.client.clone(), AuthStrategy::Basic(key), self.policy)
            .with_base_url(self.zerion_base.as_str());
        let response = executor
            .execute(&format!("/v1/wallets/{}/portfolio?currency=usd", address))
            .await?;
        portfolio::from_zerion(&response, "usd")
    }

    async fn from_birdeye(&self, address: &str, chain: &str) -> Result<PortfolioData> {
        let key = self
            .birdeye_key
            .clone()
            .ok_or_else(|| ToolError::Config("BIRDEYE_API_KEY not set".to_string()))?;

        let executor = ApiExecutor::new(
            self.client.clone(),
            AuthStrategy::header("X-API-KEY", key),
            self.policy,
        )
        .with_base_url(self.birdeye_base.as_str())
        .with_header("x-chain", chain);
        let response = executor
            .execute(&format!("/v1/wallet/token_list?wallet={}", address))
            .await?;
        portfolio::from_birdeye(&response)
    }

    async fn run(&self, arguments: &Value) -> Result<ToolResponse> {
        let address = required_str(arguments, "address")?;
        validate_address(&address)?;
        let chain = optional_str(arguments, "chain");

        let raw = match birdeye_chain(chain.as_deref(), &address) {
            Some(chain) => self.from_birdeye(&address, &chain).await?,
            None => self.from_zerion(&address).await?,
        };
        let filtered = portfolio::filter_and_limit(raw, self.min_value, self.limit);

        let message = format!(
            "Portfolio for {}: {} positions worth {}",
            address,
            filtered.positions().len(),
            precision::format_usd(filtered.total())
        );
        info!("{}", message);

        let data = serde_json::to_value(&filtered)
            .map_err(|e| ToolError::Precision(format!("Unserializable portfolio: {}", e)))?;
        Ok(ToolResponse::success(data).with_message(message))
    }
}

#[async_trait]
impl Tool for WalletPortfolioTool {
    fn name(&self) -> &str {
        "get_wallet_portfolio"
    }

    fn description(&self) -> &str {
        "Get the USD value of a wallet's holdings, broken down by chain (EVM) or by token (Solana, Sui)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "address": {
                    "type": "string",
                    "description": "Wallet address (0x... for EVM chains, base58 for Solana)"
                },
                "chain": {
                    "type": "string",
                    "description": "Optional chain name; solana or sui use Birdeye, anything else Zerion"
                }
            },
            "required": ["address"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolResponse {
        match self.run(&arguments).await {
            Ok(response) => response,
            Err(e) => {
                error!("Portfolio lookup failed: {}", e);
                ToolResponse::failure("Failed to fetch the wallet portfolio", &e)
            }
        }
    }
}
