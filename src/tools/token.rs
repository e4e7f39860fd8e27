use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::config::{ApiKeys, RetryPolicy};
use crate::error::{Result, ToolError};
use crate::http::{ApiExecutor, AuthStrategy};
use crate::tools::portfolio::{birdeye_chain, BIRDEYE_BASE_URL, ZERION_BASE_URL};
use crate::tools::{optional_str, required_str, validate_address, Tool, ToolResponse};
use crate::transform::token::{token_from_birdeye, token_from_zerion, TokenSearchData};

pub struct TokenSearchTool {
    client: Client,
    policy: RetryPolicy,
    zerion_key: Option<String>,
    birdeye_key: Option<String>,
    zerion_base: String,
    birdeye_base: String,
}

impl TokenSearchTool {
    pub fn new(client: Client, keys: &ApiKeys, policy: RetryPolicy) -> Self {
        TokenSearchTool {
            client,
            policy,
            zerion_key: keys.zerion.clone(),
            birdeye_key: keys.birdeye.clone(),
            zerion_base: ZERION_BASE_URL.to_string(),
            birdeye_base: BIRDEYE_BASE_URL.to_string(),
        }
    }

    pub fn with_base_urls(mut self, zerion: impl Into<String>, birdeye: impl Into<String>) -> Self {
        self.zerion_base = zerion.into();
        self.birdeye_base = birdeye.into();
        self
    }

    async fn search_zerion(&self, query: &str) -> Result<TokenSearchData> {
        let key = self
            .zerion_key
            .clone()
            .ok_or_else(|| ToolError::Config("ZERION_API_KEY not set".to_string()))?;

        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        let executor = ApiExecutor::new(self.client.clone(), AuthStrategy::Basic(key), self.policy)
            .with_base_url(self.zerion_base.as_str());
        let response = executor
            .execute(&format!(
                "/v1/fungibles/?currency=usd&filter[search_query]={}",
                encoded
            ))
            .await?;
        token_from_zerion(&response)
    }

    async fn overview_birdeye(&self, address: &str, chain: &str) -> Result<TokenSearchData> {
        validate_address(address)?;
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
            .execute(&format!("/defi/token_overview?address={}", address))
            .await?;
        token_from_birdeye(&response, chain)
    }

    async fn run(&self, arguments: &Value) -> Result<ToolResponse> {
        let query = required_str(arguments, "query")?;
        let chain = optional_str(arguments, "chain");

        // Birdeye looks tokens up by mint address only
        let birdeye = match chain.as_deref() {
            Some(_) => birdeye_chain(chain.as_deref(), &query),
            None => None,
        };
        let token = match birdeye {
            Some(chain) => self.overview_birdeye(&query, &chain).await?,
            None => self.search_zerion(&query).await?,
        };

        info!("Token search '{}' matched {}", query, token.symbol);
        let message = format!("{} ({})", token.name, token.symbol);
        let data = serde_json::to_value(&token)
            .map_err(|e| ToolError::Precision(format!("Unserializable token data: {}", e)))?;
        Ok(ToolResponse::success(data).with_message(message))
    }
}

#[async_trait]
impl Tool for TokenSearchTool {
    fn name(&self) -> &str {
        "search_token"
    }

    fn description(&self) -> &str {
        "Look up a token's price, market cap, supply, 24h change, deployments and links"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Token name or symbol; a mint address when chain is solana or sui"
                },
                "chain": {
                    "type": "string",
                    "description": "Optional chain; solana and sui look the address up on Birdeye"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolResponse {
        match self.run(&arguments).await {
            Ok(response) => response,
            Err(e) => {
                error!("Token search failed: {}", e);
                ToolResponse::failure("Failed to look up the token", &e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn keys() -> ApiKeys {
        ApiKeys {
            zerion: Some("zk_test".to_string()),
            birdeye: Some("be-key".to_string()),
            ..ApiKeys::default()
        }
    }

    fn tool(server: &mockito::Server) -> TokenSearchTool {
        let policy = RetryPolicy::default().with_timeout_ms(1_000).with_max_retries(0);
        TokenSearchTool::new(Client::new(), &keys(), policy).with_base_urls(server.url(), server.url())
    }

    #[tokio::test]
    async fn test_zerion_search() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/fungibles/")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("currency".into(), "usd".into()),
                Matcher::UrlEncoded("filter[search_query]".into(), "wrapped ether".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({"data": [{"attributes": {
                    "name": "Wrapped Ether",
                    "symbol": "WETH",
                    "market_data": {"price": 3000.0}
                }}]})
                .to_string(),
            )
            .create_async()
            .await;

        let response = tool(&server)
            .execute(json!({"query": "wrapped ether"}))
            .await;

        mock.assert_async().await;
        assert!(response.success);
        assert_eq!(response.data["symbol"], json!("WETH"));
        assert_eq!(response.message.as_deref(), Some("Wrapped Ether (WETH)"));
    }

    #[tokio::test]
    async fn test_birdeye_overview() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/defi/token_overview")
            .match_query(Matcher::UrlEncoded("address".into(), "So1111".into()))
            .match_header("x-chain", "solana")
            .with_status(200)
            .with_body(
                json!({"success": true, "data": {"address": "So1111", "symbol": "SOL", "price": 150.0}})
                    .to_string(),
            )
            .create_async()
            .await;

        let response = tool(&server)
            .execute(json!({"query": "So1111", "chain": "solana"}))
            .await;

        assert!(response.success);
        assert_eq!(response.data["implementations"][0]["chain_id"], json!("solana"));
    }

    #[tokio::test]
    async fn test_no_match_is_upstream_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/fungibles/")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("{\"data\": []}")
            .create_async()
            .await;

        let response = tool(&server).execute(json!({"query": "nothing"})).await;
        assert!(!response.success);
        assert_eq!(response.kind.as_deref(), Some("upstream_error"));
    }
}
