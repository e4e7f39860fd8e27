//! Explorer integrations expressed as `DynamicToolConfig` values.

use crate::config::{ApiKeys, RetryPolicy};
use crate::http::AuthStrategy;
use crate::normalize::ScaleConfig;
use crate::openapi::SpecSource;
use crate::tools::dynamic::{DynamicToolConfig, ToolMode};

pub const APTOS_SPEC_URL: &str = "https://fullnode.mainnet.aptoslabs.com/v1/spec.yaml";
pub const APTOS_BASE_URL: &str = "https://api.mainnet.aptoslabs.com/v1";

pub const SEITRACE_SPEC_URL: &str = "https://seitrace.com/insights/swagger/v1/swagger.json";
pub const SEITRACE_BASE_URL: &str = "https://seitrace.com/insights";

pub const BLOCKSCOUT_SPEC_URL: &str =
    "https://raw.githubusercontent.com/blockscout/blockscout-api-v2-swagger/main/swagger.yaml";
pub const CREDITCOIN_BASE_URL: &str = "https://creditcoin.blockscout.com/api/v2";

pub const NOVES_SPEC_URL: &str = "https://translate.noves.fi/swagger/v1/swagger.json";
pub const NOVES_BASE_URL: &str = "https://translate.noves.fi";

/// Fields that carry raw token amounts next to a `decimals` field.
const EVM_AMOUNT_KEYS: [&str; 4] = ["value", "balance", "amount", "total_supply"];

fn auth_or_none(key: &Option<String>, auth: impl FnOnce(String) -> AuthStrategy) -> AuthStrategy {
    key.clone().map(auth).unwrap_or(AuthStrategy::None)
}

/// Aptos fullnode REST API; amounts are octas.
pub fn aptos(keys: &ApiKeys, policy: RetryPolicy) -> DynamicToolConfig {
    let mut config = DynamicToolConfig::new(
        "aptos_explorer",
        "Query the Aptos blockchain: accounts, resources, coin balances, transactions, blocks and events",
        SpecSource::Url(APTOS_SPEC_URL.to_string()),
    );
    config.base_url_override = Some(APTOS_BASE_URL.to_string());
    config.auth = auth_or_none(&keys.aptos, AuthStrategy::Bearer);
    config.policy = policy;
    config.scale = Some(ScaleConfig::APTOS);
    config.instructions = vec![
        "Aptos addresses are 0x-prefixed hex strings; keep them exactly as the user wrote them".to_string(),
        "Coin balances live under /accounts/{address}/resources as 0x1::coin::CoinStore entries".to_string(),
    ];
    config
}

/// SeiTrace explorer, covering both Cosmos and EVM sides of Sei.
pub fn sei(keys: &ApiKeys, policy: RetryPolicy) -> DynamicToolConfig {
    let mut config = DynamicToolConfig::new(
        "sei_explorer",
        "Query the Sei blockchain through SeiTrace: addresses, token balances, transactions and contracts",
        SpecSource::Url(SEITRACE_SPEC_URL.to_string()),
    );
    config.base_url_override = Some(SEITRACE_BASE_URL.to_string());
    config.auth = auth_or_none(&keys.seitrace, |key| AuthStrategy::header("x-api-key", key));
    config.policy = policy;
    config.scale = Some(ScaleConfig::EVM);
    config.amount_keys = EVM_AMOUNT_KEYS.to_vec();
    config.max_endpoints = 3;
    config.instructions = vec![
        "Use sei1... addresses for native endpoints and 0x... addresses for EVM endpoints".to_string(),
        "Add chain_id=pacific-1 as a query parameter when the endpoint accepts one".to_string(),
    ];
    config
}

/// Creditcoin's Blockscout instance; paths need parameter discovery, so the
/// model drives the calls itself.
pub fn creditcoin(keys: &ApiKeys, policy: RetryPolicy) -> DynamicToolConfig {
    let mut config = DynamicToolConfig::new(
        "creditcoin_explorer",
        "Query the Creditcoin blockchain explorer: addresses, tokens, transactions, blocks and smart contracts",
        SpecSource::Url(BLOCKSCOUT_SPEC_URL.to_string()),
    );
    config.base_url_override = Some(CREDITCOIN_BASE_URL.to_string());
    config.auth = auth_or_none(&keys.blockscout, |key| AuthStrategy::header("apikey", key));
    config.policy = policy;
    config.scale = Some(ScaleConfig::EVM);
    config.amount_keys = EVM_AMOUNT_KEYS.to_vec();
    config.mode = ToolMode::MultiStep { max_steps: 5 };
    config.instructions = vec![
        "Paths are relative to /api/v2; never repeat that prefix".to_string(),
        "Addresses are 0x-prefixed EVM addresses".to_string(),
    ];
    config
}

/// Noves Translate API; responses are already human-readable.
pub fn noves(keys: &ApiKeys, policy: RetryPolicy) -> DynamicToolConfig {
    let mut config = DynamicToolConfig::new(
        "noves_translate",
        "Describe wallet activity and transactions in plain terms using the Noves Translate API",
        SpecSource::Url(NOVES_SPEC_URL.to_string()),
    );
    config.base_url_override = Some(NOVES_BASE_URL.to_string());
    config.auth = auth_or_none(&keys.noves, |key| AuthStrategy::header("apiKey", key));
    config.policy = policy;
    config.max_endpoints = 3;
    config.instructions = vec![
        "Paths take a chain slug such as eth, base, polygon or sei-evm".to_string(),
        "Prefer /evm/{chain}/txs/{accountAddress} for wallet history".to_string(),
    ];
    config
}

/// Every preset, keyed by its tool group.
pub fn all(keys: &ApiKeys, policy: RetryPolicy) -> Vec<(&'static str, DynamicToolConfig)> {
    vec![
        ("aptos", aptos(keys, policy)),
        ("sei", sei(keys, policy)),
        ("creditcoin", creditcoin(keys, policy)),
        ("noves", noves(keys, policy)),
    ]
}
