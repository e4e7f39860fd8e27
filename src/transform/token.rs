use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, ToolError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenImplementation {
    pub chain_id: String,
    pub address: Option<String>,
    pub decimals: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenLink {
    pub name: String,
    pub url: String,
}

/// Market snapshot of one token, independent of the data provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenSearchData {
    pub symbol: String,
    pub name: String,
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
    pub circulating_supply: Option<f64>,
    pub total_supply: Option<f64>,
    pub change_24h_percent: Option<f64>,
    pub implementations: Vec<TokenImplementation>,
    pub links: Vec<TokenLink>,
    pub icon: Option<String>,
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn decimals(value: Option<&Value>) -> Option<u8> {
    value
        .and_then(Value::as_u64)
        .and_then(|d| u8::try_from(d).ok())
}

/// First item of a Zerion `GET /v1/fungibles/?filter[search_query]=` response.
pub fn token_from_zerion(response: &Value) -> Result<TokenSearchData> {
    let attributes = response
        .get("data")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(|item| item.get("attributes"))
        .ok_or_else(|| ToolError::upstream(None, "No token matched the search"))?;

    let symbol = text(attributes.get("symbol"))
        .ok_or_else(|| ToolError::upstream(None, "Token result has no symbol"))?;
    let name = text(attributes.get("name")).unwrap_or_else(|| symbol.clone());

    let market = attributes.get("market_data");
    let market_field = |key: &str| number(market.and_then(|m| m.get(key)));

    let implementations = attributes
        .get("implementations")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(TokenImplementation {
                        chain_id: text(item.get("chain_id"))?,
                        address: text(item.get("address")),
                        decimals: decimals(item.get("decimals")),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let links = attributes
        .get("external_links")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let url = text(item.get("url"))?;
                    let name = text(item.get("name"))
                        .or_else(|| text(item.get("type")))
                        .unwrap_or_else(|| url.clone());
                    Some(TokenLink { name, url })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(TokenSearchData {
        symbol,
        name,
        price: market_field("price"),
        market_cap: market_field("market_cap"),
        circulating_supply: market_field("circulating_supply"),
        total_supply: market_field("total_supply"),
        change_24h_percent: number(
            market
                .and_then(|m| m.get("changes"))
                .and_then(|c| c.get("percent_1d")),
        ),
        implementations,
        links,
        icon: text(attributes.get("icon").and_then(|icon| icon.get("url"))),
    })
}

/// Birdeye `GET /defi/token_overview` response for a token on `chain`.
pub fn token_from_birdeye(response: &Value, chain: &str) -> Result<TokenSearchData> {
    if response.get("success").and_then(Value::as_bool) == Some(false) {
        let message = text(response.get("message"))
            .unwrap_or_else(|| "Birdeye request was not successful".to_string());
        return Err(ToolError::upstream(None, message));
    }

    let data = response
        .get("data")
        .filter(|data| data.is_object())
        .ok_or_else(|| ToolError::upstream(None, "Token overview response has no data"))?;

    let address = text(data.get("address"));
    let symbol = text(data.get("symbol"))
        .or_else(|| address.clone())
        .ok_or_else(|| ToolError::upstream(None, "Token overview has no symbol"))?;
    let name = text(data.get("name")).unwrap_or_else(|| symbol.clone());

    let mut links = Vec::new();
    if let Some(extensions) = data.get("extensions").and_then(Value::as_object) {
        for (name, url) in extensions {
            if let Some(url) = text(Some(url)).filter(|u| u.starts_with("http")) {
                links.push(TokenLink {
                    name: name.clone(),
                    url,
                });
            }
        }
    }

    Ok(TokenSearchData {
        symbol,
        name,
        price: number(data.get("price")),
        market_cap: number(data.get("marketCap")).or_else(|| number(data.get("mc"))),
        circulating_supply: number(data.get("circulatingSupply")),
        total_supply: number(data.get("totalSupply")).or_else(|| number(data.get("supply"))),
        change_24h_percent: number(data.get("priceChange24hPercent")),
        implementations: vec![TokenImplementation {
            chain_id: chain.to_string(),
            address,
            decimals: decimals(data.get("decimals")),
        }],
        links,
        icon: text(data.get("logoURI")),
    })
}
