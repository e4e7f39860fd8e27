use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::cmp::Ordering;

use crate::error::{Result, ToolError};

pub const DEFAULT_MIN_VALUE: f64 = 1.0;
pub const DEFAULT_LIMIT: usize = 10;

/// Provider-neutral wallet snapshot rendered by the portfolio table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioData {
    pub attributes: PortfolioAttributes,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioAttributes {
    /// Chain or asset name to value, kept in display order.
    #[serde(serialize_with = "serialize_positions")]
    pub positions_distribution_by_chain: Vec<(String, f64)>,
    pub total: PortfolioTotal,
    pub changes: PortfolioChanges,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PortfolioTotal {
    pub positions: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PortfolioChanges {
    pub absolute_1d: f64,
    pub percent_1d: f64,
}

#[allow(clippy::ptr_arg)]
fn serialize_positions<S: Serializer>(
    positions: &Vec<(String, f64)>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(positions.len()))?;
    for (name, value) in positions {
        map.serialize_entry(name, value)?;
    }
    map.end()
}

impl PortfolioData {
    pub fn positions(&self) -> &[(String, f64)] {
        &self.attributes.positions_distribution_by_chain
    }

    pub fn total(&self) -> f64 {
        self.attributes.total.positions
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Zerion `GET /v1/wallets/{address}/portfolio` response.
pub fn from_zerion(response: &Value, currency: &str) -> Result<PortfolioData> {
    let attributes = response
        .pointer("/data/attributes")
        .and_then(Value::as_object)
        .ok_or_else(|| ToolError::upstream(None, "Portfolio response has no data.attributes"))?;

    let positions: Vec<(String, f64)> = attributes
        .get("positions_distribution_by_chain")
        .and_then(Value::as_object)
        .map(|chains| {
            chains
                .iter()
                .filter_map(|(chain, value)| number(Some(value)).map(|v| (chain.clone(), v)))
                .collect()
        })
        .unwrap_or_default();

    let total = number(attributes.get("total").and_then(|t| t.get("positions")))
        .unwrap_or_else(|| positions.iter().map(|(_, v)| v).sum());

    let changes = attributes.get("changes");
    let changes = PortfolioChanges {
        absolute_1d: number(changes.and_then(|c| c.get("absolute_1d"))).unwrap_or(0.0),
        percent_1d: number(changes.and_then(|c| c.get("percent_1d"))).unwrap_or(0.0),
    };

    Ok(PortfolioData {
        attributes: PortfolioAttributes {
            positions_distribution_by_chain: positions,
            total: PortfolioTotal { positions: total },
            changes,
        },
        currency: currency.to_lowercase(),
    })
}

/// Birdeye `GET /v1/wallet/token_list` response; one entry per token symbol.
pub fn from_birdeye(response: &Value) -> Result<PortfolioData> {
    if response.get("success").and_then(Value::as_bool) == Some(false) {
        let message = response
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Birdeye request was not successful");
        return Err(ToolError::upstream(None, message));
    }

    let data = response
        .get("data")
        .ok_or_else(|| ToolError::upstream(None, "Token list response has no data"))?;
    let items = data
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::upstream(None, "Token list response has no items"))?;

    let mut positions: Vec<(String, f64)> = Vec::new();
    for item in items {
        let name = ["symbol", "name", "address"]
            .iter()
            .filter_map(|key| item.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty());
        let (Some(name), Some(value)) = (name, number(item.get("valueUsd"))) else {
            continue;
        };

        match positions.iter_mut().find(|(existing, _)| existing == name) {
            Some((_, total)) => *total += value,
            None => positions.push((name.to_string(), value)),
        }
    }

    let total = number(data.get("totalUsd")).unwrap_or_else(|| positions.iter().map(|(_, v)| v).sum());

    Ok(PortfolioData {
        attributes: PortfolioAttributes {
            positions_distribution_by_chain: positions,
            total: PortfolioTotal { positions: total },
            changes: PortfolioChanges::default(),
        },
        currency: "usd".to_string(),
    })
}

/// Keep the `limit` largest entries worth at least `min_value`.
///
/// `total.positions` becomes the sum of the retained entries only.
pub fn filter_and_limit(portfolio: PortfolioData, min_value: f64, limit: usize) -> PortfolioData {
    let PortfolioData {
        attributes,
        currency,
    } = portfolio;

    let mut positions: Vec<(String, f64)> = attributes
        .positions_distribution_by_chain
        .into_iter()
        .filter(|(_, value)| value.is_finite() && *value >= min_value)
        .collect();

    positions.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    positions.truncate(limit);

    let total = positions.iter().map(|(_, value)| value).sum();

    PortfolioData {
        attributes: PortfolioAttributes {
            positions_distribution_by_chain: positions,
            total: PortfolioTotal { positions: total },
            changes: attributes.changes,
        },
        currency,
    }
}
