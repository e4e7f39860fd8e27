use alloy_primitives::U256;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::sync::LazyLock;

use crate::precision;

/// Matches either a whole JSON string literal or a bare JSON number, so the
/// text pass can leave string contents alone.
static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:[^"\\]|\\.)*"|-?[0-9]+(?:\.[0-9]+)?(?:[eE][+-]?[0-9]+)?"#)
        .expect("token pattern is a valid regex")
});

/// 链上定点整数的缩放配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleConfig {
    /// 小数位数，缩放因子为 10^decimals
    pub decimals: u8,
    /// 大于等于该值的整数才被视为定点金额
    pub threshold: u64,
}

impl ScaleConfig {
    /// Aptos octa amounts (10^8).
    pub const APTOS: ScaleConfig = ScaleConfig {
        decimals: 8,
        threshold: 10_000_000,
    };

    /// EVM wei-style amounts (10^18).
    pub const EVM: ScaleConfig = ScaleConfig {
        decimals: 18,
        threshold: 1_000_000_000_000_000,
    };

    pub fn new(decimals: u8, threshold: u64) -> Self {
        ScaleConfig {
            decimals,
            threshold,
        }
    }
}

/// 递归遍历 JSON 值，将达到阈值的整数按缩放因子转换为十进制
///
/// 结构保持不变：数组与对象逐项递归，字符串、布尔值和 null 原样返回。
/// 带小数部分的数值视为已经是十进制，不做处理。
pub fn normalize(value: &Value, scale: &ScaleConfig) -> Value {
    match value {
        Value::Number(n) => scale_number(n, scale).unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(|v| normalize(v, scale)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize(v, scale)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

fn scale_number(n: &Number, scale: &ScaleConfig) -> Option<Value> {
    let raw = if let Some(u) = n.as_u64() {
        u as f64
    } else if n.is_i64() {
        // negative amounts never reach the threshold
        return None;
    } else {
        let f = n.as_f64()?;
        if f.fract() != 0.0 {
            return None;
        }
        f
    };

    if raw < scale.threshold as f64 {
        return None;
    }

    Number::from_f64(precision::scale_f64(raw, scale.decimals)).map(Value::Number)
}

/// 在解析之前对序列化的 JSON 文本执行同样的缩放
///
/// 只处理裸整数（字符串内部的数字保持不变），使用精确的文本移位，
/// 因此超过 f64 安全整数范围的金额也不会丢失精度。`tag` 为 true 时，
/// 替换结果为 `"<value> (scaled)"` 字符串。
pub fn normalize_text(text: &str, scale: &ScaleConfig, tag: bool) -> String {
    let threshold = U256::from(scale.threshold);

    TOKEN_PATTERN
        .replace_all(text, |caps: &Captures| {
            let token = &caps[0];
            match rescale_token(token, scale.decimals, threshold) {
                Some(scaled) if tag => format!("\"{} (scaled)\"", scaled),
                Some(scaled) => scaled,
                None => token.to_string(),
            }
        })
        .into_owned()
}

fn rescale_token(token: &str, decimals: u8, threshold: U256) -> Option<String> {
    // string literals, negatives and decimals all contain a non-digit byte
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let raw = precision::parse_u256(token).ok()?;
    if raw < threshold {
        return None;
    }
    Some(precision::shift_decimal_str(raw, decimals))
}

/// Rescales amount fields using a sibling `decimals` field where the
/// response carries one, falling back to the magnitude heuristic only for
/// numbers in objects that do not.
pub fn normalize_with_decimals(
    value: &Value,
    amount_keys: &[&str],
    fallback: Option<&ScaleConfig>,
) -> Value {
    match value {
        Value::Object(map) => {
            let decimals = map.get("decimals").and_then(read_decimals);
            let mut out = Map::with_capacity(map.len());
            for (key, child) in map {
                let next = match decimals {
                    Some(d) if amount_keys.contains(&key.as_str()) => {
                        scale_amount(child, d).unwrap_or_else(|| child.clone())
                    }
                    Some(_) if !child.is_object() && !child.is_array() => child.clone(),
                    _ => normalize_with_decimals(child, amount_keys, fallback),
                };
                out.insert(key.clone(), next);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| normalize_with_decimals(v, amount_keys, fallback))
                .collect(),
        ),
        Value::Number(n) => fallback
            .and_then(|scale| scale_number(n, scale))
            .unwrap_or_else(|| value.clone()),
        _ => value.clone(),
    }
}

fn read_decimals(value: &Value) -> Option<u8> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|d| u8::try_from(d).ok()),
        Value::String(s) => s.trim().parse::<u8>().ok(),
        _ => None,
    }
    .filter(|d| *d <= 77)
}

fn scale_amount(value: &Value, decimals: u8) -> Option<Value> {
    match value {
        // 字符串金额保持为字符串，避免精度损失
        Value::String(s) => precision::scale_integer_str(s, decimals)
            .ok()
            .map(Value::String),
        Value::Number(n) => {
            let raw = n.as_u64()?;
            let scaled = precision::to_decimal(U256::from(raw), decimals).ok()?;
            let scaled = precision::decimal_to_f64(scaled).ok()?;
            Number::from_f64(scaled).map(Value::Number)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_threshold_boundary() {
        let scale = ScaleConfig::APTOS;
        assert_eq!(normalize(&json!(9_999_999), &scale), json!(9_999_999));
        assert_eq!(normalize(&json!(10_000_000), &scale), json!(0.1));
    }

    #[test]
    fn test_normalize_preserves_structure() {
        let input = json!({
            "account": "0xabc",
            "balance": 250_000_000u64,
            "sequence": 42,
            "active": true,
            "coins": [{"amount": 100_000_000u64, "symbol": "APT"}, null],
        });

        let output = normalize(&input, &ScaleConfig::APTOS);

        assert_eq!(
            output,
            json!({
                "account": "0xabc",
                "balance": 2.5,
                "sequence": 42,
                "active": true,
                "coins": [{"amount": 1.0, "symbol": "APT"}, null],
            })
        );
    }

    #[test]
    fn test_normalize_skips_fractional_and_negative_values() {
        let input = json!([12_345_678.5, -50_000_000i64, "100000000"]);
        assert_eq!(normalize(&input, &ScaleConfig::APTOS), input);
    }

    #[test]
    fn test_normalize_scales_integers_beyond_u64() {
        let input: Value = serde_json::from_str("[100000000000000000000]").unwrap();
        assert_eq!(normalize(&input, &ScaleConfig::EVM), json!([100.0]));
    }

    #[test]
    fn test_normalize_text_skips_string_contents() {
        let text = r#"{"hash":"123456789012","value":2500000000000000000,"block":1234}"#;
        let out = normalize_text(text, &ScaleConfig::EVM, false);
        assert_eq!(out, r#"{"hash":"123456789012","value":2.5,"block":1234}"#);
    }

    #[test]
    fn test_normalize_text_keeps_precision_for_huge_values() {
        let text = r#"{"supply":123456789012345678901234567890}"#;
        let out = normalize_text(text, &ScaleConfig::EVM, true);
        assert_eq!(out, r#"{"supply":"123456789012.34567890123456789 (scaled)"}"#);

        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["supply"], json!("123456789012.34567890123456789 (scaled)"));
    }

    #[test]
    fn test_normalize_text_leaves_decimals_untouched() {
        let text = r#"[12345678901234567.5, -99999999999999999999]"#;
        assert_eq!(normalize_text(text, &ScaleConfig::EVM, false), text);
    }

    #[test]
    fn test_decimals_field_takes_precedence() {
        let input = json!({
            "tokens": [
                {"symbol": "USDC", "decimals": 6, "amount": "2500000", "updated": 1_700_000_000_000u64},
                {"symbol": "WETH", "decimals": "18", "balance": 1_500_000_000_000_000_000u64},
            ],
            "gas_used": 2_000_000_000_000_000u64,
        });

        let output = normalize_with_decimals(&input, &["amount", "balance"], Some(&ScaleConfig::EVM));

        assert_eq!(output["tokens"][0]["amount"], json!("2.5"));
        // 有 decimals 字段的对象中，其他数值不做启发式缩放
        assert_eq!(output["tokens"][0]["updated"], json!(1_700_000_000_000u64));
        assert_eq!(output["tokens"][1]["balance"], json!(1.5));
        assert_eq!(output["gas_used"], json!(0.002));
    }
}
