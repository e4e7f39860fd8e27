use alloy_primitives::U256;
use rust_decimal::prelude::*;

use crate::error::{Result, ToolError};

/// 返回 10^decimals 的十进制值
pub fn pow10(decimals: u8) -> Result<Decimal> {
    let mut divisor = Decimal::from(1);
    for _ in 0..decimals {
        divisor = divisor
            .checked_mul(Decimal::from(10))
            .ok_or_else(|| ToolError::Precision(format!("10^{} 超出范围", decimals)))?;
    }
    Ok(divisor)
}

/// 将原始链上金额（最小单位）转换为人类可读的十进制格式
///
/// # 参数
/// * `raw_amount` - 最小单位的原始金额（APT 的 octa，EVM 代币的 10^decimals）
/// * `decimals` - 代币的小数位数
///
/// # 示例
/// ```ignore
/// let raw = U256::from(100_000_000u64); // 1 APT
/// let decimal = to_decimal(raw, 8)?; // 返回 Decimal::from(1)
/// ```
pub fn to_decimal(raw_amount: U256, decimals: u8) -> Result<Decimal> {
    let divisor = pow10(decimals)?;

    let amount_str = raw_amount.to_string();
    let amount_decimal = Decimal::from_str(&amount_str)
        .map_err(|e| ToolError::Precision(format!("Failed to parse amount: {}", e)))?;

    amount_decimal
        .checked_div(divisor)
        .ok_or_else(|| ToolError::Precision("Division overflow".to_string()))
}

/// 通过移动小数点精确缩放任意长度的整数（不受 Decimal 范围限制）
pub fn shift_decimal_str(raw_amount: U256, decimals: u8) -> String {
    let digits = raw_amount.to_string();
    let decimals = usize::from(decimals);

    let (int_part, frac_part) = if digits.len() > decimals {
        let split = digits.len() - decimals;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        ("0".to_string(), format!("{:0>width$}", digits, width = decimals))
    };

    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        int_part
    } else {
        format!("{}.{}", int_part, frac_part)
    }
}

/// 解析十进制整数字符串并按小数位数缩放，返回精确的十进制文本
pub fn scale_integer_str(digits: &str, decimals: u8) -> Result<String> {
    let raw = parse_u256(digits)?;
    Ok(shift_decimal_str(raw, decimals))
}

/// 解析链上整数金额（十进制字符串）
pub fn parse_u256(digits: &str) -> Result<U256> {
    let trimmed = digits.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ToolError::Precision(format!("不是整数金额: {}", digits)));
    }
    U256::from_str_radix(trimmed, 10)
        .map_err(|e| ToolError::Precision(format!("Failed to parse amount {}: {}", digits, e)))
}

/// 对已经解析为浮点数的 JSON 数值进行缩放
pub fn scale_f64(value: f64, decimals: u8) -> f64 {
    value / 10f64.powi(i32::from(decimals))
}

/// 将十进制金额转换为 JSON 可表示的浮点数
pub fn decimal_to_f64(value: Decimal) -> Result<f64> {
    value
        .normalize()
        .to_f64()
        .ok_or_else(|| ToolError::Precision(format!("无法表示为浮点数: {}", value)))
}

pub fn format_usd(value: f64) -> String {
    format!("${:.2}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_decimal_apt() {
        // 1 APT (10^8 octa)
        let raw = U256::from(100_000_000u64);
        let result = to_decimal(raw, 8).unwrap();
        assert_eq!(result, Decimal::from(1));
    }

    #[test]
    fn test_to_decimal_eth() {
        let raw = U256::from(1_500_000_000_000_000_000u64);
        let result = to_decimal(raw, 18).unwrap();
        assert_eq!(result, Decimal::from_str("1.5").unwrap());
    }

    #[test]
    fn test_shift_decimal_small_value() {
        assert_eq!(shift_decimal_str(U256::from(5u64), 3), "0.005");
        assert_eq!(shift_decimal_str(U256::from(1_000u64), 3), "1");
        assert_eq!(shift_decimal_str(U256::from(12_345u64), 2), "123.45");
    }

    #[test]
    fn test_scale_integer_beyond_decimal_range() {
        // 40 位整数超出 Decimal 的 28 位范围，文本缩放仍然精确
        let digits = "1234567890123456789012345678901234567890";
        let scaled = scale_integer_str(digits, 18).unwrap();
        assert_eq!(scaled, "1234567890123456789012.34567890123456789");
    }

    #[test]
    fn test_scale_integer_beyond_u256_is_precision_error() {
        // 2^256 有 78 位，80 位整数必然溢出
        let digits = "9".repeat(80);
        let err = scale_integer_str(&digits, 18).unwrap_err();
        assert!(matches!(err, ToolError::Precision(_)));
        assert!(matches!(scale_integer_str("1.5", 2), Err(ToolError::Precision(_))));
    }

    #[test]
    fn test_parse_u256_rejects_non_digits() {
        assert!(parse_u256("12a").is_err());
        assert!(parse_u256("-5").is_err());
        assert!(parse_u256("").is_err());
    }

    #[test]
    fn test_scale_f64_boundary() {
        assert_eq!(scale_f64(10_000_000.0, 8), 0.1);
    }

    #[test]
    fn test_format_usd() {
        assert_eq!(format_usd(70.0), "$70.00");
        assert_eq!(format_usd(1234.5), "$1234.50");
    }
}
