//! On-chain value objects shared by the executor, the gateway, and the client.
//!
//! Amounts are integers in the token's smallest unit (USDC has 6 decimals) and
//! travel as decimal strings on the wire. Addresses are lowercase
//! `0x`-prefixed hex strings, validated at the edges.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod erc20;
pub mod relay;
pub mod sim;

pub use relay::{RelayClient, SwapClient, SwapRequest, TokenReader};

/// Chain this deployment targets (Base mainnet).
pub const BASE_CHAIN_ID: u64 = 8453;

/// USDC token contract on Base.
pub const USDC_ADDRESS: &str = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913";

/// USDC uses 6 decimal places.
pub const USDC_DECIMALS: u32 = 6;

/// Canonical Permit2 deployment, shared across chains.
pub const PERMIT2_ADDRESS: &str = "0x000000000022d473030f116ddee9f6b43ac78ba3";

/// Activity page fund-movement responses point users at.
pub const EXPLORER_URL: &str = "https://account.base.app/activity";

/// A single low-level call: destination contract, calldata, optional native value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub to: String,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Call {
    pub fn new(to: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            data: data.into(),
            value: None,
        }
    }

    /// Native value carried by the call, zero when absent or unparseable.
    pub fn native_value(&self) -> u128 {
        self.value
            .as_deref()
            .and_then(|v| v.parse::<u128>().ok())
            .unwrap_or(0)
    }
}

/// A prepared spend authorization: the call sequence that pulls one
/// permission's contribution into custody. Serializes as a bare JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpendCall {
    pub calls: Vec<Call>,
}

impl SpendCall {
    pub fn new(calls: Vec<Call>) -> Self {
        Self { calls }
    }
}

/// Terminal and in-flight states reported by the relay for a submitted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Complete,
    Pending,
    Failed,
    /// Any status string the relay reports that we do not model.
    Other(String),
}

impl OperationStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Complete => "complete",
            Self::Pending => "pending",
            Self::Failed => "failed",
            Self::Other(raw) => raw,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "complete" => Self::Complete,
            "pending" => Self::Pending,
            "failed" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of waiting for a submitted operation.
#[derive(Debug, Clone)]
pub struct OperationReceipt {
    pub status: OperationStatus,
    pub transaction_hash: Option<String>,
}

/// True for a lowercase-or-mixed-case `0x` + 40 hex char address.
pub fn is_address(value: &str) -> bool {
    let Some(body) = value.strip_prefix("0x") else {
        return false;
    };
    body.len() == 40 && body.chars().all(|c| c.is_ascii_hexdigit())
}

/// Lowercases and validates a wallet address.
pub fn normalize_address(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if is_address(trimmed) {
        Some(trimmed.to_ascii_lowercase())
    } else {
        None
    }
}

/// Parses a base-unit amount from its wire form (decimal digits only).
pub fn parse_amount(value: &str) -> Option<u128> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

/// Formats base units with `decimals` places, trimming trailing zeros
/// ("0.7", "1", "0.25").
pub fn format_units(units: u128, decimals: u32) -> String {
    let scale = 10u128.pow(decimals);
    let whole = units / scale;
    let frac = units % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let mut frac_str = format!("{frac:0width$}", width = decimals as usize);
    while frac_str.ends_with('0') {
        frac_str.pop();
    }
    format!("{whole}.{frac_str}")
}

/// Formats a USDC base-unit amount as a decimal string.
pub fn format_usdc(units: u128) -> String {
    format_units(units, USDC_DECIMALS)
}

/// Converts a USD amount to USDC base units, flooring past 6 decimals.
/// None for negative amounts or values out of range.
pub fn usd_to_usdc_units(usd: Decimal) -> Option<u128> {
    use rust_decimal::prelude::ToPrimitive;

    if usd.is_sign_negative() {
        return None;
    }
    let scale = Decimal::from(10u64.pow(USDC_DECIMALS));
    usd.checked_mul(scale)?.floor().to_u128()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_addresses() {
        assert!(is_address("0x833589fcd6edb6e08f4c7c32d4f71b54bda02913"));
        assert!(is_address("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"));
        assert!(!is_address("833589fcd6edb6e08f4c7c32d4f71b54bda02913"));
        assert!(!is_address("0x1234"));
        assert!(!is_address("0x833589fcd6edb6e08f4c7c32d4f71b54bda0291g"));
    }

    #[test]
    fn normalizes_to_lowercase() {
        assert_eq!(
            normalize_address(" 0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913 "),
            Some("0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".to_string())
        );
        assert_eq!(normalize_address("nonsense"), None);
    }

    #[test]
    fn parses_wire_amounts() {
        assert_eq!(parse_amount("100000"), Some(100_000));
        assert_eq!(parse_amount(" 1 "), Some(1));
        assert_eq!(parse_amount("0x10"), None);
        assert_eq!(parse_amount("-5"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn formats_units_without_trailing_zeros() {
        assert_eq!(format_usdc(700_000), "0.7");
        assert_eq!(format_usdc(1_000_000), "1");
        assert_eq!(format_usdc(250_000), "0.25");
        assert_eq!(format_usdc(0), "0");
        assert_eq!(format_usdc(1_234_567), "1.234567");
        assert_eq!(format_units(1, 6), "0.000001");
    }

    #[test]
    fn spend_call_serializes_as_bare_array() {
        let spend = SpendCall::new(vec![Call::new("0xaaaa", "0xdead")]);
        let encoded = serde_json::to_string(&spend).expect("serialize");
        assert!(encoded.starts_with('['));
        let decoded: SpendCall = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, spend);
    }

    #[test]
    fn call_native_value_defaults_to_zero() {
        let mut call = Call::new("0xaaaa", "0x");
        assert_eq!(call.native_value(), 0);
        call.value = Some("42".to_string());
        assert_eq!(call.native_value(), 42);
    }

    #[test]
    fn usd_conversion_floors_past_six_decimals() {
        use rust_decimal_macros::dec;

        assert_eq!(usd_to_usdc_units(dec!(0.1)), Some(100_000));
        assert_eq!(usd_to_usdc_units(dec!(2)), Some(2_000_000));
        assert_eq!(usd_to_usdc_units(dec!(1.2345678)), Some(1_234_567));
        assert_eq!(usd_to_usdc_units(dec!(0)), Some(0));
        assert_eq!(usd_to_usdc_units(dec!(-1)), None);
    }

    #[test]
    fn operation_status_round_trips() {
        assert_eq!(OperationStatus::parse("complete"), OperationStatus::Complete);
        assert!(OperationStatus::parse("complete").is_complete());
        let odd = OperationStatus::parse("reverted");
        assert_eq!(odd.as_str(), "reverted");
        assert!(!odd.is_complete());
    }
}
