//! The two-phase protocol between the agent loop and the client.
//!
//! A fund-moving tool never executes directly: it returns a typed
//! [`PendingOperation`] that the gateway hands to the client, which gathers
//! permissions in the user's authenticated context and calls back into the
//! executor endpoints. Amounts travel as base-unit decimal strings.

use serde::{Deserialize, Serialize};

use crate::chain;

/// Which executor endpoint a pending operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Transfer,
    Swap,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::Swap => "swap",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deferred transfer parameters, pre-validated by the tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransfer {
    pub recipient: String,
    /// Base units, decimal string.
    pub amount: String,
    /// Human USD amount ("0.1").
    #[serde(rename = "amountUSD")]
    pub amount_usd: String,
    pub user_address: String,
    pub smart_account_address: String,
}

/// Deferred swap parameters, pre-validated by the tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSwap {
    /// Destination token contract.
    pub token_address: String,
    /// Base units of USDC to swap, decimal string.
    pub amount: String,
    #[serde(rename = "amountUSD")]
    pub amount_usd: String,
    pub user_address: String,
    pub smart_account_address: String,
}

/// A typed deferred fund movement, distinct from a completed tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PendingOperation {
    Transfer(PendingTransfer),
    Swap(PendingSwap),
}

impl PendingOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Transfer(_) => OperationKind::Transfer,
            Self::Swap(_) => OperationKind::Swap,
        }
    }

    pub fn user_address(&self) -> &str {
        match self {
            Self::Transfer(t) => &t.user_address,
            Self::Swap(s) => &s.user_address,
        }
    }

    pub fn smart_account_address(&self) -> &str {
        match self {
            Self::Transfer(t) => &t.smart_account_address,
            Self::Swap(s) => &s.smart_account_address,
        }
    }

    /// Base-unit amount parsed from the wire string.
    pub fn amount_units(&self) -> Option<u128> {
        let raw = match self {
            Self::Transfer(t) => &t.amount,
            Self::Swap(s) => &s.amount,
        };
        chain::parse_amount(raw)
    }

    /// The untagged parameter object sent to clients as `transactionParams`.
    pub fn params_value(&self) -> serde_json::Value {
        match self {
            Self::Transfer(t) => serde_json::to_value(t).unwrap_or_default(),
            Self::Swap(s) => serde_json::to_value(s).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_transfer() -> PendingOperation {
        PendingOperation::Transfer(PendingTransfer {
            recipient: "0x3333333333333333333333333333333333333333".to_string(),
            amount: "100000".to_string(),
            amount_usd: "0.1".to_string(),
            user_address: "0x1111111111111111111111111111111111111111".to_string(),
            smart_account_address: "0x2222222222222222222222222222222222222222".to_string(),
        })
    }

    #[test]
    fn params_value_is_untagged_camel_case() {
        let params = pending_transfer().params_value();
        assert_eq!(params["amount"], "100000");
        assert_eq!(params["amountUSD"], "0.1");
        assert!(params.get("kind").is_none());
    }

    #[test]
    fn amount_units_parses_the_wire_string() {
        assert_eq!(pending_transfer().amount_units(), Some(100_000));
    }

    #[test]
    fn tagged_round_trip() {
        let op = pending_transfer();
        let encoded = serde_json::to_string(&op).expect("serialize");
        assert!(encoded.contains("\"kind\":\"transfer\""));
        let decoded: PendingOperation = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, op);
    }
}
