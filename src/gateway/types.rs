//! Request and response DTOs for the gateway API.
//!
//! Everything here is shared with the terminal client, so responses derive
//! `Deserialize` as well.

use serde::{Deserialize, Serialize};

use crate::agent::{HistoryEntry, ToolUsage};
use crate::chain::{SpendCall, USDC_ADDRESS};
use crate::tools::JsonAmount;

// --- Errors ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

// --- Health ---

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

// --- Auth ---

#[derive(Debug, Serialize, Deserialize)]
pub struct NonceResponse {
    pub nonce: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub address: String,
    pub message: String,
    pub signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub ok: bool,
    pub address: String,
    pub session_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatusResponse {
    pub is_authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignOutResponse {
    pub message: String,
}

// --- Chat ---

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_used: Option<ToolUsage>,
    /// Set when a fund movement must run on the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_client_side: Option<bool>,
    /// `usdc-to-token` when the pending operation is a swap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_params: Option<serde_json::Value>,
}

// --- Server wallet ---

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerWalletResponse {
    pub address: String,
    pub server_wallet_address: String,
    pub smart_account_address: String,
    pub message: String,
}

// --- Fund movement ---

fn usdc_address() -> String {
    USDC_ADDRESS.to_string()
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub sender: String,
    pub recipient: String,
    #[serde(default = "usdc_address")]
    pub token_address: String,
    pub amount: JsonAmount,
    pub spend_calls: Vec<SpendCall>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub sender: String,
    pub token_address: String,
    pub amount: JsonAmount,
    pub spend_calls: Vec<SpendCall>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferDetails {
    pub spend_calls_executed: usize,
    pub total_amount: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub success: bool,
    pub message: String,
    pub pull_user_op_hash: String,
    pub transfer_user_op_hash: String,
    pub amount: String,
    pub recipient: String,
    pub token_address: String,
    pub explorer_url: String,
    pub details: TransferDetails,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResponse {
    pub success: bool,
    pub message: String,
    pub pull_user_op_hash: String,
    pub trade_transaction_hash: String,
    pub amount: String,
    pub token_address: String,
    pub explorer_url: String,
}
