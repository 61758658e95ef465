//! Client-side retry driver for deferred fund movements.
//!
//! The gateway classifies and validates a movement but hands execution back
//! to the client, which owns the retry policy: up to [`MAX_ATTEMPTS`]
//! attempts with exponential backoff (1s, 2s, 4s, 8s between attempts).
//! Permissions are re-fetched and the spend plan rebuilt before every
//! attempt, so grants added mid-retry are picked up. A missing or
//! insufficient allowance ends the run at once; only transport, relay, and
//! registry failures are retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::chain::{self, SpendCall};
use crate::client::api::ApiClient;
use crate::error::{ClientError, PermissionError};
use crate::exec::{PendingSwap, PendingTransfer};
use crate::gateway::types::{SwapRequest, SwapResponse, TransferRequest, TransferResponse};
use crate::permissions::{build_spend_calls, Allocator};
use crate::tools::JsonAmount;

pub const MAX_ATTEMPTS: u32 = 5;

/// Final outcome of a fund movement, after all retries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementReport {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MovementReport {
    fn succeeded(message: String, transaction_hash: String, explorer_url: String) -> Self {
        Self {
            success: true,
            message,
            transaction_hash: Some(transaction_hash),
            explorer_url: Some(explorer_url),
            error: None,
        }
    }

    fn failed(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            transaction_hash: None,
            explorer_url: None,
            error: Some(error.into()),
        }
    }
}

/// The two gateway routes a movement can land on. [`ApiClient`] is the real
/// implementation; tests script their own.
#[async_trait]
pub trait MovementApi: Send + Sync {
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferResponse, ClientError>;
    async fn swap(&self, request: &SwapRequest) -> Result<SwapResponse, ClientError>;
}

#[async_trait]
impl MovementApi for ApiClient {
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferResponse, ClientError> {
        ApiClient::transfer(self, request).await
    }

    async fn swap(&self, request: &SwapRequest) -> Result<SwapResponse, ClientError> {
        ApiClient::swap(self, request).await
    }
}

/// One permission-gathering pass. `Blocked` outcomes are terminal.
enum Planned {
    Covered(Vec<SpendCall>),
    Blocked(MovementReport),
    Retry(String),
}

/// Executes pending operations against the gateway with retries.
pub struct RetryExecutor {
    api: Arc<dyn MovementApi>,
    allocator: Arc<Allocator>,
}

impl RetryExecutor {
    pub fn new(api: Arc<dyn MovementApi>, allocator: Arc<Allocator>) -> Self {
        Self { api, allocator }
    }

    /// Runs a transfer to completion. On success the message carries an
    /// attempt annotation when more than one attempt was needed.
    pub async fn execute_transfer(&self, pending: &PendingTransfer) -> MovementReport {
        let Some(required) = chain::parse_amount(&pending.amount) else {
            return MovementReport::failed(
                format!("Invalid amount: {}", pending.amount),
                "Invalid amount",
            );
        };

        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            let spend_calls = match self.plan_spend(&pending.user_address, required).await {
                Planned::Covered(calls) => calls,
                Planned::Blocked(report) => return report,
                Planned::Retry(error) => {
                    last_error = error;
                    self.backoff(attempt, &last_error).await;
                    continue;
                }
            };
            let request = TransferRequest {
                sender: pending.user_address.clone(),
                recipient: pending.recipient.clone(),
                token_address: chain::USDC_ADDRESS.to_string(),
                amount: JsonAmount::from(pending.amount.as_str()),
                spend_calls,
            };
            match self.api.transfer(&request).await {
                Ok(response) => {
                    info!(attempt, hash = %response.transfer_user_op_hash, "transfer settled");
                    return MovementReport::succeeded(
                        annotated("Transaction successful!", attempt),
                        response.transfer_user_op_hash,
                        response.explorer_url,
                    );
                }
                Err(e) => {
                    last_error = e.to_string();
                    self.backoff(attempt, &last_error).await;
                }
            }
        }

        MovementReport::failed(
            format!("Transfer failed after {MAX_ATTEMPTS} attempts: {last_error}"),
            last_error,
        )
    }

    /// Runs a swap to completion. `token_symbol` names the destination token
    /// in the success message; without one the address is shortened.
    pub async fn execute_swap(
        &self,
        pending: &PendingSwap,
        token_symbol: Option<&str>,
    ) -> MovementReport {
        let Some(required) = chain::parse_amount(&pending.amount) else {
            return MovementReport::failed(
                format!("Invalid amount: {}", pending.amount),
                "Invalid amount",
            );
        };
        let token_name = token_symbol
            .map(str::to_string)
            .unwrap_or_else(|| short_token(&pending.token_address));

        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            let spend_calls = match self.plan_spend(&pending.user_address, required).await {
                Planned::Covered(calls) => calls,
                Planned::Blocked(report) => return report,
                Planned::Retry(error) => {
                    last_error = error;
                    self.backoff(attempt, &last_error).await;
                    continue;
                }
            };
            let request = SwapRequest {
                sender: pending.user_address.clone(),
                token_address: pending.token_address.clone(),
                amount: JsonAmount::from(pending.amount.as_str()),
                spend_calls,
            };
            match self.api.swap(&request).await {
                Ok(response) => {
                    info!(attempt, hash = %response.trade_transaction_hash, "swap settled");
                    return MovementReport::succeeded(
                        annotated(
                            &format!(
                                "Swap successful! Exchanged ${} USDC for {token_name}",
                                pending.amount_usd
                            ),
                            attempt,
                        ),
                        response.trade_transaction_hash,
                        response.explorer_url,
                    );
                }
                Err(e) => {
                    last_error = e.to_string();
                    self.backoff(attempt, &last_error).await;
                }
            }
        }

        MovementReport::failed(
            format!("Swap failed after {MAX_ATTEMPTS} attempts: {last_error}"),
            last_error,
        )
    }

    /// Fetches the caller's grants fresh and plans the pull. No grants at
    /// all, or not enough allowance across them, is terminal.
    async fn plan_spend(&self, user_address: &str, required: u128) -> Planned {
        let permissions = match self.allocator.usable_permissions(user_address).await {
            Ok(permissions) => permissions,
            Err(e) => return Planned::Retry(e.to_string()),
        };
        if permissions.is_empty() {
            return Planned::Blocked(MovementReport::failed(
                PermissionError::NoPermissions.to_string(),
                "No permissions available",
            ));
        }
        let plan = match build_spend_calls(self.allocator.registry(), &permissions, required).await
        {
            Ok(plan) => plan,
            Err(e) => return Planned::Retry(e.to_string()),
        };
        if !plan.is_covered() {
            return Planned::Blocked(MovementReport::failed(
                PermissionError::Shortfall {
                    deficit: plan.shortfall,
                }
                .to_string(),
                "Insufficient permissions",
            ));
        }
        Planned::Covered(plan.spend_calls)
    }

    async fn backoff(&self, attempt: u32, error: &str) {
        warn!(attempt, error = %error, "attempt failed");
        if attempt < MAX_ATTEMPTS {
            sleep(Duration::from_secs(1 << (attempt - 1))).await;
        }
    }
}

fn annotated(base: &str, attempt: u32) -> String {
    if attempt > 1 {
        format!("{base} (succeeded on attempt {attempt})")
    } else {
        base.to_string()
    }
}

fn short_token(address: &str) -> String {
    if address.len() >= 10 {
        format!(
            "token at {}...{}",
            &address[..6],
            &address[address.len() - 4..]
        )
    } else {
        format!("token at {address}")
    }
}
