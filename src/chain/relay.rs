//! Collaborator seams for on-chain access.
//!
//! Everything the executor needs from the network sits behind these traits:
//! sponsored submission, completion polling, balance reads, and the swap
//! primitive. Production backends are out of scope; the simulator in
//! [`super::sim`] implements all of them deterministically.

use async_trait::async_trait;

use crate::chain::{Call, OperationReceipt};
use crate::error::RelayError;

/// Sponsored-gas relay: submits calls on behalf of a smart account and
/// reports their completion. Submission returns an operation id; completion
/// is observed by awaiting, never assumed.
#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn submit(&self, account: &str, calls: &[Call]) -> Result<String, RelayError>;

    async fn await_completion(&self, operation_id: &str) -> Result<OperationReceipt, RelayError>;
}

/// Read-only token state.
#[async_trait]
pub trait TokenReader: Send + Sync {
    async fn token_balance(&self, token: &str, holder: &str) -> Result<u128, RelayError>;
}

/// A swap order from the custodial account.
#[derive(Debug, Clone)]
pub struct SwapRequest {
    pub from_token: String,
    pub to_token: String,
    pub from_amount: u128,
    pub slippage_bps: u32,
}

/// Smart-account swap primitive. Returns the operation id of the submitted
/// swap; terminal status still comes from [`RelayClient::await_completion`].
#[async_trait]
pub trait SwapClient: Send + Sync {
    async fn submit_swap(&self, account: &str, request: &SwapRequest) -> Result<String, RelayError>;
}
