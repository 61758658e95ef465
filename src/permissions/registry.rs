//! Seam to the chain-backed permission registry.
//!
//! The wallet SDK owns granting, status tracking, and spend-call
//! preparation; this trait is the surface the rest of the runtime consumes.

use async_trait::async_trait;

use crate::chain::SpendCall;
use crate::error::PermissionError;
use crate::permissions::SpendPermission;

/// Parameters of a new allowance grant.
#[derive(Debug, Clone)]
pub struct AllowanceRequest {
    pub account: String,
    pub spender: String,
    pub token: String,
    pub chain_id: u64,
    /// Cap in base units.
    pub allowance: u128,
    pub period_in_days: u32,
}

#[async_trait]
pub trait PermissionRegistry: Send + Sync {
    /// All grants from `account` to `spender` on `chain_id`, any token.
    async fn fetch(
        &self,
        account: &str,
        spender: &str,
        chain_id: u64,
    ) -> Result<Vec<SpendPermission>, PermissionError>;

    /// Live unconsumed balance of a grant. This is the authoritative number;
    /// the static `allowance` only caps it.
    async fn remaining_spend(&self, permission: &SpendPermission)
        -> Result<u128, PermissionError>;

    /// Derives the spend authorization that pulls `amount` from the grantor
    /// into the spender's custody. Consumed once, never persisted.
    async fn prepare_spend_call(
        &self,
        permission: &SpendPermission,
        amount: u128,
    ) -> Result<SpendCall, PermissionError>;

    /// Runs the wallet-SDK grant flow. Fails opaquely if the user rejects.
    async fn request_allowance(
        &self,
        request: &AllowanceRequest,
    ) -> Result<SpendPermission, PermissionError>;
}
