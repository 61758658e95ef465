//! Spend-permission data model.
//!
//! A permission is a delegated, time-bounded allowance from a grantor
//! (`account`) to the custodial smart account (`spender`) for one token.
//! Permissions are never mutated locally: consumption is tracked by the
//! registry and observed through its status query.

use serde::{Deserialize, Serialize};

pub mod allocator;
pub mod registry;
pub mod spender;

pub use allocator::{Allocator, PermissionView};
pub use registry::{AllowanceRequest, PermissionRegistry};
pub use spender::{build_spend_calls, SpendContribution, SpendPlan};

/// A delegated spend allowance as reported by the permission registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendPermission {
    /// Grantor wallet.
    pub account: String,
    /// Custodial smart account allowed to spend.
    pub spender: String,
    /// Token contract the allowance covers.
    pub token: String,
    pub chain_id: u64,
    /// Granted cap, in the token's smallest unit.
    pub allowance: u128,
    pub period_in_days: u32,
    /// Validity window start, unix seconds.
    pub start: u64,
    /// Validity window end, unix seconds. Open-ended when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
    /// Proof of grant produced by the wallet signing flow.
    pub signature: String,
    /// Registry-unique id for this grant.
    pub permission_hash: String,
}

impl SpendPermission {
    /// Usable while the validity window has not closed.
    pub fn status_at(&self, now_ms: u64) -> PermissionStatus {
        PermissionStatus::derive(self.end, now_ms)
    }
}

/// Derived lifecycle state of a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Active,
    Expired,
}

impl PermissionStatus {
    /// Active while there is no end or the end (in seconds) has not passed
    /// the current wall clock (in milliseconds).
    pub fn derive(end: Option<u64>, now_ms: u64) -> Self {
        match end {
            Some(end) if (end as u128) * 1000 < now_ms as u128 => Self::Expired,
            _ => Self::Active,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
