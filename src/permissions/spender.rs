//! Greedy allowance consumption.
//!
//! Walks permissions in the order given (the allocator supplies them oldest
//! first), asking the registry for each grant's live remaining spend, and
//! takes `min(remaining_amount, remaining_spend)` from each until the
//! required amount is covered. A shortfall is reported, not thrown: the
//! caller owns the decision to abort.

use tracing::debug;

use crate::chain::SpendCall;
use crate::error::PermissionError;
use crate::permissions::registry::PermissionRegistry;
use crate::permissions::SpendPermission;

/// How much of one permission a plan consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendContribution {
    pub permission_hash: String,
    pub amount: u128,
}

/// The prepared pull: spend calls plus the uncovered remainder.
#[derive(Debug, Clone)]
pub struct SpendPlan {
    pub spend_calls: Vec<SpendCall>,
    pub contributions: Vec<SpendContribution>,
    /// Base units still uncovered after all permissions; zero means the plan
    /// fully funds the operation.
    pub shortfall: u128,
}

impl SpendPlan {
    pub fn is_covered(&self) -> bool {
        self.shortfall == 0
    }

    pub fn total(&self) -> u128 {
        self.contributions.iter().map(|c| c.amount).sum()
    }
}

/// Builds the spend calls funding `required_amount` from `permissions`.
///
/// Remaining spend is queried live per grant; the static allowance can
/// overstate what is actually left. A grant whose remaining spend exactly
/// equals the outstanding amount is consumed in full.
pub async fn build_spend_calls(
    registry: &dyn PermissionRegistry,
    permissions: &[SpendPermission],
    required_amount: u128,
) -> Result<SpendPlan, PermissionError> {
    let mut remaining = required_amount;
    let mut spend_calls = Vec::new();
    let mut contributions = Vec::new();

    for permission in permissions {
        if remaining == 0 {
            break;
        }
        let available = registry.remaining_spend(permission).await?;
        if available == 0 {
            debug!(hash = %permission.permission_hash, "permission drained, skipping");
            continue;
        }
        let amount = remaining.min(available);
        let call = registry.prepare_spend_call(permission, amount).await?;
        debug!(
            hash = %permission.permission_hash,
            amount,
            available,
            "prepared spend call"
        );
        spend_calls.push(call);
        contributions.push(SpendContribution {
            permission_hash: permission.permission_hash.clone(),
            amount,
        });
        remaining -= amount;
    }

    Ok(SpendPlan {
        spend_calls,
        contributions,
        shortfall: remaining,
    })
}
