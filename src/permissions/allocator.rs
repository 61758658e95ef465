//! Permission allocation: granting new allowances and enumerating existing
//! ones for the configured (spender, token, chain) triple.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::chain;
use crate::error::PermissionError;
use crate::permissions::registry::{AllowanceRequest, PermissionRegistry};
use crate::permissions::{PermissionStatus, SpendPermission};

/// A permission enriched with its derived lifecycle status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionView {
    #[serde(flatten)]
    pub permission: SpendPermission,
    pub status: PermissionStatus,
}

/// Requests and enumerates allowances. Stateless: every query goes back to
/// the registry.
pub struct Allocator {
    registry: Arc<dyn PermissionRegistry>,
    spender: String,
    token: String,
    chain_id: u64,
}

impl Allocator {
    pub fn new(
        registry: Arc<dyn PermissionRegistry>,
        spender: impl Into<String>,
        token: impl Into<String>,
        chain_id: u64,
    ) -> Self {
        Self {
            registry,
            spender: spender.into(),
            token: token.into(),
            chain_id,
        }
    }

    pub fn spender(&self) -> &str {
        &self.spender
    }

    /// The backing registry, for callers that plan spends themselves.
    pub fn registry(&self) -> &dyn PermissionRegistry {
        self.registry.as_ref()
    }

    /// Runs the grant flow for `allowance_usd` per `period_in_days`.
    pub async fn request_allowance(
        &self,
        account: &str,
        allowance_usd: Decimal,
        period_in_days: u32,
    ) -> Result<SpendPermission, PermissionError> {
        let allowance =
            chain::usd_to_usdc_units(allowance_usd).ok_or(PermissionError::RequestRejected {
                reason: format!("allowance {allowance_usd} is not a valid USD amount"),
            })?;
        let request = AllowanceRequest {
            account: account.to_string(),
            spender: self.spender.clone(),
            token: self.token.clone(),
            chain_id: self.chain_id,
            allowance,
            period_in_days,
        };
        let permission = self.registry.request_allowance(&request).await?;
        info!(
            account = %account,
            allowance,
            period_in_days,
            hash = %permission.permission_hash,
            "spend permission granted"
        );
        Ok(permission)
    }

    /// Grants from `account` to the configured spender, filtered to the
    /// configured token, oldest grant first, each tagged Active/Expired.
    pub async fn list_permissions(
        &self,
        account: &str,
    ) -> Result<Vec<PermissionView>, PermissionError> {
        self.list_permissions_at(account, Utc::now().timestamp_millis() as u64)
            .await
    }

    pub async fn list_permissions_at(
        &self,
        account: &str,
        now_ms: u64,
    ) -> Result<Vec<PermissionView>, PermissionError> {
        let mut permissions: Vec<SpendPermission> = self
            .registry
            .fetch(account, &self.spender, self.chain_id)
            .await?
            .into_iter()
            .filter(|p| p.token.eq_ignore_ascii_case(&self.token))
            .collect();
        // Oldest grants first, so spending exhausts them in FIFO order.
        permissions.sort_by_key(|p| p.start);
        Ok(permissions
            .into_iter()
            .map(|permission| PermissionView {
                status: permission.status_at(now_ms),
                permission,
            })
            .collect())
    }

    /// The raw permission sequence the spender consumes: same filter and
    /// order as [`Self::list_permissions`], without enrichment.
    pub async fn usable_permissions(
        &self,
        account: &str,
    ) -> Result<Vec<SpendPermission>, PermissionError> {
        Ok(self
            .list_permissions(account)
            .await?
            .into_iter()
            .map(|view| view.permission)
            .collect())
    }
}
