//! `getUserSpendPermissions`: read-only view over the caller's grants.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::ToolError;
use crate::permissions::{Allocator, PermissionRegistry};
use crate::tools::{execution_failed, invalid_params, Tool, ToolContext, ToolName, ToolOutcome};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionsParams {
    #[serde(default)]
    user_address: Option<String>,
}

pub struct SpendPermissionsTool {
    allocator: Arc<Allocator>,
    registry: Arc<dyn PermissionRegistry>,
}

impl SpendPermissionsTool {
    pub fn new(allocator: Arc<Allocator>, registry: Arc<dyn PermissionRegistry>) -> Self {
        Self {
            allocator,
            registry,
        }
    }
}

#[async_trait]
impl Tool for SpendPermissionsTool {
    fn name(&self) -> ToolName {
        ToolName::GetUserSpendPermissions
    }

    fn description(&self) -> &str {
        "Get the user's spend permissions for USDC on the Base network, including whether each permission is active or expired and how much allowance remains. Use this when users ask about their spend permissions, allowances, or spending limits."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "userAddress": {
                    "type": "string",
                    "description": "The user's wallet address (automatically populated from session if not provided)"
                }
            }
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let parsed: PermissionsParams = match params {
            serde_json::Value::Null => PermissionsParams::default(),
            other => serde_json::from_value(other)
                .map_err(|e| invalid_params(self.name(), e.to_string()))?,
        };

        let user_address = parsed
            .user_address
            .or_else(|| ctx.user_address.clone())
            .ok_or_else(|| {
                invalid_params(self.name(), "userAddress is required without a session")
            })?;

        let views = self
            .allocator
            .list_permissions(&user_address)
            .await
            .map_err(|e| execution_failed(self.name(), e.to_string()))?;

        let mut entries = Vec::with_capacity(views.len());
        for view in &views {
            let remaining = self
                .registry
                .remaining_spend(&view.permission)
                .await
                .map_err(|e| execution_failed(self.name(), e.to_string()))?;
            let mut entry = serde_json::to_value(view)
                .map_err(|e| execution_failed(self.name(), e.to_string()))?;
            if let Some(object) = entry.as_object_mut() {
                object.insert("remainingSpend".to_string(), json!(remaining.to_string()));
            }
            entries.push(entry);
        }

        Ok(ToolOutcome::Completed(json!({
            "success": true,
            "count": entries.len(),
            "permissions": entries,
            "message": format!("Found {} spend permission(s)", entries.len()),
            "details": {
                "userAddress": user_address,
                "spenderAddress": self.allocator.spender(),
                "token": "USDC",
                "network": "Base",
            },
        })))
    }
}
