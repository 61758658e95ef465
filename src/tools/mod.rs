//! Tool registry for the agent loop.
//!
//! Tools are keyed by [`ToolName`], a closed enum of the wire-level names
//! the model is prompted with. Dispatch never matches on free strings: an
//! unknown name fails deserialization upstream and the draft is treated as
//! plain conversation. Adding a tool means one handler impl plus one
//! registry insert, the loop itself stays untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::exec::PendingOperation;

pub mod clock;
pub mod convert;
pub mod fund;
pub mod math;
pub mod permissions;
pub mod weather;

pub use clock::CurrentTimeTool;
pub use convert::ConvertUsdTool;
pub use fund::{SendUsdcTool, SwapUsdcTool};
pub use math::CalculateMathTool;
pub use permissions::SpendPermissionsTool;
pub use weather::WeatherTool;

/// Registered tool names, spelled exactly as the model emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ToolName {
    #[serde(rename = "sendUSDCTransaction")]
    SendUsdcTransaction,
    #[serde(rename = "swapUSDCToken")]
    SwapUsdcToken,
    #[serde(rename = "convertUSDToUSDC")]
    ConvertUsdToUsdc,
    #[serde(rename = "getUserSpendPermissions")]
    GetUserSpendPermissions,
    #[serde(rename = "getWeatherDetails")]
    GetWeatherDetails,
    #[serde(rename = "getCurrentTime")]
    GetCurrentTime,
    #[serde(rename = "calculateMath")]
    CalculateMath,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendUsdcTransaction => "sendUSDCTransaction",
            Self::SwapUsdcToken => "swapUSDCToken",
            Self::ConvertUsdToUsdc => "convertUSDToUSDC",
            Self::GetUserSpendPermissions => "getUserSpendPermissions",
            Self::GetWeatherDetails => "getWeatherDetails",
            Self::GetCurrentTime => "getCurrentTime",
            Self::CalculateMath => "calculateMath",
        }
    }

    /// Fund movers defer to the client and get the session identity injected.
    pub fn is_fund_moving(&self) -> bool {
        matches!(self, Self::SendUsdcTransaction | Self::SwapUsdcToken)
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request context every tool sees.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Wallet address of the authenticated session, when there is one.
    pub user_address: Option<String>,
}

impl ToolContext {
    pub fn authenticated(address: impl Into<String>) -> Self {
        Self {
            user_address: Some(address.into()),
        }
    }
}

/// What a tool hands back to the loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// A finished result the loop feeds into the synthesis pass.
    Completed(serde_json::Value),
    /// A fund movement the client must execute; synthesis is skipped and
    /// `message` becomes the assistant's reply verbatim.
    Deferred {
        message: String,
        operation: PendingOperation,
    },
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> ToolName;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError>;
}

/// Static lookup table over the registered tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<ToolName, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: ToolName) -> Option<Arc<dyn Tool>> {
        self.tools.get(&name).cloned()
    }

    pub fn tools(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn dispatch(
        &self,
        name: ToolName,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;
        tool.execute(params, ctx).await
    }
}

/// A JSON amount that may arrive as a number or a numeric string; models
/// and clients produce both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonAmount {
    Number(serde_json::Number),
    Text(String),
}

impl From<&str> for JsonAmount {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl JsonAmount {
    /// Shortest decimal rendering ("0.1", "2").
    pub fn canonical(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(t) => t.trim().to_string(),
        }
    }

    pub fn as_decimal(&self) -> Option<rust_decimal::Decimal> {
        self.canonical().parse().ok()
    }
}

pub(crate) fn invalid_params(name: ToolName, reason: impl Into<String>) -> ToolError {
    ToolError::InvalidParameters {
        name: name.to_string(),
        reason: reason.into(),
    }
}

pub(crate) fn execution_failed(name: ToolName, reason: impl Into<String>) -> ToolError {
    ToolError::ExecutionFailed {
        name: name.to_string(),
        reason: reason.into(),
    }
}
