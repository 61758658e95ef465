//! `convertUSDToUSDC`: pure USD-to-base-units arithmetic.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::chain;
use crate::error::ToolError;
use crate::tools::{invalid_params, JsonAmount, Tool, ToolContext, ToolName, ToolOutcome};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConvertParams {
    usd_amount: JsonAmount,
}

pub struct ConvertUsdTool;

#[async_trait]
impl Tool for ConvertUsdTool {
    fn name(&self) -> ToolName {
        ToolName::ConvertUsdToUsdc
    }

    fn description(&self) -> &str {
        "Convert USD amount to USDC token units (6 decimals). Use this when you need to calculate USDC amounts for transactions."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "usdAmount": {
                    "type": "number",
                    "description": "Amount in USD (e.g., 1.5 for $1.50)"
                }
            },
            "required": ["usdAmount"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let parsed: ConvertParams = serde_json::from_value(params)
            .map_err(|e| invalid_params(self.name(), e.to_string()))?;

        let usd = parsed
            .usd_amount
            .as_decimal()
            .ok_or_else(|| invalid_params(self.name(), "usdAmount must be a decimal number"))?;
        if usd <= rust_decimal::Decimal::ZERO {
            return Err(invalid_params(
                self.name(),
                "USD amount must be greater than 0",
            ));
        }
        let units = chain::usd_to_usdc_units(usd)
            .ok_or_else(|| invalid_params(self.name(), "usdAmount is out of range"))?;

        let usd_text = parsed.usd_amount.canonical();
        Ok(ToolOutcome::Completed(json!({
            "usdAmount": usd_text,
            "usdcAmount": units.to_string(),
            "usdcAmountFormatted": format!("{usd:.6} USDC"),
            "decimals": chain::USDC_DECIMALS,
            "calculation": format!("{usd_text} USD = {units} USDC units ({usd_text} * 10^6)"),
        })))
    }
}
