//! `getCurrentTime`: wall-clock snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::error::ToolError;
use crate::tools::{Tool, ToolContext, ToolName, ToolOutcome};

fn snapshot(now: DateTime<Utc>) -> serde_json::Value {
    json!({
        "currentTime": now.format("%H:%M:%S").to_string(),
        "currentDate": now.format("%Y-%m-%d").to_string(),
        "timestamp": now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "timezone": "UTC",
    })
}

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> ToolName {
        ToolName::GetCurrentTime
    }

    fn description(&self) -> &str {
        "Get the current time and date"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(
        &self,
        _params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        Ok(ToolOutcome::Completed(snapshot(Utc::now())))
    }
}
