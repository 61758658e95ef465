//! Draft classification: toolcall JSON or plain conversation.
//!
//! The draft pass is instructed to emit a raw JSON object when it wants a
//! tool, but models routinely wrap it in a markdown fence anyway. Anything
//! that fails the strict parse, including an unrecognized tool name, is
//! treated as conversational text rather than an error.

use serde::Deserialize;

use crate::tools::ToolName;

/// Substring the cleaned draft must carry verbatim before a parse is even
/// attempted.
const TOOLCALL_MARKER: &str = "\"type\": \"toolcall\"";

/// A parsed tool invocation from the draft pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub toolname: ToolName,
    pub parameters: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawDraft {
    Toolcall {
        toolname: ToolName,
        #[serde(default)]
        parameters: serde_json::Value,
    },
}

/// Removes a wrapping markdown code fence, tolerating a `json` language tag.
fn strip_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    for prefix in ["```json", "```"] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim_start();
            if let Some(body) = text.strip_suffix("```") {
                text = body.trim_end();
            }
            break;
        }
    }
    text
}

/// Decides whether a draft is a tool call.
///
/// Returns `None` for anything conversational, malformed, or naming a tool
/// that does not exist.
pub fn classify(draft: &str) -> Option<ToolCall> {
    let cleaned = strip_fences(draft);
    if !cleaned.starts_with('{') || !cleaned.contains(TOOLCALL_MARKER) {
        return None;
    }
    match serde_json::from_str::<RawDraft>(cleaned) {
        Ok(RawDraft::Toolcall {
            toolname,
            parameters,
        }) => Some(ToolCall {
            toolname,
            parameters,
        }),
        Err(err) => {
            tracing::debug!(error = %err, "draft resembled a tool call but did not parse");
            None
        }
    }
}
