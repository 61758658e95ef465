//! Two-pass tool-calling agent loop.
//!
//! Pass one (draft) sends the tool catalogue plus the windowed conversation
//! and asks the model to answer either with a raw toolcall JSON object or
//! conversationally. If a tool call comes back it is dispatched through the
//! registry and pass two (synthesis) phrases the outcome. Fund movers skip
//! synthesis entirely: their preparation message is the reply and the typed
//! operation travels back to the client, which executes it under its own
//! spend permissions.

pub mod classify;
pub mod history;
pub mod prompt;

pub use classify::ToolCall;
pub use history::{ChatMessage, Conversation, HistoryEntry, Role, ToolUsage, HISTORY_WINDOW};

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::LlmError;
use crate::exec::PendingOperation;
use crate::llm::{CompletionBackend, CompletionParams};
use crate::tools::{ToolContext, ToolName, ToolOutcome, ToolRegistry};

/// Outcome of one agent turn.
#[derive(Debug, Clone)]
pub struct AgentReply {
    /// Assistant text shown to the user.
    pub response: String,
    /// The tool invocation behind the reply, when there was one.
    pub tool_used: Option<ToolUsage>,
    /// A fund movement awaiting client-side execution.
    pub pending: Option<PendingOperation>,
}

impl AgentReply {
    fn conversational(response: String) -> Self {
        Self {
            response,
            tool_used: None,
            pending: None,
        }
    }
}

/// Drives draft, dispatch, and synthesis for one chat message at a time.
pub struct AgentLoop {
    backend: Arc<dyn CompletionBackend>,
    registry: Arc<ToolRegistry>,
}

impl AgentLoop {
    pub fn new(backend: Arc<dyn CompletionBackend>, registry: Arc<ToolRegistry>) -> Self {
        Self { backend, registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Runs one turn.
    ///
    /// Tool failures are folded into an apologetic synthesis pass; only
    /// completion-backend failures propagate to the caller.
    pub async fn run(
        &self,
        message: &str,
        history: &[HistoryEntry],
        ctx: &ToolContext,
    ) -> Result<AgentReply, LlmError> {
        let catalogue = prompt::tools_prompt(&self.registry);
        let base = prompt::draft_prompt(&catalogue, history, message);

        let draft = self
            .backend
            .complete(&base, CompletionParams::DRAFT)
            .await?;
        debug!(draft_len = draft.len(), "draft pass complete");

        let Some(call) = classify::classify(&draft) else {
            return Ok(AgentReply::conversational(draft));
        };

        let mut parameters = call.parameters;
        if call.toolname.is_fund_moving() {
            if let Some(address) = &ctx.user_address {
                inject_user_address(call.toolname, &mut parameters, address);
            }
        }

        info!(tool = %call.toolname, "dispatching tool call");
        match self
            .registry
            .dispatch(call.toolname, parameters.clone(), ctx)
            .await
        {
            Ok(ToolOutcome::Deferred { message, operation }) => {
                // Mirror of the tool-result object, so `tool_used` reads the
                // same on deferred and completed paths.
                let result = json!({
                    "success": false,
                    "executeClientSide": true,
                    "message": &message,
                    "transactionParams": operation.params_value(),
                });
                Ok(AgentReply {
                    response: message,
                    tool_used: Some(ToolUsage {
                        name: call.toolname,
                        parameters: Some(parameters),
                        result: Some(result),
                        error: None,
                    }),
                    pending: Some(operation),
                })
            }
            Ok(ToolOutcome::Completed(result)) => {
                let follow_up = prompt::synthesis_prompt(&base, call.toolname, &result);
                let response = self
                    .backend
                    .complete(&follow_up, CompletionParams::SYNTHESIZE)
                    .await?;
                Ok(AgentReply {
                    response,
                    tool_used: Some(ToolUsage {
                        name: call.toolname,
                        parameters: Some(parameters),
                        result: Some(result),
                        error: None,
                    }),
                    pending: None,
                })
            }
            Err(err) => {
                warn!(tool = %call.toolname, error = %err, "tool execution failed");
                let detail = err.detail();
                let follow_up = prompt::error_prompt(&base, call.toolname, &parameters, &detail);
                let response = self
                    .backend
                    .complete(&follow_up, CompletionParams::SYNTHESIZE)
                    .await?;
                Ok(AgentReply {
                    response,
                    tool_used: Some(ToolUsage {
                        name: call.toolname,
                        parameters: Some(parameters),
                        result: None,
                        error: Some(detail),
                    }),
                    pending: None,
                })
            }
        }
    }
}

/// Fund movers run under the caller's identity. The draft often omits it, so
/// the authenticated address is filled in unless the call already names one.
fn inject_user_address(tool: ToolName, parameters: &mut serde_json::Value, address: &str) {
    match parameters {
        serde_json::Value::Object(map) => {
            if !map.contains_key("userAddress") {
                debug!(%tool, "injecting session identity into tool parameters");
                map.insert("userAddress".to_string(), json!(address));
            }
        }
        serde_json::Value::Null => {
            *parameters = json!({ "userAddress": address });
        }
        // Any other shape fails parameter parsing downstream.
        _ => {}
    }
}
