//! Prompt assembly for the two model passes.
//!
//! The draft pass gets the full tool catalogue and is told to answer either
//! with a raw toolcall JSON object or conversationally. The synthesis pass
//! replays the same prompt with the tool outcome appended, so the model sees
//! everything the draft pass saw.

use crate::tools::{ToolName, ToolRegistry};

use super::history::HistoryEntry;

/// Catalogue preamble listing every registered tool with its schema.
pub fn tools_prompt(registry: &ToolRegistry) -> String {
    let tools = registry
        .tools()
        .map(|tool| {
            let schema = serde_json::to_string_pretty(&tool.parameters_schema())
                .unwrap_or_else(|_| "{}".to_string());
            format!(
                "- {}: {}\n  Parameters: {}",
                tool.name(),
                tool.description(),
                schema
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"You have access to the following tools:

{tools}

When a user asks something that requires using one of these tools, respond with a JSON object in this exact format:
{{
  "type": "toolcall",
  "toolname": "tool_name_here",
  "parameters": {{
    "param1": "value1",
    "param2": "value2"
  }}
}}

If the user's query doesn't require any tools, respond normally with a conversational answer.

Important:
- Only respond with the JSON toolcall format when you need to use a tool
- DO NOT wrap the JSON in markdown code blocks (no code formatting)
- Return ONLY the raw JSON object, nothing else
- Make sure the JSON is valid and properly formatted
- Include all required parameters for the tool
- If no tools are needed, respond conversationally

Note: When tools provide data, be contextually aware of what the user specifically asked for:
- If they ask for "temperature", only mention temperature
- If they ask for "weather", you can provide broader weather information
- If they ask "is it raining", focus on precipitation
- Always be concise and answer only what was requested"#
    )
}

/// Base prompt for the draft pass: catalogue, prior turns, new message.
pub fn draft_prompt(catalogue: &str, history: &[HistoryEntry], message: &str) -> String {
    let mut prompt = format!("{catalogue}\n\nConversation:\n");
    for entry in history {
        prompt.push_str(entry.role.as_str());
        prompt.push_str(": ");
        prompt.push_str(&entry.content);
        prompt.push('\n');
    }
    prompt.push_str(&format!("User: {message}\nAssistant:"));
    prompt
}

/// Follow-up prompt after a successful tool run.
pub fn synthesis_prompt(base: &str, tool: ToolName, result: &serde_json::Value) -> String {
    let rendered = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
    format!(
        "{base}\n\nTool was called: {tool}\nTool result: {rendered}\n\nBased on the tool result above, provide a helpful and natural response to the user's query. \n\nIMPORTANT: Only answer what the user specifically asked for. Be contextually aware"
    )
}

/// Follow-up prompt when the tool failed.
pub fn error_prompt(
    base: &str,
    tool: ToolName,
    parameters: &serde_json::Value,
    error: &str,
) -> String {
    let rendered =
        serde_json::to_string_pretty(parameters).unwrap_or_else(|_| parameters.to_string());
    format!(
        "{base}\n\nTool was called: {tool}\nTool parameters: {rendered}\nTool execution failed with error: {error}\n\nThe tool failed to execute. Please provide a helpful response explaining what went wrong and suggest alternatives. For example, if it's a location error, suggest using a more specific city name or checking the spelling."
    )
}
