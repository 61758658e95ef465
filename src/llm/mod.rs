//! Model access for the agent loop.
//!
//! The loop only ever needs one primitive: turn a prompt into text under a
//! given temperature and output cap. [`CompletionBackend`] is that seam;
//! [`gemini::GeminiClient`] is the production backend and
//! [`ScriptedBackend`] drives the loop deterministically in tests.

use async_trait::async_trait;

use crate::error::LlmError;

pub mod gemini;

pub use gemini::{GeminiClient, GeminiConfig};

/// Sampling knobs for a single completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionParams {
    pub temperature: f64,
    pub max_output_tokens: u32,
}

impl CompletionParams {
    /// Low-temperature drafting pass used for tool-call detection.
    pub const DRAFT: Self = Self {
        temperature: 0.1,
        max_output_tokens: 500,
    };

    /// Higher-temperature pass that phrases the final answer.
    pub const SYNTHESIZE: Self = Self {
        temperature: 0.7,
        max_output_tokens: 1000,
    };
}

/// One-shot prompt-to-text completion.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str, params: CompletionParams) -> Result<String, LlmError>;
}

/// Test backend that replays queued completions in order and records the
/// prompts and params it was called with.
#[derive(Default)]
pub struct ScriptedBackend {
    replies: std::sync::Mutex<std::collections::VecDeque<String>>,
    calls: std::sync::Mutex<Vec<(String, CompletionParams)>>,
}

impl ScriptedBackend {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: std::sync::Mutex::new(replies.into_iter().map(Into::into).collect()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply.into());
        }
    }

    /// Prompts seen so far, paired with their sampling params.
    pub fn calls(&self) -> Vec<(String, CompletionParams)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, prompt: &str, params: CompletionParams) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((prompt.to_string(), params));
        }
        let reply = self
            .replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front());
        reply.ok_or_else(|| LlmError::EmptyCompletion {
            provider: "scripted".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_backend_replays_in_order_and_records_calls() {
        let backend = ScriptedBackend::new(["first", "second"]);

        let a = backend.complete("p1", CompletionParams::DRAFT).await.unwrap();
        let b = backend
            .complete("p2", CompletionParams::SYNTHESIZE)
            .await
            .unwrap();
        assert_eq!(a, "first");
        assert_eq!(b, "second");

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "p1");
        assert_eq!(calls[0].1.temperature, 0.1);
        assert_eq!(calls[1].1.max_output_tokens, 1000);

        let err = backend
            .complete("p3", CompletionParams::DRAFT)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmptyCompletion { .. }));
    }
}
