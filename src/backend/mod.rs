//! Backend abstraction: the external language-model execution mechanism.
//!
//! The translation core only sees this interface; the concrete runner
//! (`ClaudeCliRunner`) shells out to the `claude` CLI per request.

pub mod claude;
pub mod parser;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
use thiserror::Error;

use crate::openai_types::Message;

/// Lazily produced sequence of text fragments from a streaming backend run.
///
/// Finite and not restartable; dropping it cancels the underlying work.
pub type FragmentStream = BoxStream<'static, Result<String, BackendError>>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to spawn backend process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("backend process failed: {0}")]
    Process(String),
    #[error("failed to parse backend output: {0}")]
    Parse(String),
    #[error("backend timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Completed result of a non-streaming backend run.
///
/// Token counts are reported by the backend when available; absent counts
/// are estimated downstream, never treated as an error.
#[derive(Debug, Clone, Default)]
pub struct BackendResult {
    pub text: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

#[async_trait]
pub trait BackendRunner: Send + Sync {
    /// Runs the backend to completion and returns the full text result.
    async fn complete(&self, prompt: &Prompt) -> Result<BackendResult, BackendError>;

    /// Starts a streaming backend run and returns its fragment sequence.
    async fn stream(&self, prompt: &Prompt) -> Result<FragmentStream, BackendError>;

    /// Readiness signal: whether the backend can serve requests right now.
    async fn is_available(&self) -> bool;
}

/// Prompt rendered from OpenAI-style messages for the CLI backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    pub system: String,
}

impl Prompt {
    /// Renders a message list into conversation text and a system prompt.
    ///
    /// System messages are concatenated separately; user/assistant turns
    /// become `User:`/`Assistant:` dialogue lines. A single user message is
    /// passed through without the prefix.
    pub fn from_messages(messages: &[Message]) -> Self {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut conversation_parts: Vec<String> = Vec::new();

        for msg in messages {
            match msg.role.as_str() {
                "system" => system_parts.push(&msg.content),
                "user" => conversation_parts.push(format!("User: {}", msg.content)),
                "assistant" => conversation_parts.push(format!("Assistant: {}", msg.content)),
                _ => {}
            }
        }

        let text = match conversation_parts.as_slice() {
            [single] if single.starts_with("User: ") => {
                single.trim_start_matches("User: ").to_string()
            }
            _ => conversation_parts.join("\n"),
        };

        Self {
            text,
            system: system_parts.join("\n"),
        }
    }
}
