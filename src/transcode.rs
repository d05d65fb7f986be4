//! Streaming state machine: backend fragments in, OpenAI chunks out.
//!
//! One transcoder per streaming request. It owns the `id`/`created` pair
//! for the whole stream and enforces the chunk protocol: exactly one
//! role chunk first, one content chunk per non-empty fragment in arrival
//! order, exactly one terminal `finish_reason="stop"` chunk, and nothing
//! after close.

use crate::openai_types::{generate_completion_id, unix_timestamp, ChatChunk, ChunkChoice, Delta};

/// `Init → RoleSent → Streaming → Finished → Closed`, with the failure
/// path jumping to `Closed` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Init,
    RoleSent,
    Streaming,
    Finished,
    Closed,
}

pub struct StreamTranscoder {
    id: String,
    created: i64,
    model: String,
    state: StreamState,
}

impl StreamTranscoder {
    /// Samples the stream's id and timestamp once; every chunk reuses them.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: generate_completion_id(),
            created: unix_timestamp(),
            model: model.into(),
            state: StreamState::Init,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// The opening chunk carrying `delta.role="assistant"`.
    ///
    /// Only valid once, before any content; returns `None` afterwards.
    pub fn role_chunk(&mut self) -> Option<ChatChunk> {
        if self.state != StreamState::Init {
            return None;
        }
        self.state = StreamState::RoleSent;
        Some(self.chunk(
            Delta {
                role: Some("assistant".to_string()),
                content: None,
            },
            None,
        ))
    }

    /// One content chunk per backend fragment, in arrival order.
    ///
    /// Empty fragments are suppressed. Returns `None` outside of the
    /// RoleSent/Streaming states so nothing can be emitted after the
    /// terminal chunk.
    pub fn content_chunk(&mut self, fragment: &str) -> Option<ChatChunk> {
        match self.state {
            StreamState::RoleSent | StreamState::Streaming => {}
            _ => return None,
        }
        if fragment.is_empty() {
            return None;
        }
        self.state = StreamState::Streaming;
        Some(self.chunk(
            Delta {
                role: None,
                content: Some(fragment.to_string()),
            },
            None,
        ))
    }

    /// The terminal chunk: `finish_reason="stop"`, no content delta.
    pub fn final_chunk(&mut self) -> Option<ChatChunk> {
        match self.state {
            StreamState::RoleSent | StreamState::Streaming => {}
            _ => return None,
        }
        self.state = StreamState::Finished;
        Some(self.chunk(Delta::default(), Some("stop".to_string())))
    }

    /// Normal shutdown after the terminal chunk and the `[DONE]` sentinel.
    pub fn close(&mut self) {
        self.state = StreamState::Closed;
    }

    /// Failure shutdown: the stream ends without a terminal chunk so the
    /// client can tell truncation from completion.
    pub fn abort(&mut self) {
        self.state = StreamState::Closed;
    }

    fn chunk(&self, delta: Delta, finish_reason: Option<String>) -> ChatChunk {
        ChatChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }
}
