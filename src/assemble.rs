//! Assembly of the single-shot (non-streaming) chat completion response.

use crate::backend::BackendResult;
use crate::openai_types::{ChatRequest, ChatResponse, Choice, Message, Usage};

/// Builds one ChatResponse from a completed backend result.
///
/// Deterministic: the id and timestamp are sampled by the caller at request
/// start. Token accounting is best effort; counts the backend did not
/// report are estimated rather than failing the response.
pub fn assemble_response(
    req: &ChatRequest,
    id: String,
    created: i64,
    model: &str,
    result: &BackendResult,
) -> ChatResponse {
    let prompt_tokens = result
        .prompt_tokens
        .unwrap_or_else(|| estimate_prompt_tokens(req));
    let completion_tokens = result
        .completion_tokens
        .unwrap_or_else(|| estimate_tokens(&result.text));

    ChatResponse {
        id,
        object: "chat.completion".to_string(),
        created,
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: Message {
                role: "assistant".to_string(),
                content: result.text.clone(),
            },
            finish_reason: "stop".to_string(),
        }],
        usage: Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
    }
}

/// Rough token estimate for the whole request (about 4 chars per token,
/// plus per-message and per-request metadata overhead).
pub fn estimate_prompt_tokens(req: &ChatRequest) -> u32 {
    let mut tokens = 8; // request metadata
    for message in &req.messages {
        tokens += 4; // message metadata
        tokens += estimate_tokens(&message.content);
    }
    tokens
}

/// Rough token estimate for a text string.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() / 4) as u32
}
