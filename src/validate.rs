//! Structural validation of incoming chat completion requests.
//!
//! Pure function of the raw body bytes; nothing here touches the backend.
//! The body is parsed in two stages so JSON-level failures, a missing
//! `messages` field and malformed message entries each map to their own
//! error code.

use serde::Deserialize;

use crate::error::ApiError;
use crate::openai_types::{ChatRequest, Message};

const KNOWN_ROLES: [&str; 3] = ["system", "user", "assistant"];

/// Raw parse shape: `messages` stays untyped so that "absent", "empty" and
/// "malformed element" are distinguishable outcomes.
#[derive(Debug, Deserialize)]
struct RawChatRequest {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    messages: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    stream: Option<bool>,
}

/// Validates a raw request body into a [`ChatRequest`].
///
/// Malformed message entries are rejected with 400: a message the client
/// built wrong is a client defect, not a server one.
pub fn validate_request(body: &[u8]) -> Result<ChatRequest, ApiError> {
    let raw: RawChatRequest =
        serde_json::from_slice(body).map_err(|e| ApiError::MalformedJson(e.to_string()))?;

    let raw_messages = raw.messages.ok_or(ApiError::MissingMessages)?;
    if raw_messages.is_empty() {
        return Err(ApiError::EmptyMessages);
    }

    let mut messages = Vec::with_capacity(raw_messages.len());
    for (i, value) in raw_messages.into_iter().enumerate() {
        let message: Message = serde_json::from_value(value)
            .map_err(|e| ApiError::InvalidMessage(format!("messages[{i}]: {e}")))?;
        if !KNOWN_ROLES.contains(&message.role.as_str()) {
            return Err(ApiError::InvalidMessage(format!(
                "messages[{i}]: unrecognized role {:?}",
                message.role
            )));
        }
        messages.push(message);
    }

    Ok(ChatRequest {
        model: raw.model,
        messages,
        stream: raw.stream.unwrap_or(false),
    })
}
