//! Parsing of `claude` CLI output.
//!
//! The non-streaming path emits one JSON document (`--output-format json`);
//! the streaming path emits NDJSON lines (`--output-format stream-json
//! --include-partial-messages`) where text arrives as
//! `stream_event` / `content_block_delta` / `text_delta` events.

use serde::Deserialize;

use super::{BackendError, BackendResult};

/// Top-level JSON document from a non-streaming CLI run.
#[derive(Debug, Deserialize)]
struct CliResult {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    result: String,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    usage: Option<CliUsage>,
}

#[derive(Debug, Deserialize)]
struct CliUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

/// One NDJSON line of streaming CLI output.
#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(default, rename = "type")]
    kind: String,
    event: Option<StreamEvent>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default, rename = "type")]
    kind: String,
    delta: Option<EventDelta>,
}

#[derive(Debug, Deserialize)]
struct EventDelta {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Parses the complete stdout of a non-streaming CLI run.
pub fn parse_result(output: &str) -> Result<BackendResult, BackendError> {
    let parsed: CliResult = serde_json::from_str(output.trim())
        .map_err(|e| BackendError::Parse(format!("invalid result json: {e}")))?;

    if parsed.kind != "result" {
        return Err(BackendError::Parse(format!(
            "unexpected output type {:?}",
            parsed.kind
        )));
    }
    if parsed.is_error {
        return Err(BackendError::Process(parsed.result));
    }

    let (prompt_tokens, completion_tokens) = match parsed.usage {
        Some(usage) => (usage.input_tokens, usage.output_tokens),
        None => (None, None),
    };

    Ok(BackendResult {
        text: parsed.result,
        prompt_tokens,
        completion_tokens,
    })
}

/// Extracts the text delta from one streaming output line, if it carries one.
///
/// Lines that are not valid JSON, not `stream_event`s, or not text deltas
/// are skipped (the CLI interleaves bookkeeping events we do not forward).
/// Empty deltas are also skipped.
pub fn delta_text(line: &str) -> Option<String> {
    let parsed: StreamLine = serde_json::from_str(line).ok()?;
    if parsed.kind != "stream_event" {
        return None;
    }
    let event = parsed.event?;
    if event.kind != "content_block_delta" {
        return None;
    }
    let delta = event.delta?;
    if delta.kind != "text_delta" || delta.text.is_empty() {
        return None;
    }
    Some(delta.text)
}
