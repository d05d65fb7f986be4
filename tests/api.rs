//! End-to-end router tests driven through `tower::ServiceExt::oneshot`
//! with a deterministic fake backend.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use claude_proxy::backend::{BackendError, BackendResult, BackendRunner, FragmentStream, Prompt};
use claude_proxy::config::AppConfig;
use claude_proxy::{metrics, routes};

#[derive(Clone)]
struct FakeBackend {
    text: String,
    fragments: Vec<String>,
    fail: bool,
    fail_mid_stream: bool,
    available: bool,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            text: "The answer is 2.".to_string(),
            fragments: vec!["The answer".to_string(), " is 2.".to_string()],
            fail: false,
            fail_mid_stream: false,
            available: true,
        }
    }
}

#[async_trait]
impl BackendRunner for FakeBackend {
    async fn complete(&self, _prompt: &Prompt) -> Result<BackendResult, BackendError> {
        if self.fail {
            return Err(BackendError::Process("exit status 1".to_string()));
        }
        Ok(BackendResult {
            text: self.text.clone(),
            prompt_tokens: Some(10),
            completion_tokens: Some(4),
        })
    }

    async fn stream(&self, _prompt: &Prompt) -> Result<FragmentStream, BackendError> {
        if self.fail {
            return Err(BackendError::Process("exit status 1".to_string()));
        }
        let mut items: Vec<Result<String, BackendError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if self.fail_mid_stream {
            items.push(Err(BackendError::Process("backend died".to_string())));
        }
        Ok(futures::stream::iter(items).boxed())
    }

    async fn is_available(&self) -> bool {
        self.available
    }
}

fn test_config() -> Arc<AppConfig> {
    Arc::new(AppConfig {
        server_port: 0,
        claude_bin: "claude".to_string(),
        request_timeout: Duration::from_secs(5),
        default_model: "claude".to_string(),
    })
}

fn app(backend: FakeBackend) -> Router {
    let prometheus = metrics::install().expect("metrics recorder");
    routes::build_router(test_config(), Arc::new(backend), prometheus)
}

async fn post_chat(app: Router, body: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, bytes.to_vec())
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, bytes.to_vec())
}

/// Splits an SSE body into its JSON data frames and the [DONE] sentinel.
fn parse_sse(body: &[u8]) -> (Vec<Value>, bool) {
    let text = String::from_utf8(body.to_vec()).unwrap();
    let mut frames = Vec::new();
    let mut done = false;
    for line in text.lines() {
        if let Some(data) = line.strip_prefix("data: ") {
            if data.trim() == "[DONE]" {
                done = true;
            } else {
                frames.push(serde_json::from_str(data).unwrap());
            }
        }
    }
    (frames, done)
}

fn chat_body(stream: bool) -> String {
    json!({
        "model": "claude",
        "messages": [{"role": "user", "content": "what is 1+1?"}],
        "stream": stream,
    })
    .to_string()
}

#[tokio::test]
async fn non_streaming_returns_a_complete_response() {
    let (status, body) = post_chat(app(FakeBackend::default()), &chat_body(false)).await;
    assert_eq!(status, StatusCode::OK);

    let resp: Value = serde_json::from_slice(&body).unwrap();
    assert!(resp["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert_eq!(resp["object"], "chat.completion");
    assert!(resp["created"].as_i64().unwrap() > 0);
    assert_eq!(resp["model"], "claude");

    let choices = resp["choices"].as_array().unwrap();
    assert_eq!(choices.len(), 1);
    assert_eq!(choices[0]["index"], 0);
    assert_eq!(choices[0]["message"]["role"], "assistant");
    assert_eq!(choices[0]["message"]["content"], "The answer is 2.");
    assert_eq!(choices[0]["finish_reason"], "stop");

    let usage = &resp["usage"];
    assert_eq!(
        usage["total_tokens"].as_u64().unwrap(),
        usage["prompt_tokens"].as_u64().unwrap() + usage["completion_tokens"].as_u64().unwrap()
    );
}

#[tokio::test]
async fn streaming_satisfies_the_chunk_protocol() {
    let response = app(FakeBackend::default())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(chat_body(true)))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let (chunks, done) = parse_sse(&body);
    assert!(done, "stream must end with the [DONE] sentinel");
    assert!(chunks.len() >= 3, "role + content + final");

    // Envelope is fixed across the stream.
    let id = chunks[0]["id"].as_str().unwrap().to_string();
    let created = chunks[0]["created"].as_i64().unwrap();
    assert!(id.starts_with("chatcmpl-"));
    assert!(created > 0);
    for chunk in &chunks {
        assert_eq!(chunk["id"], id.as_str());
        assert_eq!(chunk["created"], created);
        assert_eq!(chunk["object"], "chat.completion.chunk");
        assert_eq!(chunk["model"], "claude");
    }

    // First chunk carries the role, last carries the stop, nothing else does.
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    assert!(chunks[0]["choices"][0]["delta"]["content"].is_null());
    let last = chunks.last().unwrap();
    assert_eq!(last["choices"][0]["finish_reason"], "stop");
    assert!(last["choices"][0]["delta"]["content"].is_null());
    for chunk in &chunks[..chunks.len() - 1] {
        assert!(chunk["choices"][0]["finish_reason"].is_null());
    }

    // Reassembled content equals the backend text.
    let content: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(content, "The answer is 2.");
}

#[tokio::test]
async fn mid_stream_failure_is_surfaced_before_close() {
    let backend = FakeBackend {
        fail_mid_stream: true,
        ..FakeBackend::default()
    };
    let (status, body) = post_chat(app(backend), &chat_body(true)).await;
    assert_eq!(status, StatusCode::OK);

    let (frames, done) = parse_sse(&body);
    assert!(done, "failure path still terminates the stream");

    // The stream never reaches finish_reason="stop" ...
    let finished = frames.iter().any(|f| {
        f.get("choices")
            .and_then(|c| c[0]["finish_reason"].as_str())
            == Some("stop")
    });
    assert!(!finished);

    // ... and an error frame tells the client why.
    let error_frame = frames.iter().find(|f| f.get("error").is_some()).unwrap();
    assert_eq!(error_frame["error"]["type"], "api_error");
    assert!(!error_frame["error"]["message"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn empty_messages_returns_400() {
    let body = json!({"model": "claude", "messages": []}).to_string();
    let (status, body) = post_chat(app(FakeBackend::default()), &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let resp: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(resp["error"]["type"], "invalid_request_error");
    assert!(!resp["error"]["message"].as_str().unwrap().is_empty());
    assert_eq!(resp["error"]["code"], "empty_messages");
}

#[tokio::test]
async fn missing_messages_returns_400() {
    let body = json!({"model": "claude"}).to_string();
    let (status, body) = post_chat(app(FakeBackend::default()), &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let resp: Value = serde_json::from_slice(&body).unwrap();
    assert!(resp.get("error").is_some());
    assert_eq!(resp["error"]["code"], "missing_messages");
}

#[tokio::test]
async fn non_json_body_returns_400() {
    let (status, body) = post_chat(app(FakeBackend::default()), "not valid json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let resp: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(resp["error"]["type"], "invalid_request_error");
    assert_eq!(resp["error"]["code"], "malformed_json");
}

#[tokio::test]
async fn malformed_message_object_returns_400() {
    let body = json!({"model": "claude", "messages": [{"invalid": "message"}]}).to_string();
    let (status, body) = post_chat(app(FakeBackend::default()), &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let resp: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(resp["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn empty_object_body_hits_the_route_not_the_fallback() {
    let (status, _) = post_chat(app(FakeBackend::default()), "{}").await;
    assert_ne!(status, StatusCode::NOT_FOUND);
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let (status, _) = get(app(FakeBackend::default()), "/unknown/endpoint").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn backend_failure_returns_500_api_error() {
    let backend = FakeBackend {
        fail: true,
        ..FakeBackend::default()
    };
    let (status, body) = post_chat(app(backend), &chat_body(false)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let resp: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(resp["error"]["type"], "api_error");
    assert_eq!(resp["error"]["code"], "backend_error");
    assert!(!resp["error"]["message"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn streaming_start_failure_returns_500_json() {
    let backend = FakeBackend {
        fail: true,
        ..FakeBackend::default()
    };
    let (status, body) = post_chat(app(backend), &chat_body(true)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let resp: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(resp["error"]["type"], "api_error");
}

#[tokio::test]
async fn livez_is_always_ok() {
    let (status, _) = get(app(FakeBackend::default()), "/livez").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn responses_carry_a_request_id_header() {
    let response = app(FakeBackend::default())
        .oneshot(Request::builder().uri("/livez").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn readyz_tracks_backend_availability() {
    let (status, _) = get(app(FakeBackend::default()), "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    let backend = FakeBackend {
        available: false,
        ..FakeBackend::default()
    };
    let (status, _) = get(app(backend), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    let backend = FakeBackend::default();
    // Record at least one request so the counters exist.
    let (status, _) = post_chat(app(backend.clone()), &chat_body(false)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(app(backend), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("proxy_requests_total"));
}
