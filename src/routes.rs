//! Router and request handlers.
//!
//! `POST /v1/chat/completions` is the only API route; `/livez`, `/readyz`
//! and `/metrics` serve the probes and the Prometheus exposition, and
//! everything else falls through to 404.

use axum::body::{Bytes, StreamBody};
use axum::http::header::{self, HeaderValue};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use futures::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::assemble::assemble_response;
use crate::backend::{BackendRunner, FragmentStream, Prompt};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::metrics;
use crate::openai_types::{generate_completion_id, unix_timestamp, ChatRequest};
use crate::transcode::StreamTranscoder;
use crate::validate::validate_request;

/// Builds the full application router.
pub fn build_router(
    config: Arc<AppConfig>,
    backend: Arc<dyn BackendRunner>,
    prometheus: PrometheusHandle,
) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/livez", get(|| async { "OK" }))
        .route("/readyz", get(readyz))
        .route("/metrics", get(render_metrics))
        .fallback(not_found)
        .layer(Extension(config))
        .layer(Extension(backend))
        .layer(Extension(prometheus))
        .layer(tower::ServiceBuilder::new().layer(axum::middleware::from_fn(log_requests)))
}

/// Tags every request with an id and logs its outcome.
async fn log_requests<B>(req: Request<B>, next: Next<B>) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    tracing::info!(
        %method,
        %path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        %request_id,
        "request completed"
    );
    response
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn readyz(
    Extension(backend): Extension<Arc<dyn BackendRunner>>,
) -> Result<&'static str, StatusCode> {
    if backend.is_available().await {
        Ok("OK")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

async fn render_metrics(Extension(prometheus): Extension<PrometheusHandle>) -> String {
    prometheus.render()
}

/// Receives POST requests on /v1/chat/completions.
async fn chat_completions(
    Extension(config): Extension<Arc<AppConfig>>,
    Extension(backend): Extension<Arc<dyn BackendRunner>>,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    metrics::increment_active();
    let result = handle_chat(config, backend, &body, start).await;
    metrics::decrement_active();
    match result {
        Ok(response) => response,
        Err(err) => {
            tracing::error!("chat completion failed: {err:#}");
            err.into_response()
        }
    }
}

async fn handle_chat(
    config: Arc<AppConfig>,
    backend: Arc<dyn BackendRunner>,
    body: &[u8],
    start: Instant,
) -> Result<Response, ApiError> {
    let req = validate_request(body)?;
    let model = req
        .model
        .clone()
        .unwrap_or_else(|| config.default_model.clone());
    let prompt = Prompt::from_messages(&req.messages);

    tracing::debug!(
        model = %model,
        messages = req.messages.len(),
        stream = req.stream,
        "chat completion request"
    );

    if req.stream {
        stream_response(backend, model, prompt, start).await
    } else {
        single_response(backend, req, model, prompt, start).await
    }
}

async fn single_response(
    backend: Arc<dyn BackendRunner>,
    req: ChatRequest,
    model: String,
    prompt: Prompt,
    start: Instant,
) -> Result<Response, ApiError> {
    // id and timestamp are sampled once, before the backend runs
    let id = generate_completion_id();
    let created = unix_timestamp();

    let backend_start = Instant::now();
    let result = match backend.complete(&prompt).await {
        Ok(result) => result,
        Err(err) => {
            metrics::record_request("error", false, start.elapsed());
            return Err(ApiError::Backend(err));
        }
    };
    metrics::record_backend_duration(backend_start.elapsed());

    let response = assemble_response(&req, id, created, &model, &result);
    tracing::debug!(id = %response.id, tokens = response.usage.total_tokens, "chat completion done");
    metrics::record_request("success", false, start.elapsed());
    Ok(Json(response).into_response())
}

async fn stream_response(
    backend: Arc<dyn BackendRunner>,
    model: String,
    prompt: Prompt,
    start: Instant,
) -> Result<Response, ApiError> {
    let transcoder = StreamTranscoder::new(&model);

    let backend_start = Instant::now();
    let fragments = match backend.stream(&prompt).await {
        Ok(fragments) => fragments,
        Err(err) => {
            metrics::record_request("error", true, start.elapsed());
            return Err(ApiError::Backend(err));
        }
    };
    metrics::record_backend_duration(backend_start.elapsed());

    // Chunks are forwarded as produced; the role chunk goes out before any
    // backend output arrives. A bounded channel gives backpressure instead
    // of buffering the response.
    let (tx, rx) = mpsc::channel::<String>(32);
    tokio::spawn(pump_stream(transcoder, fragments, tx, start));

    // Frames are written as `data: <payload>\n\n` directly; axum's Sse
    // Event serializer omits the space after the colon the spec mandates.
    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    let mut response = StreamBody::new(stream).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(response)
}

/// Drives the transcoder over the backend fragment sequence.
///
/// Runs as its own task per streaming request. A failed send means the
/// client disconnected; returning drops the fragment stream, which cancels
/// the backend run.
async fn pump_stream(
    mut transcoder: StreamTranscoder,
    mut fragments: FragmentStream,
    tx: mpsc::Sender<String>,
    start: Instant,
) {
    if let Some(chunk) = transcoder.role_chunk() {
        if send_json(&tx, &chunk).await.is_err() {
            transcoder.abort();
            return;
        }
    }

    while let Some(item) = fragments.next().await {
        match item {
            Ok(fragment) => {
                if let Some(chunk) = transcoder.content_chunk(&fragment) {
                    if send_json(&tx, &chunk).await.is_err() {
                        transcoder.abort();
                        return;
                    }
                }
            }
            Err(err) => {
                // Surface the failure in-band so the client can tell a
                // truncated stream from a normal completion: one error
                // frame, then the sentinel, no finish_reason="stop".
                tracing::error!(id = %transcoder.id(), "backend stream failed: {err:#}");
                let api_err = ApiError::Backend(err);
                metrics::record_error(api_err.category());
                metrics::record_request("error", true, start.elapsed());
                let _ = send_json(&tx, &api_err.payload()).await;
                let _ = tx.send("data: [DONE]\n\n".to_string()).await;
                transcoder.abort();
                return;
            }
        }
    }

    if let Some(chunk) = transcoder.final_chunk() {
        if send_json(&tx, &chunk).await.is_err() {
            transcoder.abort();
            return;
        }
    }
    let _ = tx.send("data: [DONE]\n\n".to_string()).await;
    transcoder.close();
    metrics::record_request("success", true, start.elapsed());
}

/// Sends one `data:` frame; `Err` means the client is gone.
async fn send_json<T: Serialize>(tx: &mpsc::Sender<String>, value: &T) -> Result<(), ()> {
    let frame = match serde_json::to_string(value) {
        Ok(json) => format!("data: {json}\n\n"),
        Err(err) => {
            tracing::warn!("failed to serialize sse frame: {err}");
            return Ok(());
        }
    };
    tx.send(frame).await.map_err(|_| ())
}
