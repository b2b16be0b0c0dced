//! HTTP request handlers.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri},
    response::Response,
};
use futures::TryStreamExt;
use serde_json::Value;

use super::classify::{classify, passthrough, passthrough_buffered, Disposition, PassthroughHeaders};
use super::forward::{body_stream, forward};
use super::server::AppState;
use super::sse::{encode_frames, sse_response};
use super::stream::StreamEmitter;
use super::types::CompletionShape;
use crate::config::Config;
use crate::error::Error;

/// The only GET path the proxy serves.
pub const MODELS_PATH: &str = "/v1/models";

fn path_and_query(uri: &Uri) -> &str {
    uri.path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path())
}

/// Handle GET /v1/models - relayed to the backend untouched
pub async fn list_models(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let upstream = forward(
        &state.http_client,
        &state.config,
        Method::GET,
        path_and_query(&uri),
        &headers,
        None,
    )
    .await?;

    Ok(passthrough(upstream, state.config.request_timeout()))
}

/// Handle POST on any path as a chat completion.
///
/// The backend is always asked for a complete response (`stream: false`);
/// a JSON 200 reply is turned into a simulated SSE stream.
pub async fn chat_completions(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Error> {
    let path = path_and_query(&uri);

    let mut request: Value = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, path = %path, "POST body is not valid JSON");
        Error::BadRequest(format!("Invalid JSON payload: {}", e))
    })?;

    let Some(fields) = request.as_object_mut() else {
        tracing::warn!(path = %path, "POST body is not a JSON object");
        return Err(Error::BadRequest(
            "Request body must be a JSON object".to_string(),
        ));
    };

    let model = fields.get("model").and_then(Value::as_str).unwrap_or("-");
    tracing::info!(
        path = %path,
        model = %model,
        client_stream = ?fields.get("stream"),
        "Received chat completion request"
    );

    fields.insert("stream".to_string(), Value::Bool(false));

    let upstream = forward(
        &state.http_client,
        &state.config,
        Method::POST,
        path,
        &headers,
        Some(&request),
    )
    .await?;

    match classify(upstream.status(), upstream.headers()) {
        Disposition::Passthrough => {
            tracing::info!(status = %upstream.status(), "Passing backend response through");
            Ok(passthrough(upstream, state.config.request_timeout()))
        }
        Disposition::Transform => simulate_stream(&state.config, upstream).await,
    }
}

/// Buffer a JSON completion and answer with its simulated stream.
///
/// Bodies that turn out not to be JSON are relayed byte for byte instead.
async fn simulate_stream(config: &Config, upstream: reqwest::Response) -> Result<Response, Error> {
    let status = upstream.status();
    let headers = PassthroughHeaders::from_backend(upstream.headers());

    let body: Vec<u8> = body_stream(upstream, config.request_timeout())
        .try_fold(Vec::new(), |mut body, chunk| async move {
            body.extend_from_slice(&chunk);
            Ok::<_, Error>(body)
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, status = %e.status_code(), "Failed to read backend body");
            e
        })?;
    let body = Bytes::from(body);

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(
                error = %e,
                body_bytes = body.len(),
                "Backend returned 200 with an unparseable JSON body, passing it through"
            );
            return Ok(passthrough_buffered(status, headers, body));
        }
    };

    let shape = CompletionShape::from_value(value, chrono::Utc::now().timestamp());
    let chunks = StreamEmitter::new(config.streaming_chunk_size).emit(&shape);
    let frames = encode_frames(&chunks)
        .map_err(|e| Error::Internal(format!("Failed to encode stream chunk: {}", e)))?;

    tracing::debug!(
        id = %shape.meta().id,
        chunks = chunks.len(),
        "Emitting simulated stream"
    );

    Ok(sse_response(frames))
}

/// Route everything not matched explicitly: POST is a chat completion,
/// any other GET is unknown.
pub async fn fallback(
    state: State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Error> {
    match method {
        Method::POST => chat_completions(state, uri, headers, body).await,
        Method::GET | Method::HEAD => {
            tracing::warn!(path = %uri.path(), "Unroutable GET request");
            Err(Error::NotFound(uri.path().to_string()))
        }
        other => {
            tracing::warn!(method = %other, path = %uri.path(), "Unsupported method");
            Err(Error::MethodNotAllowed(other.to_string()))
        }
    }
}
