//! Backend response classification and passthrough.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use std::time::Duration;

use super::forward::body_stream;

/// Passthrough bodies are forwarded in blocks of at most this many bytes.
pub const PASSTHROUGH_BLOCK_SIZE: usize = 8 * 1024;

/// What to do with a backend response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Copy status, allow-listed headers and body unchanged.
    Passthrough,
    /// Parse the body as a chat completion and emit a simulated stream.
    Transform,
}

/// Decide how a backend response is delivered.
pub fn classify(status: StatusCode, headers: &HeaderMap) -> Disposition {
    if status == StatusCode::OK && is_json(headers) {
        Disposition::Transform
    } else {
        Disposition::Passthrough
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// The only backend response headers copied to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassthroughHeaders {
    pub content_type: Option<HeaderValue>,
    pub content_length: Option<HeaderValue>,
    pub date: Option<HeaderValue>,
}

impl PassthroughHeaders {
    /// Select the allow-listed headers from a backend response.
    pub fn from_backend(headers: &HeaderMap) -> Self {
        Self {
            content_type: headers.get(header::CONTENT_TYPE).cloned(),
            content_length: headers.get(header::CONTENT_LENGTH).cloned(),
            date: headers.get(header::DATE).cloned(),
        }
    }

    fn apply(self, headers: &mut HeaderMap) {
        let fields = [
            (header::CONTENT_TYPE, self.content_type),
            (header::CONTENT_LENGTH, self.content_length),
            (header::DATE, self.date),
        ];
        for (name, value) in fields {
            if let Some(value) = value {
                headers.insert(name, value);
            }
        }
    }
}

/// Relay a backend response without touching its body.
///
/// The body is streamed as it arrives, split into blocks of at most
/// [`PASSTHROUGH_BLOCK_SIZE`]. A read error or an `idle` stall mid-body ends
/// the client response abruptly, which closes the connection.
pub fn passthrough(upstream: reqwest::Response, idle: Option<Duration>) -> Response {
    let status = upstream.status();
    let headers = PassthroughHeaders::from_backend(upstream.headers());

    let stream = body_stream(upstream, idle).inspect_err(|e| {
        tracing::error!(error = %e, "Error reading backend body during passthrough");
    });

    build_passthrough(status, headers, Body::from_stream(rechunk(stream)))
}

/// Relay an already-buffered backend body.
pub fn passthrough_buffered(status: StatusCode, headers: PassthroughHeaders, body: Bytes) -> Response {
    let blocks = split_blocks(body).map(Ok::<_, std::convert::Infallible>);
    build_passthrough(status, headers, Body::from_stream(futures::stream::iter(blocks)))
}

fn build_passthrough(status: StatusCode, headers: PassthroughHeaders, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    headers.apply(response.headers_mut());
    response
}

/// Split every item of a byte stream into blocks of at most the passthrough size.
fn rechunk<S, E>(stream: S) -> impl Stream<Item = Result<Bytes, E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    stream.flat_map(|item| match item {
        Ok(bytes) => futures::stream::iter(split_blocks(bytes).map(Ok).collect::<Vec<_>>()),
        Err(e) => futures::stream::iter(vec![Err(e)]),
    })
}

fn split_blocks(bytes: Bytes) -> impl Iterator<Item = Bytes> {
    let len = bytes.len();
    (0..len)
        .step_by(PASSTHROUGH_BLOCK_SIZE)
        .map(move |start| bytes.slice(start..(start + PASSTHROUGH_BLOCK_SIZE).min(len)))
}
