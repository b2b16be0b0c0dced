//! Server-Sent-Events framing for simulated streams.

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use bytes::Bytes;
use std::convert::Infallible;

use super::types::StreamChunk;

/// Terminal frame written after the last chunk.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Encode one chunk as a `data: <json>\n\n` frame.
pub fn encode_frame(chunk: &StreamChunk) -> serde_json::Result<Bytes> {
    let json = serde_json::to_vec(chunk)?;
    let mut frame = Vec::with_capacity(json.len() + 8);
    frame.extend_from_slice(b"data: ");
    frame.extend_from_slice(&json);
    frame.extend_from_slice(b"\n\n");
    Ok(Bytes::from(frame))
}

/// Encode every chunk in order, followed by the `[DONE]` frame.
pub fn encode_frames(chunks: &[StreamChunk]) -> serde_json::Result<Vec<Bytes>> {
    let mut frames = chunks
        .iter()
        .map(encode_frame)
        .collect::<serde_json::Result<Vec<_>>>()?;
    frames.push(Bytes::from_static(DONE_FRAME));
    Ok(frames)
}

/// Build the `text/event-stream` response.
///
/// Each frame is a separate body item, so hyper writes and flushes them one at
/// a time. If the client goes away the stream is dropped and the remaining
/// frames are discarded.
pub fn sse_response(frames: Vec<Bytes>) -> Response {
    let stream = futures::stream::iter(frames.into_iter().map(Ok::<_, Infallible>));

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}
