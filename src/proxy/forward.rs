//! Outbound request construction and dispatch.

use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue, Method};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde_json::Value;

use crate::config::Config;
use crate::error::Error;

/// The only request headers forwarded to the backend.
///
/// `None` means "not set": the header is omitted from the outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundHeaders {
    pub authorization: Option<HeaderValue>,
    pub content_type: Option<HeaderValue>,
    pub accept: Option<HeaderValue>,
}

impl OutboundHeaders {
    /// Select the forwarded headers from an inbound request.
    ///
    /// Missing `Content-Type` and `Accept` fall back to `application/json` and
    /// `*/*`; a header sent with an empty value is dropped.
    pub fn from_inbound(headers: &HeaderMap) -> Self {
        Self {
            authorization: pick(headers, header::AUTHORIZATION, None),
            content_type: pick(headers, header::CONTENT_TYPE, Some("application/json")),
            accept: pick(headers, header::ACCEPT, Some("*/*")),
        }
    }

    fn apply(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let fields = [
            (header::AUTHORIZATION, &self.authorization),
            (header::CONTENT_TYPE, &self.content_type),
            (header::ACCEPT, &self.accept),
        ];
        for (name, value) in fields {
            if let Some(value) = value {
                request = request.header(name, value.clone());
            }
        }
        request
    }
}

fn pick(
    headers: &HeaderMap,
    name: header::HeaderName,
    default: Option<&'static str>,
) -> Option<HeaderValue> {
    match headers.get(&name) {
        Some(value) if value.is_empty() => None,
        Some(value) => Some(value.clone()),
        None => default.map(HeaderValue::from_static),
    }
}

/// Build the backend URL: `target_url` followed by the inbound path verbatim.
pub fn upstream_url(target_url: &str, path_and_query: &str) -> String {
    format!("{}{}", target_url, path_and_query)
}

/// Send one request to the backend.
///
/// The returned response has only its status and headers read; the body is
/// left for the caller to read through [`body_stream`]. Transport failures
/// are logged and classified into an [`Error::Upstream`].
///
/// With `request_timeout` set, connecting and waiting for the response head
/// each get that long; the client enforces the connect part.
pub async fn forward(
    client: &Client,
    config: &Config,
    method: Method,
    path_and_query: &str,
    inbound_headers: &HeaderMap,
    body: Option<&Value>,
) -> Result<reqwest::Response, Error> {
    let url = upstream_url(&config.target_url, path_and_query);
    let headers = OutboundHeaders::from_inbound(inbound_headers);

    tracing::debug!(
        method = %method,
        url = %url,
        authorization = headers.authorization.is_some(),
        content_type = ?headers.content_type,
        accept = ?headers.accept,
        "Forwarding request to backend"
    );

    let mut request = headers.apply(client.request(method, &url));

    if let Some(body) = body {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| Error::Internal(format!("Failed to serialize request body: {}", e)))?;
        tracing::debug!(body_bytes = bytes.len(), "Forwarding JSON body");
        request = request.body(bytes);
    }

    let sent = match config.request_timeout() {
        Some(timeout) => {
            let deadline = timeout.saturating_mul(2);
            tokio::time::timeout(deadline, request.send())
                .await
                .map_err(|_| {
                    let err = Error::timed_out(deadline);
                    tracing::error!(url = %url, status = %err.status_code(), "Backend did not answer in time");
                    err
                })?
        }
        None => request.send().await,
    };

    let response = sent.map_err(|e| {
        let err = Error::upstream(&e);
        tracing::error!(error = %e, url = %url, status = %err.status_code(), "Backend request failed");
        err
    })?;

    tracing::debug!(status = %response.status(), "Received backend response");
    Ok(response)
}

/// Read a backend body as it arrives.
///
/// With `idle` set, every read must produce data within that long; the wait
/// resets after each chunk, so a slow but steady body is never cut off.
pub fn body_stream(
    upstream: reqwest::Response,
    idle: Option<Duration>,
) -> BoxStream<'static, Result<Bytes, Error>> {
    let body = upstream
        .bytes_stream()
        .map(|item| item.map_err(|e| Error::upstream(&e)));

    match idle {
        Some(idle) => with_idle_timeout(body, idle).boxed(),
        None => body.boxed(),
    }
}

/// End a byte stream with a timeout error once it stalls for `idle`.
fn with_idle_timeout<S>(body: S, idle: Duration) -> impl Stream<Item = Result<Bytes, Error>>
where
    S: Stream<Item = Result<Bytes, Error>> + Send + 'static,
{
    futures::stream::unfold(Some(body.boxed()), move |body| async move {
        let mut body = body?;
        match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(body))),
            Ok(Some(Err(e))) => Some((Err(e), None)),
            Ok(None) => None,
            Err(_) => Some((Err(Error::timed_out(idle)), None)),
        }
    })
}
