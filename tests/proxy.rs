//! End-to-end tests for the proxy router.
//!
//! Verifies that:
//! - JSON completions are replayed as SSE chunks terminated by `[DONE]`
//! - The backend is always asked for `stream: false` with whitelisted headers
//! - Non-200 and non-JSON responses are passed through untouched
//! - Invalid client JSON is rejected before anything is forwarded
//! - Transport failures map to 502 / 503 / 504
//! - Slow bodies are relayed in full and a client drop releases the backend
//!
//! Uses wiremock (or a raw TCP listener) as the backend and
//! `tower::ServiceExt::oneshot` for the proxy router.

use std::time::Duration;

use axum::body::Body;
use futures::StreamExt;
use http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;
use wiremock::matchers::{any, body_partial_json, header as header_eq, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use llama_stream::config::Config;
use llama_stream::proxy::{create_router, AppState};

/// Build a proxy router pointed at `target_url`.
fn proxy_app(target_url: &str, chunk_size: usize, timeout: Option<f64>) -> axum::Router {
    let config = Config {
        target_url: target_url.to_string(),
        streaming_chunk_size: chunk_size,
        request_timeout: timeout,
        ..Config::default()
    };
    create_router(AppState::new(config).expect("build app state"))
}

fn chat_request(body: impl Into<Body>) -> Request<Body> {
    Request::post("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer sk-test")
        .body(body.into())
        .unwrap()
}

fn client_body() -> String {
    json!({
        "model": "llama-3-8b",
        "messages": [{"role": "user", "content": "Say hello"}],
        "stream": true
    })
    .to_string()
}

async fn read_body(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body")
        .to_vec()
}

/// Split an SSE body into its `data:` payloads.
fn sse_payloads(body: &[u8]) -> Vec<String> {
    std::str::from_utf8(body)
        .expect("utf-8 body")
        .split("\n\n")
        .filter(|event| !event.is_empty())
        .map(|event| {
            event
                .strip_prefix("data: ")
                .unwrap_or_else(|| panic!("event without data prefix: {event:?}"))
                .to_string()
        })
        .collect()
}

fn completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-e2e",
        "object": "chat.completion",
        "created": 1_712_345_678,
        "model": "llama-3-8b",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

// ============================================================================
// Simulated streaming
// ============================================================================

#[tokio::test]
async fn test_content_replayed_as_sse_chunks() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Hello, world!")))
        .expect(1)
        .mount(&backend)
        .await;

    let app = proxy_app(&backend.uri(), 5, None);
    let response = app.oneshot(chat_request(client_body())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache"
    );
    assert_eq!(response.headers().get(header::CONNECTION).unwrap(), "close");

    let payloads = sse_payloads(&read_body(response).await);
    assert_eq!(payloads.len(), 5);
    assert_eq!(payloads[4], "[DONE]");

    let chunks: Vec<Value> = payloads[..4]
        .iter()
        .map(|p| serde_json::from_str(p).unwrap())
        .collect();
    assert_eq!(
        chunks[0]["choices"][0]["delta"],
        json!({"role": "assistant", "content": "Hello"})
    );
    assert_eq!(chunks[1]["choices"][0]["delta"], json!({"content": ", wor"}));
    assert_eq!(chunks[2]["choices"][0]["delta"], json!({"content": "ld!"}));
    assert_eq!(chunks[3]["choices"][0]["delta"], json!({}));
    assert_eq!(chunks[3]["choices"][0]["finish_reason"], "stop");
    for chunk in &chunks {
        assert_eq!(chunk["id"], "chatcmpl-e2e");
        assert_eq!(chunk["object"], "chat.completion.chunk");
        assert_eq!(chunk["model"], "llama-3-8b");
    }
}

#[tokio::test]
async fn test_tool_calls_replayed_as_single_chunk() {
    let tool_calls = json!([{
        "id": "call_1",
        "type": "function",
        "function": {"name": "lookup", "arguments": "{\"q\":\"rust\"}"}
    }]);
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-tools",
            "created": 1,
            "model": "llama-3-8b",
            "choices": [{"message": {"role": "assistant", "content": "", "tool_calls": tool_calls}}]
        })))
        .mount(&backend)
        .await;

    let app = proxy_app(&backend.uri(), 5, None);
    let response = app.oneshot(chat_request(client_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let payloads = sse_payloads(&read_body(response).await);
    assert_eq!(payloads.len(), 2);
    assert_eq!(payloads[1], "[DONE]");

    let chunk: Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(chunk["choices"][0]["delta"]["tool_calls"], tool_calls);
    assert!(chunk["choices"][0]["delta"]["content"].is_null());
    assert_eq!(chunk["choices"][0]["finish_reason"], "tool_calls");
}

#[tokio::test]
async fn test_response_without_choices_is_escaped() {
    let original = json!({"error": {"message": "model is loading"}});
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(original.clone()))
        .mount(&backend)
        .await;

    let app = proxy_app(&backend.uri(), 50, None);
    let response = app.oneshot(chat_request(client_body())).await.unwrap();

    let payloads = sse_payloads(&read_body(response).await);
    assert_eq!(payloads.len(), 3);
    assert_eq!(payloads[2], "[DONE]");

    let first: Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(first["model"], "unknown-model");
    let escaped = first["choices"][0]["delta"]["content"].as_str().unwrap();
    assert_eq!(serde_json::from_str::<Value>(escaped).unwrap(), original);

    let last: Value = serde_json::from_str(&payloads[1]).unwrap();
    assert_eq!(last["choices"][0]["finish_reason"], "stop");
}

// ============================================================================
// Outbound request shape
// ============================================================================

#[tokio::test]
async fn test_outbound_request_forces_stream_false_and_filters_headers() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header_eq("authorization", "Bearer sk-test"))
        .and(header_eq("accept", "*/*"))
        .and(body_partial_json(json!({"stream": false, "model": "llama-3-8b"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .expect(1)
        .mount(&backend)
        .await;

    let request = Request::post("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer sk-test")
        .header("x-private-header", "do-not-forward")
        .header(header::COOKIE, "session=abc")
        .body(Body::from(client_body()))
        .unwrap();

    let app = proxy_app(&backend.uri(), 50, None);
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let received = backend.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].headers.get("x-private-header").is_none());
    assert!(received[0].headers.get("cookie").is_none());
    assert_eq!(
        received[0].headers.get("content-type").unwrap(),
        "application/json"
    );

    let sent: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(sent["stream"], false);
    assert_eq!(sent["messages"][0]["content"], "Say hello");
}

#[tokio::test]
async fn test_stream_field_added_when_client_omits_it() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .expect(1)
        .mount(&backend)
        .await;

    let app = proxy_app(&backend.uri(), 50, None);
    let body = json!({"model": "m", "messages": []}).to_string();
    let response = app.oneshot(chat_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    backend.verify().await;
}

// ============================================================================
// Passthrough
// ============================================================================

#[tokio::test]
async fn test_backend_error_passed_through() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_raw("upstream exploded", "text/plain")
                .insert_header("x-backend-node", "gpu-7"),
        )
        .mount(&backend)
        .await;

    let app = proxy_app(&backend.uri(), 5, None);
    let response = app.oneshot(chat_request(client_body())).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain"
    );
    assert!(response.headers().get("x-backend-node").is_none());
    assert_eq!(read_body(response).await, b"upstream exploded");
}

#[tokio::test]
async fn test_non_json_success_passed_through() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("plain words", "text/plain"))
        .mount(&backend)
        .await;

    let app = proxy_app(&backend.uri(), 5, None);
    let response = app.oneshot(chat_request(client_body())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain"
    );
    assert_eq!(read_body(response).await, b"plain words");
}

#[tokio::test]
async fn test_unparseable_json_success_passed_through() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{not json", "application/json"))
        .mount(&backend)
        .await;

    let app = proxy_app(&backend.uri(), 5, None);
    let response = app.oneshot(chat_request(client_body())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(read_body(response).await, b"{not json");
}

#[tokio::test]
async fn test_large_passthrough_body_intact() {
    let big: String = (0..50_000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_raw(big.clone(), "text/plain"))
        .mount(&backend)
        .await;

    let app = proxy_app(&backend.uri(), 5, None);
    let response = app.oneshot(chat_request(client_body())).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(read_body(response).await, big.as_bytes());
}

#[tokio::test]
async fn test_models_listing_passed_through() {
    let listing = json!({"object": "list", "data": [{"id": "llama-3-8b", "object": "model"}]});
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header_eq("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing.clone()))
        .expect(1)
        .mount(&backend)
        .await;

    let request = Request::get("/v1/models")
        .header(header::AUTHORIZATION, "Bearer sk-test")
        .body(Body::empty())
        .unwrap();
    let app = proxy_app(&backend.uri(), 5, None);
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let body: Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(body, listing);
}

// ============================================================================
// Client errors
// ============================================================================

#[tokio::test]
async fn test_invalid_json_rejected_without_forwarding() {
    let backend = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;

    let app = proxy_app(&backend.uri(), 5, None);
    let response = app
        .clone()
        .oneshot(chat_request("{\"model\": \"m\", "))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(chat_request("[1, 2, 3]")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(body["error"]["code"], 400);

    backend.verify().await;
}

#[tokio::test]
async fn test_unknown_get_is_not_found() {
    let backend = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;

    let app = proxy_app(&backend.uri(), 5, None);
    let request = Request::get("/v1/chat/completions")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    backend.verify().await;
}

#[tokio::test]
async fn test_other_methods_not_allowed() {
    let app = proxy_app("http://127.0.0.1:9", 5, None);
    let request = Request::delete("/v1/chat/completions")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

// ============================================================================
// Transport failures
// ============================================================================

/// Start a plain TCP server that answers any bytes with an HTTP/1.1 reply,
/// so a TLS client fails its handshake against it.
async fn start_plaintext_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind plaintext server");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                    .await;
            });
        }
    });

    format!("https://127.0.0.1:{}", addr.port())
}

#[tokio::test]
async fn test_tls_failure_is_bad_gateway() {
    let target = start_plaintext_server().await;
    let app = proxy_app(&target, 5, Some(5.0));

    let response = app.oneshot(chat_request(client_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_connection_refused_is_service_unavailable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let app = proxy_app(&format!("http://127.0.0.1:{}", port), 5, Some(5.0));
    let response = app.oneshot(chat_request(client_body())).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(body["error"]["code"], 503);
}

#[tokio::test]
async fn test_timeout_is_gateway_timeout() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("too late"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&backend)
        .await;

    let app = proxy_app(&backend.uri(), 5, Some(0.2));
    let response = app.oneshot(chat_request(client_body())).await.unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_connect_timeout_is_service_unavailable() {
    // Non-routable address: the SYN goes unanswered
    let app = proxy_app("http://10.255.255.1:81", 5, Some(0.3));

    let response = tokio::time::timeout(
        Duration::from_secs(10),
        app.oneshot(chat_request(client_body())),
    )
    .await
    .expect("connect timeout should fire")
    .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// ============================================================================
// Slow bodies and cancellation
// ============================================================================

/// Start a raw HTTP backend that answers with a 500 whose `len`-byte body is
/// written one byte per `gap`. The receiver reports whether every byte was
/// written before the connection closed.
async fn start_trickle_server(len: usize, gap: Duration) -> (String, tokio::sync::oneshot::Receiver<bool>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind trickle server");
    let addr = listener.local_addr().unwrap();
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept proxy connection");
        let mut buf = vec![0u8; 64 * 1024];
        let _ = socket.read(&mut buf).await;

        let head = format!(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Type: text/plain\r\nContent-Length: {len}\r\n\r\n"
        );
        let mut delivered = socket.write_all(head.as_bytes()).await.is_ok();
        for i in 0..len {
            if !delivered {
                break;
            }
            tokio::time::sleep(gap).await;
            let byte = b'0' + (i % 10) as u8;
            delivered = socket.write_all(&[byte]).await.is_ok() && socket.flush().await.is_ok();
        }
        let _ = done_tx.send(delivered);
    });

    (format!("http://127.0.0.1:{}", addr.port()), done_rx)
}

#[tokio::test]
async fn test_slow_passthrough_body_is_not_cut_off() {
    // Total transfer (3s) exceeds the timeout; no single gap does
    let (target, done) = start_trickle_server(10, Duration::from_millis(300)).await;
    let app = proxy_app(&target, 5, Some(1.0));

    let response = app.oneshot(chat_request(client_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(read_body(response).await, b"0123456789");
    assert!(done.await.unwrap());
}

#[tokio::test]
async fn test_client_drop_releases_backend() {
    let (target, done) = start_trickle_server(200, Duration::from_millis(20)).await;
    let app = proxy_app(&target, 5, None);

    let response = app.oneshot(chat_request(client_body())).await.unwrap();
    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.expect("first block").unwrap();
    assert!(!first.is_empty());
    drop(body);

    let delivered = tokio::time::timeout(Duration::from_secs(10), done)
        .await
        .expect("backend should notice the closed connection")
        .unwrap();
    assert!(!delivered);
}

#[tokio::test]
async fn test_client_drop_mid_stream_leaves_proxy_usable() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(&"x".repeat(500))))
        .expect(2)
        .mount(&backend)
        .await;

    let app = proxy_app(&backend.uri(), 1, None);

    let response = app.clone().oneshot(chat_request(client_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut frames = response.into_body().into_data_stream();
    let first = frames.next().await.expect("first frame").unwrap();
    assert!(first.starts_with(b"data: "));
    drop(frames);

    let response = app.oneshot(chat_request(client_body())).await.unwrap();
    let payloads = sse_payloads(&read_body(response).await);
    assert_eq!(payloads.len(), 502);
    assert_eq!(payloads.last().unwrap(), "[DONE]");
}
