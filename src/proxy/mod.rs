//! HTTP proxy server module.
//!
//! This module provides the OpenAI-compatible HTTP front end that forwards
//! requests to the backend and, for chat completions, replays the complete
//! backend answer as a simulated SSE stream.

pub mod classify;
pub mod forward;
mod handlers;
mod server;
pub mod sse;
pub mod stream;
pub mod types;

pub use classify::{classify, Disposition, PassthroughHeaders};
pub use forward::{forward, OutboundHeaders};
pub use handlers::MODELS_PATH;
pub use server::{build_http_client, create_router, run_server, AppState};
pub use stream::StreamEmitter;
pub use types::{CompletionShape, StreamChunk};
