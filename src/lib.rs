//! llama-stream - streaming shim for non-streaming chat-completion backends
//!
//! This library provides the core functionality for the llama-stream proxy:
//! configuration, request forwarding, response classification, and the
//! simulation of SSE streams from complete chat-completion responses.

pub mod config;
pub mod error;
pub mod proxy;

pub use config::Config;
pub use error::{Error, Result};
