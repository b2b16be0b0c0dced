//! Streaming simulation.
//!
//! Provides [`StreamEmitter`], which slices one complete chat completion into
//! the ordered sequence of `chat.completion.chunk` objects a natively streaming
//! backend would have produced. Emission is pure: no I/O, no clock, so the
//! same shape and chunk size always yield the same sequence.

use super::types::{
    ChunkChoice, ChunkMeta, CompletionShape, Delta, FinishReason, StreamChunk, CHUNK_OBJECT,
};

const ASSISTANT_ROLE: &str = "assistant";

/// Converts a [`CompletionShape`] into streaming chunks.
#[derive(Debug, Clone, Copy)]
pub struct StreamEmitter {
    chunk_size: usize,
}

impl StreamEmitter {
    /// Create an emitter that splits content into `chunk_size` characters.
    ///
    /// A zero size is treated as one; config validation rejects it earlier.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Produce the full ordered chunk sequence for one completion.
    pub fn emit(&self, shape: &CompletionShape) -> Vec<StreamChunk> {
        match shape {
            CompletionShape::ToolCalls { meta, tool_calls } => vec![chunk(
                meta,
                Delta {
                    role: Some(ASSISTANT_ROLE),
                    content: Some(None),
                    tool_calls: Some(tool_calls.clone()),
                },
                Some(FinishReason::ToolCalls),
            )],
            CompletionShape::Content { meta, content } => {
                let mut chunks: Vec<StreamChunk> = split_chars(content, self.chunk_size)
                    .enumerate()
                    .map(|(i, piece)| {
                        let delta = Delta {
                            role: (i == 0).then_some(ASSISTANT_ROLE),
                            content: Some(Some(piece.to_string())),
                            tool_calls: None,
                        };
                        chunk(meta, delta, None)
                    })
                    .collect();
                chunks.push(stop_chunk(meta));
                chunks
            }
            CompletionShape::Empty { meta } => vec![stop_chunk(meta)],
            CompletionShape::Malformed { meta, original } => {
                tracing::warn!(
                    id = %meta.id,
                    "Response has no choices, emitting it verbatim as a single content chunk"
                );
                let escaped = Delta {
                    role: None,
                    content: Some(Some(original.to_string())),
                    tool_calls: None,
                };
                vec![chunk(meta, escaped, None), stop_chunk(meta)]
            }
        }
    }
}

fn chunk(meta: &ChunkMeta, delta: Delta, finish_reason: Option<FinishReason>) -> StreamChunk {
    StreamChunk {
        id: meta.id.clone(),
        object: CHUNK_OBJECT,
        created: meta.created,
        model: meta.model.clone(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }],
    }
}

fn stop_chunk(meta: &ChunkMeta) -> StreamChunk {
    chunk(meta, Delta::default(), Some(FinishReason::Stop))
}

/// Split `text` into consecutive pieces of at most `size` characters.
fn split_chars(text: &str, size: usize) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let end = rest
            .char_indices()
            .nth(size)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        let (piece, tail) = rest.split_at(end);
        rest = tail;
        Some(piece)
    })
}
