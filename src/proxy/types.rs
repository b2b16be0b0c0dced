//! OpenAI-compatible response and streaming chunk types.

use serde::Serialize;
use serde_json::Value;

/// Placeholder id when the backend omits one.
pub const DEFAULT_COMPLETION_ID: &str = "chatcmpl-default-id";
/// Placeholder model when the backend omits one.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo-0613";
/// Model reported for responses that are not chat completions.
pub const UNKNOWN_MODEL: &str = "unknown-model";
/// Object type of every emitted chunk.
pub const CHUNK_OBJECT: &str = "chat.completion.chunk";

/// Fields shared by every chunk emitted for one completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMeta {
    pub id: String,
    pub created: i64,
    pub model: String,
}

/// Shape of a backend response, decided once at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionShape {
    /// First choice requests tool invocations.
    ToolCalls {
        meta: ChunkMeta,
        tool_calls: Vec<Value>,
    },
    /// First choice carries non-empty text.
    Content { meta: ChunkMeta, content: String },
    /// A choice exists but has neither text nor tool calls.
    Empty { meta: ChunkMeta },
    /// No usable choice; the original body is carried verbatim.
    Malformed { meta: ChunkMeta, original: Value },
}

impl CompletionShape {
    /// Classify a parsed backend body (OpenAI chat completion format).
    ///
    /// Only `choices` decides the shape: a missing, non-array or empty
    /// `choices` is malformed. Metadata of an unexpected type falls back to
    /// the defaults, and `now` stands in for a missing `created`.
    pub fn from_value(value: Value, now: i64) -> Self {
        let first = match value.get("choices").and_then(Value::as_array) {
            Some(choices) if !choices.is_empty() => &choices[0],
            _ => return Self::malformed(value, now),
        };

        let meta = ChunkMeta {
            id: text_field(&value, "id").unwrap_or_else(|| DEFAULT_COMPLETION_ID.to_string()),
            created: timestamp_field(&value, "created").unwrap_or(now),
            model: text_field(&value, "model").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        };

        let Some(message) = first.get("message").filter(|m| m.is_object()) else {
            return CompletionShape::Empty { meta };
        };

        if let Some(tool_calls) = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .filter(|calls| !calls.is_empty())
        {
            return CompletionShape::ToolCalls {
                meta,
                tool_calls: tool_calls.clone(),
            };
        }

        match message.get("content") {
            Some(Value::String(content)) if !content.is_empty() => CompletionShape::Content {
                meta,
                content: content.clone(),
            },
            // Structured content (e.g. an array of parts) is streamed as its JSON text
            Some(content @ (Value::Array(_) | Value::Object(_))) => CompletionShape::Content {
                meta,
                content: content.to_string(),
            },
            _ => CompletionShape::Empty { meta },
        }
    }

    fn malformed(original: Value, now: i64) -> Self {
        let id = text_field(&original, "id").unwrap_or_else(|| DEFAULT_COMPLETION_ID.to_string());

        CompletionShape::Malformed {
            meta: ChunkMeta {
                id,
                created: now,
                model: UNKNOWN_MODEL.to_string(),
            },
            original,
        }
    }

    /// Metadata shared by all chunks of this completion.
    pub fn meta(&self) -> &ChunkMeta {
        match self {
            CompletionShape::ToolCalls { meta, .. }
            | CompletionShape::Content { meta, .. }
            | CompletionShape::Empty { meta }
            | CompletionShape::Malformed { meta, .. } => meta,
        }
    }
}

/// A string field, or a number rendered as text.
fn text_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// A Unix timestamp; fractional seconds are truncated.
fn timestamp_field(value: &Value, key: &str) -> Option<i64> {
    let field = value.get(key)?;
    field.as_i64().or_else(|| {
        field
            .as_f64()
            .filter(|secs| secs.is_finite() && secs.abs() < i64::MAX as f64)
            .map(|secs| secs.trunc() as i64)
    })
}

/// Why generation of a choice ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
}

/// Streaming chunk response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

/// A streaming choice delta.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<FinishReason>,
}

/// Delta content in streaming response.
///
/// `content` is doubly optional: `None` omits the key, `Some(None)` writes `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
}
