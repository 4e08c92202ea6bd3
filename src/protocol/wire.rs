//! Wire types for the JSON payloads carried by provider SSE frames.
//!
//! Every field is optional and read leniently: a field whose value has an
//! unexpected type reads as absent instead of failing the whole payload, so
//! the remaining fields of that payload still count. A payload may follow the
//! native shape, the chat-completions shape, or carry fields of both.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// One parsed SSE `data:` payload (or one complete non-streaming response).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WirePayload {
    /// Native shape: text delta.
    #[serde(default, deserialize_with = "lenient")]
    pub response: Option<String>,
    /// Native shape: tool-call pieces.
    #[serde(default, deserialize_with = "lenient_seq")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    /// Native shape: completion cause.
    #[serde(default, deserialize_with = "lenient")]
    pub finish_reason: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub usage: Option<WireUsage>,
    /// Chat-completions shape.
    #[serde(default, deserialize_with = "lenient_seq")]
    pub choices: Option<Vec<WireChoice>>,
}

/// A choice within a chat-completions chunk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireChoice {
    #[serde(default, deserialize_with = "lenient")]
    pub delta: Option<WireDelta>,
    /// Present instead of `delta` on complete (non-streaming) responses.
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<WireDelta>,
    #[serde(default, deserialize_with = "lenient")]
    pub finish_reason: Option<String>,
}

/// Delta (or complete message) content within a choice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireDelta {
    #[serde(default, deserialize_with = "lenient")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub reasoning_content: Option<String>,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

/// A tool-call element. Native payloads put `name`/`arguments` on the
/// element itself, chat-completions payloads nest them under `function`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireToolCall {
    #[serde(default, deserialize_with = "lenient")]
    pub index: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    /// A JSON string chunk, or a complete JSON object on some providers.
    #[serde(default)]
    pub arguments: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub function: Option<WireFunction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireFunction {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<serde_json::Value>,
}

/// Usage info in a payload.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct WireUsage {
    #[serde(default, deserialize_with = "lenient")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub completion_tokens: Option<u64>,
}

/// Read a field of any JSON type; a value that does not fit `T` is `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    Ok(serde_json::from_value(value).ok())
}

/// Like [`lenient`] for arrays, dropping only the elements that do not fit.
fn lenient_seq<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let serde_json::Value::Array(items) = serde_json::Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    Ok(Some(
        items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
    ))
}
