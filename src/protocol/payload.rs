use smallvec::SmallVec;

use super::canonical::{CanonicalUsage, Fragment, ToolCallFragment};
use super::mapping::resolve_finish_reason;
use super::wire::{WireChoice, WirePayload, WireToolCall, WireUsage};

/// Sentinel payload marking provider-side completion.
pub const DONE_SENTINEL: &str = "[DONE]";

pub type Fragments = SmallVec<[Fragment; 4]>;

/// Result of interpreting one SSE payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpretation {
    /// The `[DONE]` control sentinel.
    Done,
    /// Malformed JSON; the payload contributes nothing.
    Skipped,
    /// A well-formed payload and whatever it carried (possibly nothing).
    Fragments(Fragments),
}

/// JSON shapes probed on every payload, in extraction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireShape {
    /// Top-level `response` / `tool_calls`.
    Native,
    /// `choices[0].delta.*`.
    ChatCompletions,
}

impl WireShape {
    pub const ALL: [WireShape; 2] = [WireShape::Native, WireShape::ChatCompletions];
}

/// Interpret one SSE `data:` payload.
#[must_use]
pub fn interpret_payload(payload: &str) -> Interpretation {
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return Interpretation::Done;
    }
    match serde_json::from_str::<WirePayload>(payload) {
        Ok(wire) => Interpretation::Fragments(extract_fragments(wire)),
        Err(err) => {
            tracing::debug!(error = %err, payload_len = payload.len(), "skipping malformed stream payload");
            Interpretation::Skipped
        }
    }
}

/// Interpret an already-parsed JSON value, e.g. a complete non-streaming body.
#[must_use]
pub fn interpret_value(value: serde_json::Value) -> Interpretation {
    match serde_json::from_value::<WirePayload>(value) {
        Ok(wire) => Interpretation::Fragments(extract_fragments(wire)),
        Err(err) => {
            tracing::debug!(error = %err, "skipping malformed response object");
            Interpretation::Skipped
        }
    }
}

/// Extract every fragment carried by a payload.
///
/// Content fragments come first (shape by shape), followed by at most one
/// finish fragment and one usage fragment.
#[must_use]
pub fn extract_fragments(mut wire: WirePayload) -> Fragments {
    let mut out = Fragments::new();
    let mut first_choice = wire
        .choices
        .take()
        .and_then(|choices| choices.into_iter().next());

    for shape in WireShape::ALL {
        match shape {
            WireShape::Native => extract_native(&mut wire, &mut out),
            WireShape::ChatCompletions => {
                if let Some(choice) = first_choice.as_mut() {
                    extract_chat_choice(choice, &mut out);
                }
            }
        }
    }

    let choice_reason = first_choice
        .as_ref()
        .and_then(|choice| choice.finish_reason.as_deref());
    if let Some(reason) = resolve_finish_reason(choice_reason, wire.finish_reason.as_deref()) {
        out.push(Fragment::Finish(reason.to_owned()));
    }

    if let Some(usage) = wire.usage {
        out.push(Fragment::Usage(canonical_usage(usage)));
    }

    out
}

fn extract_native(wire: &mut WirePayload, out: &mut Fragments) {
    if let Some(text) = wire.response.take() {
        if !text.is_empty() {
            out.push(Fragment::Text(text));
        }
    }
    if let Some(tool_calls) = wire.tool_calls.take() {
        push_tool_call_fragments(tool_calls, out);
    }
}

fn extract_chat_choice(choice: &mut WireChoice, out: &mut Fragments) {
    let Some(delta) = choice.delta.take().or_else(|| choice.message.take()) else {
        return;
    };
    if let Some(reasoning) = delta.reasoning_content {
        if !reasoning.is_empty() {
            out.push(Fragment::Reasoning(reasoning));
        }
    }
    if let Some(content) = delta.content {
        if !content.is_empty() {
            out.push(Fragment::Text(content));
        }
    }
    if let Some(tool_calls) = delta.tool_calls {
        push_tool_call_fragments(tool_calls, out);
    }
}

fn push_tool_call_fragments(tool_calls: Vec<WireToolCall>, out: &mut Fragments) {
    for (position, call) in tool_calls.into_iter().enumerate() {
        let fragment = tool_call_fragment(position, call);
        if fragment.is_null_sentinel() {
            tracing::trace!(index = fragment.index, "ignoring empty tool-call sentinel");
            continue;
        }
        out.push(Fragment::ToolCall(fragment));
    }
}

fn tool_call_fragment(position: usize, call: WireToolCall) -> ToolCallFragment {
    let WireToolCall {
        index,
        id,
        name,
        arguments,
        function,
    } = call;
    let (function_name, function_arguments) =
        function.map_or((None, None), |function| (function.name, function.arguments));

    ToolCallFragment {
        index: index.unwrap_or_else(|| u32::try_from(position).unwrap_or(u32::MAX)),
        id: non_empty(id),
        name: non_empty(function_name).or_else(|| non_empty(name)),
        args_chunk: function_arguments
            .and_then(arguments_chunk)
            .or_else(|| arguments.and_then(arguments_chunk)),
    }
}

#[inline]
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

/// Arguments arrive as a JSON-encoded string chunk on streaming providers and
/// as a complete object on some native ones.
fn arguments_chunk(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(chunk) => non_empty(Some(chunk)),
        serde_json::Value::Object(map) if map.is_empty() => None,
        other => Some(other.to_string()),
    }
}

fn canonical_usage(usage: WireUsage) -> CanonicalUsage {
    CanonicalUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
    }
}
