use super::canonical::{FinishReason, UnifiedFinishReason};

/// Raw reason recorded when a stream closes without `[DONE]` or any finish signal.
pub const STREAM_TRUNCATED: &str = "stream-truncated";

// ---------------------------------------------------------------------------
// Finish reason mappings
// ---------------------------------------------------------------------------

#[must_use]
pub fn unify_finish_reason(raw: &str) -> UnifiedFinishReason {
    match raw {
        "length" | "model_length" => UnifiedFinishReason::Length,
        "tool_calls" => UnifiedFinishReason::ToolCalls,
        "error" => UnifiedFinishReason::Error,
        "other" | "unknown" => UnifiedFinishReason::Other,
        _ => UnifiedFinishReason::Stop, // "stop" and anything unrecognized
    }
}

/// Map a provider finish reason into the unified vocabulary, keeping the raw
/// string for diagnostics.
#[must_use]
pub fn map_finish_reason(raw: Option<&str>) -> FinishReason {
    FinishReason {
        unified: raw.map_or(UnifiedFinishReason::Stop, unify_finish_reason),
        raw: raw.map(str::to_owned),
    }
}

/// Pick the finish reason of one payload: `choices[0].finish_reason` wins
/// over a top-level `finish_reason`.
#[must_use]
pub fn resolve_finish_reason<'a>(
    choice: Option<&'a str>,
    top_level: Option<&'a str>,
) -> Option<&'a str> {
    choice.or(top_level)
}

#[must_use]
pub fn truncated_finish_reason() -> FinishReason {
    FinishReason {
        unified: UnifiedFinishReason::Error,
        raw: Some(STREAM_TRUNCATED.to_owned()),
    }
}
