use serde::{Deserialize, Serialize};

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

impl CanonicalUsage {
    #[must_use]
    pub fn total_tokens(&self) -> Option<u64> {
        match (self.prompt_tokens, self.completion_tokens) {
            (None, None) => None,
            (prompt, completion) => Some(prompt.unwrap_or(0) + completion.unwrap_or(0)),
        }
    }
}

/// Closed vocabulary of completion causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnifiedFinishReason {
    Stop,
    Length,
    ToolCalls,
    Error,
    Other,
}

impl UnifiedFinishReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UnifiedFinishReason::Stop => "stop",
            UnifiedFinishReason::Length => "length",
            UnifiedFinishReason::ToolCalls => "tool-calls",
            UnifiedFinishReason::Error => "error",
            UnifiedFinishReason::Other => "other",
        }
    }
}

/// Unified finish reason plus the provider string it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishReason {
    pub unified: UnifiedFinishReason,
    pub raw: Option<String>,
}

/// A streaming tool-call piece as sent by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub args_chunk: Option<String>,
}

impl ToolCallFragment {
    /// Providers close some tool-call sequences with an element carrying no
    /// id, no name and no arguments. Such elements contribute nothing.
    #[must_use]
    pub fn is_null_sentinel(&self) -> bool {
        fn blank(value: Option<&String>) -> bool {
            value.is_none_or(String::is_empty)
        }
        blank(self.id.as_ref()) && blank(self.name.as_ref()) && blank(self.args_chunk.as_ref())
    }
}

/// One meaningful piece extracted from a single SSE payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    Reasoning(String),
    ToolCall(ToolCallFragment),
    Finish(String),
    Usage(CanonicalUsage),
}

/// A single provider-agnostic event in a normalized stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum StreamEvent {
    RunStarted,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    ToolCallStart {
        id: String,
        name: String,
    },
    ToolCallArgsDelta {
        id: String,
        delta: String,
    },
    ToolCallEnd {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    RunFinished {
        finish_reason: FinishReason,
        usage: CanonicalUsage,
    },
    RunError {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl StreamEvent {
    /// Whether this event ends the sequence.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::RunFinished { .. } | StreamEvent::RunError { .. }
        )
    }
}
