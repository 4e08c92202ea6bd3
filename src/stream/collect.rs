use futures_util::{Stream, StreamExt};
use serde::Serialize;

use crate::protocol::canonical::{CanonicalUsage, FinishReason, StreamEvent};

/// A tool call as it stood when its block closed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Everything a normalized event sequence carried, folded into one value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamTranscript {
    pub text: String,
    pub reasoning: String,
    pub tool_calls: Vec<CollectedToolCall>,
    pub finish_reason: Option<FinishReason>,
    pub usage: CanonicalUsage,
    pub error: Option<String>,
}

impl StreamTranscript {
    pub fn push(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta { delta, .. } => self.text.push_str(delta),
            StreamEvent::ReasoningDelta { delta, .. } => self.reasoning.push_str(delta),
            StreamEvent::ToolCallEnd { id, name, input } => {
                self.tool_calls.push(CollectedToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });
            }
            StreamEvent::RunFinished {
                finish_reason,
                usage,
            } => {
                self.finish_reason = Some(finish_reason.clone());
                self.usage = *usage;
            }
            StreamEvent::RunError { message, .. } => self.error = Some(message.clone()),
            StreamEvent::RunStarted
            | StreamEvent::TextStart { .. }
            | StreamEvent::TextEnd { .. }
            | StreamEvent::ReasoningStart { .. }
            | StreamEvent::ReasoningEnd { .. }
            | StreamEvent::ToolCallStart { .. }
            | StreamEvent::ToolCallArgsDelta { .. } => {}
        }
    }

    #[must_use]
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a StreamEvent>) -> Self {
        let mut transcript = Self::default();
        for event in events {
            transcript.push(event);
        }
        transcript
    }
}

/// Drain an event stream into a [`StreamTranscript`].
pub async fn collect_transcript<S>(events: S) -> StreamTranscript
where
    S: Stream<Item = StreamEvent>,
{
    events
        .fold(StreamTranscript::default(), |mut transcript, event| async move {
            transcript.push(&event);
            transcript
        })
        .await
}
