//! Per-stream state machine turning fragments into well-formed events.
//!
//! Text and reasoning blocks open on their first non-empty delta and close
//! at flush. Tool calls are accumulated per provider `index`; a call starts
//! once both its id and name are known.

use rustc_hash::FxHashMap;

use crate::config::NormalizerConfig;
use crate::error::NormalizeError;
use crate::protocol::canonical::{
    CanonicalUsage, FinishReason, Fragment, StreamEvent, ToolCallFragment,
};
use crate::protocol::mapping::{map_finish_reason, truncated_finish_reason};
use crate::protocol::payload::{interpret_payload, interpret_value, Interpretation};
use crate::util::IdGenerator;

const TEXT_ID_PREFIX: &str = "txt";
const REASONING_ID_PREFIX: &str = "rsn";
const CALL_ID_PREFIX: &str = "call";

#[derive(Debug, Default)]
struct ToolCallAccumulator {
    index: u32,
    id: Option<String>,
    name: Option<String>,
    args: String,
    started: bool,
}

impl ToolCallAccumulator {
    /// Emit the start event once id and name are both known, followed by
    /// any arguments buffered before that point.
    fn start_if_ready(&mut self, out: &mut Vec<StreamEvent>) {
        if self.started {
            return;
        }
        let (Some(id), Some(name)) = (self.id.as_ref(), self.name.as_ref()) else {
            return;
        };
        out.push(StreamEvent::ToolCallStart {
            id: id.clone(),
            name: name.clone(),
        });
        if !self.args.is_empty() {
            out.push(StreamEvent::ToolCallArgsDelta {
                id: id.clone(),
                delta: self.args.clone(),
            });
        }
        self.started = true;
    }
}

/// Tool-call accumulators keyed by provider index, kept in first-seen order.
#[derive(Debug, Default)]
struct ToolCallTable {
    slots: Vec<ToolCallAccumulator>,
    by_index: FxHashMap<u32, usize>,
}

impl ToolCallTable {
    fn slot_mut(&mut self, index: u32) -> &mut ToolCallAccumulator {
        let next = self.slots.len();
        let slot = *self.by_index.entry(index).or_insert(next);
        if slot == next {
            self.slots.push(ToolCallAccumulator {
                index,
                ..ToolCallAccumulator::default()
            });
        }
        &mut self.slots[slot]
    }
}

/// Event synthesizer for one stream.
///
/// Owned by exactly one pipeline; never shared between streams.
pub struct EventSynthesizer {
    ids: IdGenerator,
    detect_truncation: bool,
    run_started: bool,
    text_block: Option<String>,
    reasoning_block: Option<String>,
    tool_calls: ToolCallTable,
    finish_raw: Option<String>,
    usage: CanonicalUsage,
    saw_done: bool,
    saw_payload: bool,
    terminated: bool,
}

impl EventSynthesizer {
    #[must_use]
    pub fn new(config: &NormalizerConfig) -> Self {
        Self::with_ids(config, IdGenerator::new())
    }

    /// Like [`EventSynthesizer::new`] with a fixed identifier seed, so block
    /// ids are reproducible.
    #[must_use]
    pub fn with_id_seed(config: &NormalizerConfig, seed: &str) -> Self {
        Self::with_ids(config, IdGenerator::with_seed(seed))
    }

    fn with_ids(config: &NormalizerConfig, ids: IdGenerator) -> Self {
        Self {
            ids,
            detect_truncation: config.detect_truncation,
            run_started: false,
            text_block: None,
            reasoning_block: None,
            tool_calls: ToolCallTable::default(),
            finish_raw: None,
            usage: CanonicalUsage::default(),
            saw_done: false,
            saw_payload: false,
            terminated: false,
        }
    }

    /// Whether `RunFinished` or `RunError` has been emitted.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Interpret one SSE payload and append the resulting events.
    pub fn on_payload(&mut self, payload: &str, out: &mut Vec<StreamEvent>) {
        self.on_interpretation(interpret_payload(payload), out);
    }

    /// Apply a complete non-streaming response object. The object counts as a
    /// properly terminated stream.
    pub fn on_complete_response(&mut self, value: serde_json::Value, out: &mut Vec<StreamEvent>) {
        self.on_interpretation(interpret_value(value), out);
        self.mark_done();
    }

    pub fn on_interpretation(&mut self, interpretation: Interpretation, out: &mut Vec<StreamEvent>) {
        match interpretation {
            Interpretation::Done => self.mark_done(),
            Interpretation::Skipped => {}
            Interpretation::Fragments(fragments) => {
                self.saw_payload = true;
                for fragment in fragments {
                    self.on_fragment(fragment, out);
                }
            }
        }
    }

    /// Record that the provider's `[DONE]` sentinel was observed.
    pub fn mark_done(&mut self) {
        self.saw_done = true;
    }

    pub fn on_fragment(&mut self, fragment: Fragment, out: &mut Vec<StreamEvent>) {
        if self.terminated {
            tracing::debug!("ignoring fragment after stream termination");
            return;
        }
        self.ensure_run_started(out);
        match fragment {
            Fragment::Text(text) => {
                if !text.is_empty() {
                    let id = open_block(&mut self.text_block, &mut self.ids, TEXT_ID_PREFIX, out, |id| {
                        StreamEvent::TextStart { id }
                    });
                    out.push(StreamEvent::TextDelta { id, delta: text });
                }
            }
            Fragment::Reasoning(text) => {
                if !text.is_empty() {
                    let id = open_block(
                        &mut self.reasoning_block,
                        &mut self.ids,
                        REASONING_ID_PREFIX,
                        out,
                        |id| StreamEvent::ReasoningStart { id },
                    );
                    out.push(StreamEvent::ReasoningDelta { id, delta: text });
                }
            }
            Fragment::ToolCall(call) => self.on_tool_call(call, out),
            Fragment::Finish(raw) => self.finish_raw = Some(raw),
            Fragment::Usage(usage) => self.usage = usage,
        }
    }

    fn on_tool_call(&mut self, fragment: ToolCallFragment, out: &mut Vec<StreamEvent>) {
        if fragment.is_null_sentinel() {
            return;
        }
        let ToolCallFragment {
            index,
            id,
            name,
            args_chunk,
        } = fragment;
        let call = self.tool_calls.slot_mut(index);

        if let Some(id) = id.filter(|id| !id.is_empty()) {
            if !call.started {
                call.id = Some(id);
            } else if call.id.as_deref() != Some(id.as_str()) {
                tracing::debug!(index, new_id = %id, "keeping id of already started tool call");
            }
        }
        if call.name.is_none() {
            call.name = name.filter(|name| !name.is_empty());
        }
        if let Some(chunk) = args_chunk.filter(|chunk| !chunk.is_empty()) {
            call.args.push_str(&chunk);
            if call.started {
                if let Some(id) = call.id.as_ref() {
                    out.push(StreamEvent::ToolCallArgsDelta {
                        id: id.clone(),
                        delta: chunk,
                    });
                }
            }
        }
        call.start_if_ready(out);
    }

    /// Flush at end of stream: close tool calls, then reasoning, then text,
    /// then emit exactly one `RunFinished`.
    pub fn finish(&mut self, out: &mut Vec<StreamEvent>) {
        if self.terminated {
            return;
        }
        self.ensure_run_started(out);
        self.flush_tool_calls(out);
        if let Some(id) = self.reasoning_block.take() {
            out.push(StreamEvent::ReasoningEnd { id });
        }
        if let Some(id) = self.text_block.take() {
            out.push(StreamEvent::TextEnd { id });
        }

        let finish_reason = self.effective_finish_reason();
        tracing::debug!(
            finish_reason = finish_reason.unified.as_str(),
            raw = finish_reason.raw.as_deref().unwrap_or(""),
            "stream finished"
        );
        out.push(StreamEvent::RunFinished {
            finish_reason,
            usage: self.usage,
        });
        self.terminated = true;
    }

    /// Terminate after an upstream failure. Emits `RunError` and never
    /// `RunFinished`; blocks left open stay open.
    ///
    /// A failure after `[DONE]` does not undo the completed stream: the
    /// regular flush runs instead.
    pub fn fail(&mut self, err: &NormalizeError, out: &mut Vec<StreamEvent>) {
        if self.terminated {
            return;
        }
        if self.saw_done {
            tracing::warn!(error = %err, "upstream failed after [DONE]; finishing normally");
            self.finish(out);
            return;
        }
        tracing::warn!(error = %err, "stream failed");
        self.ensure_run_started(out);
        out.push(StreamEvent::RunError {
            message: err.to_string(),
            code: Some(err.error_code().to_owned()),
        });
        self.terminated = true;
    }

    fn ensure_run_started(&mut self, out: &mut Vec<StreamEvent>) {
        if !self.run_started {
            self.run_started = true;
            out.push(StreamEvent::RunStarted);
        }
    }

    fn flush_tool_calls(&mut self, out: &mut Vec<StreamEvent>) {
        let table = std::mem::take(&mut self.tool_calls);
        for mut call in table.slots {
            if !call.started {
                if call.name.is_none() {
                    tracing::warn!(index = call.index, "dropping tool call that never received a name");
                    continue;
                }
                if call.id.is_none() {
                    call.id = Some(self.ids.next_id(CALL_ID_PREFIX));
                }
                call.start_if_ready(out);
            }
            let (Some(id), Some(name)) = (call.id, call.name) else {
                continue;
            };
            let input = parse_tool_input(call.index, &call.args);
            out.push(StreamEvent::ToolCallEnd { id, name, input });
        }
    }

    fn effective_finish_reason(&self) -> FinishReason {
        let truncated = !self.saw_done && self.saw_payload && self.finish_raw.is_none();
        if truncated && self.detect_truncation {
            tracing::warn!("stream ended without [DONE] or a finish reason");
            return truncated_finish_reason();
        }
        map_finish_reason(self.finish_raw.as_deref())
    }
}

/// Return the id of the open block, opening it first when needed.
fn open_block(
    block: &mut Option<String>,
    ids: &mut IdGenerator,
    prefix: &str,
    out: &mut Vec<StreamEvent>,
    start: impl FnOnce(String) -> StreamEvent,
) -> String {
    if let Some(id) = block.as_ref() {
        return id.clone();
    }
    let id = ids.next_id(prefix);
    out.push(start(id.clone()));
    *block = Some(id.clone());
    id
}

/// Parse reassembled tool-call arguments. Empty or unparsable arguments
/// become an empty object.
fn parse_tool_input(index: u32, args: &str) -> serde_json::Value {
    let empty = || serde_json::Value::Object(serde_json::Map::new());
    if args.trim().is_empty() {
        return empty();
    }
    serde_json::from_str(args).unwrap_or_else(|err| {
        tracing::warn!(index, error = %err, "tool call arguments are not valid JSON; using {{}}");
        empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::UnifiedFinishReason;
    use serde_json::json;

    fn synthesizer() -> EventSynthesizer {
        EventSynthesizer::with_id_seed(&NormalizerConfig::default(), "t")
    }

    fn run(payloads: &[&str]) -> Vec<StreamEvent> {
        let mut synth = synthesizer();
        let mut out = Vec::new();
        for payload in payloads {
            synth.on_payload(payload, &mut out);
        }
        synth.finish(&mut out);
        out
    }

    fn finish_of(events: &[StreamEvent]) -> &FinishReason {
        match events.last() {
            Some(StreamEvent::RunFinished { finish_reason, .. }) => finish_reason,
            other => panic!("expected RunFinished last, got {other:?}"),
        }
    }

    fn tool_call(index: u32, id: Option<&str>, name: Option<&str>, args: &str) -> Fragment {
        Fragment::ToolCall(ToolCallFragment {
            index,
            id: id.map(str::to_owned),
            name: name.map(str::to_owned),
            args_chunk: Some(args.to_owned()),
        })
    }

    #[test]
    fn text_stream_has_start_deltas_end() {
        let events = run(&[
            r#"{"response":"Hel"}"#,
            r#"{"response":"lo"}"#,
            "[DONE]",
        ]);
        assert_eq!(
            events,
            vec![
                StreamEvent::RunStarted,
                StreamEvent::TextStart {
                    id: "txt_t_0".to_string()
                },
                StreamEvent::TextDelta {
                    id: "txt_t_0".to_string(),
                    delta: "Hel".to_string()
                },
                StreamEvent::TextDelta {
                    id: "txt_t_0".to_string(),
                    delta: "lo".to_string()
                },
                StreamEvent::TextEnd {
                    id: "txt_t_0".to_string()
                },
                StreamEvent::RunFinished {
                    finish_reason: FinishReason {
                        unified: UnifiedFinishReason::Stop,
                        raw: None
                    },
                    usage: CanonicalUsage::default(),
                },
            ]
        );
    }

    #[test]
    fn truncated_stream_finishes_with_error() {
        let events = run(&[r#"{"response":"a"}"#]);
        let reason = finish_of(&events);
        assert_eq!(reason.unified, UnifiedFinishReason::Error);
        assert_eq!(reason.raw.as_deref(), Some("stream-truncated"));
    }

    #[test]
    fn truncation_detection_can_be_disabled() {
        let config = NormalizerConfig {
            detect_truncation: false,
            ..NormalizerConfig::default()
        };
        let mut synth = EventSynthesizer::with_id_seed(&config, "t");
        let mut out = Vec::new();
        synth.on_payload(r#"{"response":"a"}"#, &mut out);
        synth.finish(&mut out);
        assert_eq!(finish_of(&out).unified, UnifiedFinishReason::Stop);
    }

    #[test]
    fn finish_signal_without_done_is_not_truncation() {
        let events = run(&[r#"{"response":"a","finish_reason":"length"}"#]);
        assert_eq!(finish_of(&events).unified, UnifiedFinishReason::Length);
    }

    #[test]
    fn empty_stream_finishes_with_stop() {
        let events = run(&[]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::RunStarted);
        assert_eq!(finish_of(&events).unified, UnifiedFinishReason::Stop);
    }

    #[test]
    fn only_malformed_payloads_are_not_truncation() {
        let events = run(&["{oops", "also bad"]);
        assert_eq!(finish_of(&events).unified, UnifiedFinishReason::Stop);
    }

    #[test]
    fn last_finish_reason_wins() {
        let events = run(&[
            r#"{"choices":[{"delta":{"content":"x"},"finish_reason":"length"}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ]);
        let reason = finish_of(&events);
        assert_eq!(reason.unified, UnifiedFinishReason::ToolCalls);
        assert_eq!(reason.raw.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn last_usage_wins() {
        let events = run(&[
            r#"{"response":"a","usage":{"prompt_tokens":1,"completion_tokens":1}}"#,
            r#"{"usage":{"prompt_tokens":4,"completion_tokens":9}}"#,
            "[DONE]",
        ]);
        let Some(StreamEvent::RunFinished { usage, .. }) = events.last() else {
            panic!("expected RunFinished");
        };
        assert_eq!(usage.prompt_tokens, Some(4));
        assert_eq!(usage.completion_tokens, Some(9));
    }

    #[test]
    fn multi_chunk_tool_call_reassembly() {
        let mut synth = synthesizer();
        let mut out = Vec::new();
        synth.on_fragment(tool_call(0, Some("c1"), Some("f"), ""), &mut out);
        synth.on_fragment(tool_call(0, None, None, "{\"a\":"), &mut out);
        synth.on_fragment(tool_call(0, None, None, "1}"), &mut out);
        synth.mark_done();
        synth.finish(&mut out);

        assert_eq!(
            &out[..5],
            &[
                StreamEvent::RunStarted,
                StreamEvent::ToolCallStart {
                    id: "c1".to_string(),
                    name: "f".to_string()
                },
                StreamEvent::ToolCallArgsDelta {
                    id: "c1".to_string(),
                    delta: "{\"a\":".to_string()
                },
                StreamEvent::ToolCallArgsDelta {
                    id: "c1".to_string(),
                    delta: "1}".to_string()
                },
                StreamEvent::ToolCallEnd {
                    id: "c1".to_string(),
                    name: "f".to_string(),
                    input: json!({"a": 1})
                },
            ]
        );
    }

    #[test]
    fn deferred_start_replays_buffered_arguments() {
        let mut synth = synthesizer();
        let mut out = Vec::new();
        synth.on_fragment(tool_call(0, None, Some("lookup"), "{\"q\":"), &mut out);
        synth.on_fragment(tool_call(0, None, None, "\"rust\"}"), &mut out);
        assert_eq!(out, vec![StreamEvent::RunStarted]);

        synth.on_fragment(tool_call(0, Some("call_7"), None, ""), &mut out);
        assert_eq!(
            &out[1..],
            &[
                StreamEvent::ToolCallStart {
                    id: "call_7".to_string(),
                    name: "lookup".to_string()
                },
                StreamEvent::ToolCallArgsDelta {
                    id: "call_7".to_string(),
                    delta: "{\"q\":\"rust\"}".to_string()
                },
            ]
        );
    }

    #[test]
    fn nameless_call_is_dropped_and_idless_call_gets_generated_id() {
        let mut synth = synthesizer();
        let mut out = Vec::new();
        synth.on_fragment(tool_call(0, Some("orphan"), None, "{}"), &mut out);
        synth.on_fragment(tool_call(1, None, Some("search"), "{\"q\":1}"), &mut out);
        synth.mark_done();
        synth.finish(&mut out);

        assert!(!out.iter().any(|event| matches!(
            event,
            StreamEvent::ToolCallStart { id, .. } | StreamEvent::ToolCallEnd { id, .. } if id == "orphan"
        )));
        assert!(out.contains(&StreamEvent::ToolCallStart {
            id: "call_t_0".to_string(),
            name: "search".to_string()
        }));
        assert!(out.contains(&StreamEvent::ToolCallEnd {
            id: "call_t_0".to_string(),
            name: "search".to_string(),
            input: json!({"q": 1})
        }));
    }

    #[test]
    fn unparsable_arguments_become_empty_object() {
        let mut synth = synthesizer();
        let mut out = Vec::new();
        synth.on_fragment(tool_call(0, Some("c"), Some("f"), "{\"a\":"), &mut out);
        synth.mark_done();
        synth.finish(&mut out);
        assert!(out.contains(&StreamEvent::ToolCallEnd {
            id: "c".to_string(),
            name: "f".to_string(),
            input: json!({})
        }));
    }

    #[test]
    fn name_is_never_replaced_but_id_is_before_start() {
        let mut synth = synthesizer();
        let mut out = Vec::new();
        synth.on_fragment(tool_call(0, Some("first"), None, ""), &mut out);
        synth.on_fragment(tool_call(0, Some("second"), Some("f"), ""), &mut out);
        synth.on_fragment(tool_call(0, Some("third"), Some("g"), "{}"), &mut out);
        assert_eq!(
            &out[1..],
            &[
                StreamEvent::ToolCallStart {
                    id: "second".to_string(),
                    name: "f".to_string()
                },
                StreamEvent::ToolCallArgsDelta {
                    id: "second".to_string(),
                    delta: "{}".to_string()
                },
            ]
        );
    }

    #[test]
    fn null_sentinel_creates_nothing() {
        let mut synth = synthesizer();
        let mut out = Vec::new();
        synth.on_fragment(
            Fragment::ToolCall(ToolCallFragment {
                index: 2,
                id: None,
                name: None,
                args_chunk: Some(String::new()),
            }),
            &mut out,
        );
        assert_eq!(out, vec![StreamEvent::RunStarted]);
        assert!(synth.tool_calls.slots.is_empty());
    }

    #[test]
    fn flush_order_is_tools_reasoning_text_finish() {
        let events = run(&[
            r#"{"choices":[{"delta":{"content":"a","reasoning_content":"r"}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c","function":{"name":"f","arguments":"{}"}}]}}]}"#,
            "[DONE]",
        ]);
        let tail: Vec<&str> = events[events.len() - 4..]
            .iter()
            .map(|event| match event {
                StreamEvent::ToolCallEnd { .. } => "tool-end",
                StreamEvent::ReasoningEnd { .. } => "reasoning-end",
                StreamEvent::TextEnd { .. } => "text-end",
                StreamEvent::RunFinished { .. } => "finished",
                _ => "other",
            })
            .collect();
        assert_eq!(tail, vec!["tool-end", "reasoning-end", "text-end", "finished"]);
    }

    #[test]
    fn failure_emits_run_error_without_run_finished() {
        let mut synth = synthesizer();
        let mut out = Vec::new();
        synth.fail(&NormalizeError::Transport("reset".to_string()), &mut out);
        synth.finish(&mut out);
        assert_eq!(
            out,
            vec![
                StreamEvent::RunStarted,
                StreamEvent::RunError {
                    message: "Transport error: reset".to_string(),
                    code: Some("transport_error".to_string()),
                },
            ]
        );
        assert!(synth.is_terminated());
    }

    #[test]
    fn failure_after_done_finishes_normally() {
        let mut synth = synthesizer();
        let mut out = Vec::new();
        synth.on_payload(r#"{"response":"hi","finish_reason":"stop"}"#, &mut out);
        synth.on_payload("[DONE]", &mut out);
        synth.fail(&NormalizeError::Transport("reset".to_string()), &mut out);
        assert!(!out.iter().any(|event| matches!(event, StreamEvent::RunError { .. })));
        assert_eq!(
            &out[3..],
            &[
                StreamEvent::TextEnd {
                    id: "txt_t_0".to_string()
                },
                StreamEvent::RunFinished {
                    finish_reason: FinishReason {
                        unified: UnifiedFinishReason::Stop,
                        raw: Some("stop".to_string())
                    },
                    usage: CanonicalUsage::default(),
                },
            ]
        );
        assert!(synth.is_terminated());
    }

    #[test]
    fn mistyped_field_keeps_rest_of_payload() {
        let events = run(&[
            r#"{"response":"hi"}"#,
            r#"{"response":{"x":1},"finish_reason":"length","usage":{"prompt_tokens":3,"completion_tokens":4}}"#,
            "[DONE]",
        ]);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::RunFinished {
                finish_reason: FinishReason {
                    unified: UnifiedFinishReason::Length,
                    raw: Some("length".to_string())
                },
                usage: CanonicalUsage {
                    prompt_tokens: Some(3),
                    completion_tokens: Some(4),
                },
            })
        );
    }

    #[test]
    fn finish_is_idempotent() {
        let mut synth = synthesizer();
        let mut out = Vec::new();
        synth.finish(&mut out);
        synth.finish(&mut out);
        synth.on_payload(r#"{"response":"late"}"#, &mut out);
        assert_eq!(out.len(), 2);
    }
}
