pub mod collect;
pub mod sse;
pub mod synthesizer;

pub use collect::{collect_transcript, CollectedToolCall, StreamTranscript};
pub use sse::{sse_payload_stream, SsePayloadDecoder};
pub use synthesizer::EventSynthesizer;

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::config::NormalizerConfig;
use crate::error::NormalizeError;
use crate::protocol::canonical::StreamEvent;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Raw response bytes as delivered by the transport.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

/// Normalized event sequence for one response.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Where a provider response can be read from.
pub enum ResponseSource {
    /// A streaming `text/event-stream` body.
    Sse(ByteStream),
    /// A complete, already-parsed non-streaming body.
    Json(serde_json::Value),
    /// Neither a byte stream nor a body was supplied.
    Empty,
}

impl ResponseSource {
    /// Wrap any byte stream whose error converts into [`BoxError`].
    pub fn sse<S, E>(byte_stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        ResponseSource::Sse(Box::pin(byte_stream.map(|item| item.map_err(Into::<BoxError>::into))))
    }

    /// Classify a fully-read body: an object-shaped JSON body is a single-shot
    /// response, a body carrying `data:` lines is replayed as SSE.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::Body`] when the body is neither.
    pub fn from_body(body: Bytes) -> Result<Self, NormalizeError> {
        let trimmed = body.trim_ascii();
        if trimmed.is_empty() {
            return Ok(ResponseSource::Empty);
        }
        if trimmed.first() == Some(&b'{') {
            if let Ok(value) = serde_json::from_slice::<serde_json::Value>(trimmed) {
                return Ok(ResponseSource::Json(value));
            }
        }
        if memchr::memmem::find(&body, b"data:").is_some() {
            let chunk: Result<Bytes, BoxError> = Ok(body);
            return Ok(ResponseSource::Sse(Box::pin(futures_util::stream::once(
                async move { chunk },
            ))));
        }
        Err(NormalizeError::Body(
            "body is neither a JSON object nor an SSE stream".to_string(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

struct PipelineState<P> {
    payloads: Pin<Box<P>>,
    synthesizer: EventSynthesizer,
    scratch: Vec<StreamEvent>,
    pending: VecDeque<StreamEvent>,
}

/// Normalize a raw SSE byte stream into [`StreamEvent`]s.
///
/// The returned stream always ends with exactly one `RunFinished` or
/// `RunError`. Transport failures never surface as stream errors.
pub fn normalize_sse_stream<S, E>(
    byte_stream: S,
    config: &NormalizerConfig,
) -> impl Stream<Item = StreamEvent> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    synthesize_events(
        sse_payload_stream(byte_stream, config.max_line_bytes),
        EventSynthesizer::new(config),
    )
}

/// Drive `synthesizer` with an already-decoded payload stream.
///
/// Payload errors terminate the sequence with `RunError`.
pub fn synthesize_events<P>(
    payloads: P,
    synthesizer: EventSynthesizer,
) -> impl Stream<Item = StreamEvent> + Send
where
    P: Stream<Item = Result<String, NormalizeError>> + Send + 'static,
{
    futures_util::stream::unfold(
        PipelineState {
            payloads: Box::pin(payloads),
            synthesizer,
            scratch: Vec::with_capacity(8),
            pending: VecDeque::with_capacity(8),
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((event, state));
                }
                if state.synthesizer.is_terminated() {
                    return None;
                }

                match state.payloads.as_mut().next().await {
                    Some(Ok(payload)) => state.synthesizer.on_payload(&payload, &mut state.scratch),
                    Some(Err(err)) => state.synthesizer.fail(&err, &mut state.scratch),
                    None => state.synthesizer.finish(&mut state.scratch),
                }
                state.pending.extend(state.scratch.drain(..));
            }
        },
    )
}

/// Normalize a complete non-streaming response object.
///
/// Produces the same events a stream carrying the same content in one chunk
/// followed by `[DONE]` would.
#[must_use]
pub fn normalize_json_response(
    value: serde_json::Value,
    config: &NormalizerConfig,
) -> Vec<StreamEvent> {
    let mut synthesizer = EventSynthesizer::new(config);
    let mut out = Vec::with_capacity(8);
    synthesizer.on_complete_response(value, &mut out);
    synthesizer.finish(&mut out);
    out
}

/// Normalize whichever source a response provides.
///
/// # Errors
///
/// Returns [`NormalizeError::NoReadableSource`] for [`ResponseSource::Empty`].
/// No events are produced in that case.
pub fn normalize(
    source: ResponseSource,
    config: &NormalizerConfig,
) -> Result<EventStream, NormalizeError> {
    match source {
        ResponseSource::Sse(bytes) => Ok(Box::pin(normalize_sse_stream(bytes, config))),
        ResponseSource::Json(value) => Ok(Box::pin(futures_util::stream::iter(
            normalize_json_response(value, config),
        ))),
        ResponseSource::Empty => Err(NormalizeError::NoReadableSource),
    }
}

fn is_event_stream(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| {
            content_type
                .trim_start()
                .to_ascii_lowercase()
                .starts_with("text/event-stream")
        })
}

/// Normalize an HTTP response from a provider.
///
/// `text/event-stream` bodies are consumed incrementally; anything else is
/// read fully and classified with [`ResponseSource::from_body`].
///
/// # Errors
///
/// Returns [`NormalizeError::Body`] when a non-streaming body cannot be read
/// or classified, and [`NormalizeError::NoReadableSource`] when it is empty.
pub async fn normalize_response(
    response: reqwest::Response,
    config: &NormalizerConfig,
) -> Result<EventStream, NormalizeError> {
    if is_event_stream(&response) {
        return normalize(ResponseSource::sse(response.bytes_stream()), config);
    }
    let body = response
        .bytes()
        .await
        .map_err(|err| NormalizeError::Body(err.to_string()))?;
    normalize(ResponseSource::from_body(body)?, config)
}
