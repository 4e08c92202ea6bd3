//! SSE `data:` payload decoder and byte-stream adapter.
//!
//! Splits a byte stream into one payload per `data:` line, buffering partial
//! lines and UTF-8 sequences split across chunk boundaries.
use std::collections::VecDeque;

use futures_util::Stream;
use memchr::memchr_iter;

use crate::error::NormalizeError;

/// Default bound on one buffered partial line.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

// ---------------------------------------------------------------------------
// SsePayloadDecoder: incremental SSE line decoder
// ---------------------------------------------------------------------------

/// Incremental SSE payload decoder.
///
/// Feed it raw bytes (arriving in arbitrary chunk boundaries) and it yields
/// the content of every complete `data:` line, prefix stripped. All other
/// lines (comments, `event:`, `id:`, blank separators) are discarded.
pub struct SsePayloadDecoder {
    buffer: String,
    read_offset: usize,
    utf8_remainder: Vec<u8>,
    max_line_bytes: usize,
}

impl SsePayloadDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            utf8_remainder: Vec::new(),
            max_line_bytes,
        }
    }

    /// Feed raw text and return the payloads of any complete `data:` lines.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::LineTooLong`] when the unterminated tail
    /// outgrows the configured bound.
    pub fn feed(&mut self, chunk: &str) -> Result<Vec<String>, NormalizeError> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out)?;
        Ok(out)
    }

    /// Feed raw text and append complete payloads into a caller-provided buffer.
    ///
    /// Payloads completed by this chunk are appended even when an error is
    /// returned for the remaining tail.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::LineTooLong`] when the unterminated tail
    /// outgrows the configured bound.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<String>) -> Result<(), NormalizeError> {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let bytes = self.buffer.as_bytes();
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let line = &self.buffer[processed_up_to..line_end];
            if let Some(payload) = data_payload(line) {
                out.push(payload.to_owned());
            }
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return Ok(());
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }

        if self.pending_len() > self.max_line_bytes {
            return Err(NormalizeError::LineTooLong {
                limit: self.max_line_bytes,
            });
        }
        Ok(())
    }

    /// Feed raw bytes, carrying incomplete UTF-8 sequences over to the next
    /// call. Invalid sequences are replaced with U+FFFD.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::LineTooLong`] when the unterminated tail
    /// outgrows the configured bound.
    pub fn feed_bytes_into(
        &mut self,
        bytes: &[u8],
        out: &mut Vec<String>,
    ) -> Result<(), NormalizeError> {
        if self.utf8_remainder.is_empty() {
            if let Ok(text) = std::str::from_utf8(bytes) {
                return self.feed_into(text, out);
            }
            return self.decode_utf8_into(bytes, out);
        }

        let mut joined = std::mem::take(&mut self.utf8_remainder);
        joined.extend_from_slice(bytes);
        self.decode_utf8_into(&joined, out)
    }

    fn decode_utf8_into(&mut self, bytes: &[u8], out: &mut Vec<String>) -> Result<(), NormalizeError> {
        let mut rest = bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => return self.feed_into(text, out),
                Err(err) => {
                    let (valid, tail) = rest.split_at(err.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.feed_into(text, out)?;
                    }
                    match err.error_len() {
                        Some(invalid_len) => {
                            self.feed_into("\u{FFFD}", out)?;
                            rest = &tail[invalid_len..];
                        }
                        None => {
                            self.utf8_remainder.extend_from_slice(tail);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Flush at stream close: a provider may end its body without a trailing
    /// newline, so a buffered `data:` line still counts as a payload.
    pub fn finish(&mut self) -> Option<String> {
        if !self.utf8_remainder.is_empty() {
            let tail = String::from_utf8_lossy(&self.utf8_remainder).into_owned();
            self.utf8_remainder.clear();
            self.buffer.push_str(&tail);
        }
        let payload = data_payload(&self.buffer[self.read_offset..]).map(str::to_owned);
        self.buffer.clear();
        self.read_offset = 0;
        payload
    }

    /// Bytes held for the current unterminated line.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.read_offset + self.utf8_remainder.len()
    }
}

impl Default for SsePayloadDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload of a `data:` line (one optional space after the colon stripped).
#[inline]
fn data_payload(line: &str) -> Option<&str> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let value = line.strip_prefix("data:")?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

struct PayloadStreamState<S> {
    source: std::pin::Pin<Box<S>>,
    decoder: SsePayloadDecoder,
    scratch: Vec<String>,
    pending: VecDeque<String>,
    failure: Option<NormalizeError>,
    exhausted: bool,
}

/// Split a byte stream into SSE `data:` payloads using [`SsePayloadDecoder`].
///
/// One upstream chunk is pulled only once every payload decoded from the
/// previous chunk has been consumed. A source error is yielded as
/// [`NormalizeError::Transport`] after the payloads that preceded it, and
/// ends the stream.
pub fn sse_payload_stream<S, E>(
    byte_stream: S,
    max_line_bytes: usize,
) -> impl Stream<Item = Result<String, NormalizeError>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        PayloadStreamState {
            source: Box::pin(byte_stream),
            decoder: SsePayloadDecoder::with_max_line_bytes(max_line_bytes),
            scratch: Vec::with_capacity(8),
            pending: VecDeque::with_capacity(8),
            failure: None,
            exhausted: false,
        },
        |mut state| async move {
            loop {
                if let Some(payload) = state.pending.pop_front() {
                    return Some((Ok(payload), state));
                }
                if let Some(err) = state.failure.take() {
                    state.exhausted = true;
                    return Some((Err(err), state));
                }
                if state.exhausted {
                    return None;
                }

                match state.source.as_mut().next().await {
                    Some(Ok(bytes)) => {
                        let fed = state.decoder.feed_bytes_into(&bytes, &mut state.scratch);
                        state.pending.extend(state.scratch.drain(..));
                        if let Err(err) = fed {
                            state.failure = Some(err);
                        }
                    }
                    Some(Err(err)) => {
                        state.failure = Some(NormalizeError::Transport(err.to_string()));
                    }
                    None => {
                        state.exhausted = true;
                        if let Some(payload) = state.decoder.finish() {
                            state.pending.push_back(payload);
                        }
                    }
                }
            }
        },
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
