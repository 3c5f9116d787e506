//! Decoding of streamed chat-completion bodies.
//!
//! The body arrives as arbitrarily sized chunks of an event stream.  Each
//! complete line of the form `data: <json>` carries one
//! [`ChatCompletionChunk`]; the text at `choices[0].delta.content` is a delta
//! token.  Everything else is skipped:
//!
//! - lines without the `data: ` prefix (blank separators, comments, `event:`
//!   and `id:` fields);
//! - the `[DONE]` sentinel (see [`DoneMarker`]);
//! - frames whose JSON does not parse or carries no text.
//!
//! A malformed frame never aborts decoding, and a line that is not valid UTF-8
//! counts as malformed.  A line split across chunks is
//! carried over until its newline arrives; a partial line still buffered when
//! the body ends is discarded.

use std::collections::VecDeque;
use std::time::Instant;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::error::Result;
use crate::observability::{
    STREAM_BYTES, STREAM_CHUNKS, STREAM_DURATION, STREAM_FRAME_ERRORS, STREAM_TOKENS,
};
use crate::types::ChatCompletionChunk;

/// Prefix that marks a frame.
const DATA_PREFIX: &str = "data: ";

/// Payload that marks the logical end of a response.
pub const DONE_SENTINEL: &str = "[DONE]";

/// What the decoder does when it meets the `[DONE]` sentinel.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum DoneMarker {
    /// Skip it; decoding ends only when the body ends.
    #[default]
    Ignore,
    /// Stop decoding; later frames and chunks are not read.
    Terminate,
}

/// Incremental line-framed decoder for chat-completion streams.
///
/// Lines are framed on raw bytes.  A newline byte never occurs inside a
/// multi-byte UTF-8 sequence, so a character split across chunks is whole again
/// once its line completes.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    done_marker: DoneMarker,
    saw_done: bool,
}

impl StreamDecoder {
    /// A decoder that treats `[DONE]` as decorative.
    pub fn new() -> Self {
        Self::default()
    }

    /// A decoder with explicit `[DONE]` handling.
    pub fn with_done_marker(done_marker: DoneMarker) -> Self {
        Self {
            done_marker,
            ..Self::default()
        }
    }

    /// Whether a `[DONE]` sentinel has been seen.
    pub fn saw_done(&self) -> bool {
        self.saw_done
    }

    /// Whether decoding has stopped because of the sentinel.
    pub fn is_terminated(&self) -> bool {
        self.saw_done && self.done_marker == DoneMarker::Terminate
    }

    /// Feed a chunk of text and drain the tokens of every line it completes.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.feed_bytes(chunk.as_bytes())
    }

    /// Feed raw body bytes and drain the tokens of every line they complete.
    ///
    /// A complete line that is not valid UTF-8 is skipped like any other
    /// malformed frame.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut tokens = Vec::new();
        if self.is_terminated() || bytes.is_empty() {
            return tokens;
        }
        self.buffer.extend_from_slice(bytes);

        let Some(last_newline) = self.buffer.iter().rposition(|&b| b == b'\n') else {
            return tokens;
        };
        let complete: Vec<u8> = self.buffer.drain(..=last_newline).collect();
        for raw in complete.split(|&b| b == b'\n') {
            match std::str::from_utf8(raw) {
                Ok(line) => {
                    if let Some(token) = self.decode_line(line) {
                        tokens.push(token);
                    }
                }
                Err(err) => {
                    STREAM_FRAME_ERRORS.click();
                    tracing::warn!(
                        error = %err,
                        line = %String::from_utf8_lossy(raw),
                        "skipping line with invalid UTF-8"
                    );
                }
            }
            if self.is_terminated() {
                self.buffer.clear();
                break;
            }
        }
        tokens
    }

    /// Signal the end of the body.
    ///
    /// Returns the unterminated trailing line, if any; it is never decoded.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest).into_owned();
        if rest.trim().is_empty() {
            return None;
        }
        tracing::debug!(line = %rest, "discarding partial line at end of stream");
        Some(rest)
    }

    fn decode_line(&mut self, line: &str) -> Option<String> {
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            if !line.trim().is_empty() {
                tracing::trace!(line = %line, "skipping non-data line");
            }
            return None;
        };
        let payload = payload.trim();
        if payload == DONE_SENTINEL {
            tracing::debug!(done_marker = ?self.done_marker, "received [DONE]");
            self.saw_done = true;
            return None;
        }
        match serde_json::from_str::<ChatCompletionChunk>(payload) {
            Ok(chunk) => {
                let token = chunk.delta_text().map(str::to_string);
                if token.is_none() {
                    tracing::trace!("frame carries no delta text");
                }
                token
            }
            Err(err) => {
                STREAM_FRAME_ERRORS.click();
                tracing::warn!(error = %err, frame = %payload, "skipping malformed frame");
                None
            }
        }
    }
}

/// Drive a [`StreamDecoder`] over a body stream, yielding delta tokens.
///
/// The returned stream is lazy and ends when `chunks` ends (or at `[DONE]`
/// under [`DoneMarker::Terminate`]).  Errors from `chunks` are yielded as
/// `Err`; malformed frames, invalid UTF-8 included, are not errors.
pub fn decode_stream<S>(chunks: S, done_marker: DoneMarker) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let decoder = StreamDecoder::with_done_marker(done_marker);
    let ready: VecDeque<String> = VecDeque::new();
    let started = Instant::now();

    stream::unfold(
        (chunks, decoder, ready),
        move |(mut chunks, mut decoder, mut ready)| async move {
            loop {
                if let Some(token) = ready.pop_front() {
                    STREAM_TOKENS.click();
                    return Some((Ok(token), (chunks, decoder, ready)));
                }
                if decoder.is_terminated() {
                    STREAM_DURATION.add(started.elapsed().as_secs_f64());
                    return None;
                }

                match chunks.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_CHUNKS.click();
                        STREAM_BYTES.count(bytes.len() as u64);
                        ready.extend(decoder.feed_bytes(&bytes));
                    }
                    Some(Err(err)) => {
                        return Some((Err(err), (chunks, decoder, ready)));
                    }
                    None => {
                        decoder.finish();
                        STREAM_DURATION.add(started.elapsed().as_secs_f64());
                        return None;
                    }
                }
            }
        },
    )
}
