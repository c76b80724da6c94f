//! Server-Sent Events (SSE) decoding for streaming chat completions.
//!
//! The transport hands over arbitrary byte chunks. [`FrameDecoder`] carries
//! any incomplete trailing line over to the next chunk, turns every complete
//! `data: ` line into a [`Frame`], and recovers from two kinds of bad input:
//!
//! - A payload whose JSON ends early is held back and joined with the
//!   following line, because some servers wrap a record across lines. A
//!   following `data: ` line that is a complete frame by itself ends the held
//!   payload instead, which is then reported as malformed.
//! - A payload that is not a valid chunk at all is reported as a
//!   `MalformedFrame` error and skipped; decoding continues with the next line.

use crate::error::{Error, Result};
use crate::types::ChatCompletionChunk;

/// Literal that prefixes every payload-carrying line.
const DATA_PREFIX: &str = "data: ";

/// Payload that marks the graceful end of a stream.
const DONE_MARKER: &str = "[DONE]";

/// Upper bound on a held-back payload before it is given up as malformed.
const MAX_HELD_BYTES: usize = 1 << 20;

/// A logical event decoded from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A non-empty text fragment for the assistant message.
    Delta(String),

    /// The server sent `data: [DONE]`.
    Done,
}

enum Parsed {
    Chunk(ChatCompletionChunk),
    Incomplete,
    Invalid(serde_json::Error),
}

fn parse_payload(payload: &str) -> Parsed {
    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => Parsed::Chunk(chunk),
        Err(e) if e.is_eof() => Parsed::Incomplete,
        Err(e) => Parsed::Invalid(e),
    }
}

/// Incremental decoder for `data: <json>` event streams.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    held: Option<String>,
    done: bool,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once `[DONE]` has been seen.
    ///
    /// A finished decoder ignores all further input.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Returns the number of bytes waiting for a terminating newline.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Feeds one chunk of bytes and returns every frame it completes.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Result<Frame>> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }
        self.buffer.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let line = self.buffer[start..end].to_vec();
            start = end + 1;
            self.process_line(&line, &mut frames);
            if self.done {
                self.buffer.clear();
                return frames;
            }
        }
        self.buffer.drain(..start);
        frames
    }

    /// Flushes the decoder at end of stream.
    ///
    /// A final line without a trailing newline is still processed. A payload
    /// that was held back waiting for more data is reported as malformed.
    pub fn finish(&mut self) -> Vec<Result<Frame>> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line, &mut frames);
        }
        if !self.done
            && let Some(held) = self.held.take()
        {
            frames.push(Err(Error::malformed_frame(
                format!("stream ended inside a frame: {held}"),
                None,
            )));
        }
        frames
    }

    fn process_line(&mut self, raw: &[u8], frames: &mut Vec<Result<Frame>>) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                frames.push(Err(Error::malformed_frame(
                    format!("invalid UTF-8 in stream: {e}"),
                    Some(Box::new(e)),
                )));
                return;
            }
        };

        if line.is_empty() || line.starts_with(':') {
            return;
        }
        match line.strip_prefix(DATA_PREFIX) {
            Some(payload) => self.process_payload(payload, true, frames),
            // Bare continuation of a record that was wrapped across lines.
            None if self.held.is_some() => self.process_payload(line, false, frames),
            None => {}
        }
    }

    /// Decodes one payload; `framed` is true when it arrived on its own `data: ` line.
    fn process_payload(&mut self, payload: &str, framed: bool, frames: &mut Vec<Result<Frame>>) {
        if let Some(held) = self.held.take() {
            let joined = format!("{held}\n{payload}");
            match parse_payload(&joined) {
                Parsed::Chunk(chunk) => {
                    push_chunk(chunk, frames);
                    return;
                }
                // A complete frame on its own line ends the held one instead of feeding it.
                Parsed::Incomplete if !(framed && starts_frame(payload)) => {
                    self.hold(joined, frames);
                    return;
                }
                Parsed::Incomplete => {
                    frames.push(Err(Error::malformed_frame(
                        format!("unterminated frame: {held}"),
                        None,
                    )));
                }
                Parsed::Invalid(e) => {
                    frames.push(Err(Error::malformed_frame(
                        format!("unterminated frame: {held}"),
                        Some(Box::new(e)),
                    )));
                }
            }
        }

        if payload == DONE_MARKER {
            self.done = true;
            frames.push(Ok(Frame::Done));
            return;
        }
        if payload.trim().is_empty() {
            return;
        }
        match parse_payload(payload) {
            Parsed::Chunk(chunk) => push_chunk(chunk, frames),
            Parsed::Incomplete => self.hold(payload.to_string(), frames),
            Parsed::Invalid(e) => frames.push(Err(Error::malformed_frame(
                format!("could not parse frame: {payload}"),
                Some(Box::new(e)),
            ))),
        }
    }

    fn hold(&mut self, payload: String, frames: &mut Vec<Result<Frame>>) {
        if payload.len() > MAX_HELD_BYTES {
            frames.push(Err(Error::malformed_frame(
                format!("frame exceeds {MAX_HELD_BYTES} bytes"),
                None,
            )));
        } else {
            self.held = Some(payload);
        }
    }
}

/// Returns true if `payload` is a whole frame by itself.
fn starts_frame(payload: &str) -> bool {
    payload == DONE_MARKER || matches!(parse_payload(payload), Parsed::Chunk(_))
}

fn push_chunk(chunk: ChatCompletionChunk, frames: &mut Vec<Result<Frame>>) {
    if let Some(content) = chunk.content()
        && !content.is_empty()
    {
        frames.push(Ok(Frame::Delta(content.to_string())));
    }
}
