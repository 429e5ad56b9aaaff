//! Server-sent event framing.
//!
//! # Responsibilities
//! - Cut an upstream byte stream into whole event frames
//! - Recognize completion and error frames
//! - Encode the frames the gateway writes itself
//!
//! # Design Decisions
//! - Frames are forwarded as raw bytes; only the `data:` payload is inspected
//! - A frame is bounded by `MAX_FRAME_BYTES`; the decoder never holds more than that

use axum::body::Bytes;
use serde_json::Value;

use crate::http::error::GatewayError;

/// Upper bound on a single event frame.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

pub const EVENT_STREAM: &str = "text/event-stream";

#[derive(Debug, thiserror::Error)]
#[error("event frame exceeds {limit} bytes")]
pub struct FrameTooLarge {
    pub limit: usize,
}

/// Incremental splitter for `\n\n` / `\r\n\r\n` delimited frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Bytes of `buf` already known to contain no delimiter.
    scanned: usize,
    limit: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_FRAME_BYTES)
    }
}

impl FrameDecoder {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            limit,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete frame, delimiter included.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FrameTooLarge> {
        match frame_end(&self.buf, self.scanned) {
            Some(end) => {
                if end > self.limit {
                    return Err(FrameTooLarge { limit: self.limit });
                }
                let frame: Vec<u8> = self.buf.drain(..end).collect();
                self.scanned = 0;
                Ok(Some(Bytes::from(frame)))
            }
            None => {
                if self.buf.len() > self.limit {
                    return Err(FrameTooLarge { limit: self.limit });
                }
                // Keep two bytes of overlap so a delimiter split across chunks is found.
                self.scanned = self.buf.len().saturating_sub(2);
                Ok(None)
            }
        }
    }

    /// Whatever is left once the upstream has closed, if it holds anything
    /// but whitespace.
    pub fn finish(&mut self) -> Option<Bytes> {
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        if rest.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(Bytes::from(rest))
        }
    }
}

/// Close a frame recovered at end of stream with exactly one blank line.
pub fn terminate(frame: &[u8]) -> Bytes {
    let body_len = frame
        .iter()
        .rposition(|b| *b != b'\n' && *b != b'\r')
        .map_or(0, |i| i + 1);
    let mut framed = Vec::with_capacity(body_len + 2);
    framed.extend_from_slice(&frame[..body_len]);
    framed.extend_from_slice(b"\n\n");
    Bytes::from(framed)
}

fn frame_end(buf: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i < buf.len() {
        if buf[i] == b'\n' {
            match buf.get(i + 1) {
                Some(b'\n') => return Some(i + 2),
                Some(b'\r') if buf.get(i + 2) == Some(&b'\n') => return Some(i + 3),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// What a frame means to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// Ordinary payload.
    Data,
    /// `{"done": true}`.
    Done,
    /// `data: [DONE]`, rewritten to the canonical marker.
    AltDone,
    /// `{"error": ...}` from the upstream; terminal.
    Error,
    /// No `data:` field (comments, keepalives).
    Comment,
}

/// The joined `data:` lines of a frame.
pub fn data_payload(frame: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(frame);
    let mut lines = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .peekable();

    lines.peek()?;
    Some(lines.collect::<Vec<_>>().join("\n"))
}

pub fn classify(frame: &[u8]) -> FrameKind {
    let Some(payload) = data_payload(frame) else {
        return FrameKind::Comment;
    };
    if payload.trim() == "[DONE]" {
        return FrameKind::AltDone;
    }
    match serde_json::from_str::<Value>(&payload) {
        Ok(Value::Object(map)) => {
            if map.get("done").and_then(Value::as_bool) == Some(true) {
                FrameKind::Done
            } else if map.contains_key("error") {
                FrameKind::Error
            } else {
                FrameKind::Data
            }
        }
        _ => FrameKind::Data,
    }
}

/// Canonical completion frame.
pub fn done_frame() -> Bytes {
    Bytes::from_static(b"data: {\"done\": true}\n\n")
}

/// Terminal error frame for a gateway-side failure.
pub fn error_frame(err: &GatewayError) -> Bytes {
    let json = serde_json::to_string(&err.body())
        .unwrap_or_else(|_| format!("{{\"error\": \"{}\"}}", err.kind()));
    Bytes::from(format!("data: {}\n\n", json))
}
