//! Streaming (SSE) relay.
//!
//! # Responsibilities
//! - Open the upstream stream within the stream ceiling
//! - Forward event frames in arrival order, one frame in flight
//! - End every stream with exactly one completion marker or one error frame
//!
//! # State Machine
//! ```text
//! INIT → CONNECTING → STREAMING → DONE
//!            │            │
//!            └────────────┴──→ ERROR
//! ```
//!
//! # Design Decisions
//! - The stream ceiling bounds the connect and each idle gap, never total length
//! - The relay body is a lazy stream; dropping it (client gone) drops the
//!   upstream response and closes that connection
//! - Non-SSE or non-success answers are passed through unframed

use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderValue},
};
use futures_util::StreamExt;
use reqwest::Client;
use tokio::time;

use crate::http::error::GatewayError;
use crate::http::request::ProxiedRequest;
use crate::http::response::{RelayBody, RelayOutcome};
use crate::observability::metrics;
use crate::relay::forwarder::encode_body;
use crate::relay::sse::{self, FrameDecoder, FrameKind, EVENT_STREAM};
use crate::resilience::TimeoutPolicy;
use crate::routing::ServiceDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Init,
    Connecting,
    Streaming,
    Done,
    Error,
}

impl RelayState {
    fn as_str(self) -> &'static str {
        match self {
            RelayState::Init => "init",
            RelayState::Connecting => "connecting",
            RelayState::Streaming => "streaming",
            RelayState::Done => "done",
            RelayState::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RelayState::Done | RelayState::Error)
    }
}

/// Per-stream bookkeeping. Logs and records the outcome when dropped, which
/// also covers a client that disconnects mid-stream.
struct StreamTracker {
    service: String,
    request_id: String,
    state: RelayState,
    frames: u64,
    started: Instant,
}

impl StreamTracker {
    fn new(service: &str, request_id: &str) -> Self {
        Self {
            service: service.to_string(),
            request_id: request_id.to_string(),
            state: RelayState::Init,
            frames: 0,
            started: Instant::now(),
        }
    }

    fn transition(&mut self, next: RelayState) {
        tracing::trace!(
            request_id = %self.request_id,
            service = %self.service,
            from = self.state.as_str(),
            to = next.as_str(),
            "Stream state change"
        );
        self.state = next;
    }
}

impl Drop for StreamTracker {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            tracing::info!(
                request_id = %self.request_id,
                service = %self.service,
                frames = self.frames,
                "Client disconnected mid-stream, upstream read cancelled"
            );
            metrics::record_stream_outcome(&self.service, "cancelled");
            return;
        }
        let outcome = self.state.as_str();
        tracing::debug!(
            request_id = %self.request_id,
            service = %self.service,
            frames = self.frames,
            outcome,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Stream finished"
        );
        metrics::record_stream_outcome(&self.service, outcome);
    }
}

/// Relays the chat completion stream. Each call owns its own decoder and
/// buffers; concurrent streams share only the HTTP client.
#[derive(Clone)]
pub struct StreamingRelay {
    client: Client,
    policy: TimeoutPolicy,
}

impl StreamingRelay {
    pub fn new(client: Client, policy: TimeoutPolicy) -> Self {
        Self { client, policy }
    }

    /// Never fails: connect errors become an SSE response holding one error frame.
    pub async fn relay(
        &self,
        service: &ServiceDescriptor,
        request: ProxiedRequest,
        request_id: &str,
    ) -> RelayOutcome {
        let mut tracker = StreamTracker::new(&service.key, request_id);
        let ceiling = self.policy.stream;
        let url = service.upstream_url(&request.target_path, request.query.as_deref());

        tracker.transition(RelayState::Connecting);
        tracing::debug!(request_id, service = %service.key, url = %url, "Opening upstream stream");

        let builder = self
            .client
            .request(request.method.as_method(), url)
            .headers(request.headers);
        let builder = match encode_body(builder, request.body) {
            Ok(builder) => builder,
            Err(err) => {
                tracker.transition(RelayState::Error);
                return error_outcome(err);
            }
        };

        let response = match time::timeout(ceiling, builder.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(request_id, service = %service.key, error = %e, "Upstream stream connect failed");
                tracker.transition(RelayState::Error);
                return error_outcome(GatewayError::from_send(&service.key, e, ceiling));
            }
            Err(_) => {
                tracing::warn!(request_id, service = %service.key, "Upstream stream connect timed out");
                tracker.transition(RelayState::Error);
                return error_outcome(GatewayError::UpstreamTimeout {
                    service: service.key.clone(),
                    after: ceiling,
                });
            }
        };

        let status = response.status();
        let mut headers = response.headers().clone();
        tracker.transition(RelayState::Streaming);

        if !status.is_success() || !is_event_stream(&headers) {
            tracing::debug!(
                request_id,
                service = %service.key,
                status = status.as_u16(),
                "Upstream answered without an event stream, passing through"
            );
            // Nothing to frame, so the tracker reports the pass-through as done.
            tracker.transition(RelayState::Done);
            drop(tracker);
            let body = Body::from_stream(response.bytes_stream());
            return RelayOutcome::new(status, &headers, RelayBody::Stream(body));
        }

        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        let body = Body::from_stream(relay_frames(
            response.bytes_stream(),
            tracker,
            ceiling,
        ));
        RelayOutcome::new(status, &headers, RelayBody::Stream(body))
    }
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start().to_ascii_lowercase().starts_with(EVENT_STREAM))
        .unwrap_or(false)
}

/// SSE response carrying a single error frame, with the error's status.
fn error_outcome(err: GatewayError) -> RelayOutcome {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    RelayOutcome {
        status: err.status(),
        headers,
        body: RelayBody::Full(sse::error_frame(&err)),
    }
}

/// Frame the upstream bytes, ending with exactly one terminal frame.
fn relay_frames<S>(
    upstream: S,
    mut tracker: StreamTracker,
    idle: Duration,
) -> impl futures_util::Stream<Item = Result<Bytes, std::convert::Infallible>> + Send
where
    S: futures_util::Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    async_stream::stream! {
        let mut upstream = Box::pin(upstream);
        let mut decoder = FrameDecoder::default();
        let service = tracker.service.clone();

        'relay: loop {
            let chunk = match time::timeout(idle, upstream.next()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => {
                    tracing::warn!(service = %service, error = %e, "Upstream stream fault");
                    tracker.transition(RelayState::Error);
                    yield Ok(sse::error_frame(&GatewayError::UpstreamUnavailable {
                        service: service.clone(),
                        message: e.to_string(),
                    }));
                    break 'relay;
                }
                Ok(None) => {
                    // Upstream closed; a final frame may lack its blank line.
                    if let Some(rest) = decoder.finish() {
                        match sse::classify(&rest) {
                            FrameKind::Done => {
                                tracker.frames += 1;
                                tracker.transition(RelayState::Done);
                                yield Ok(sse::terminate(&rest));
                                break 'relay;
                            }
                            FrameKind::AltDone => {
                                tracker.transition(RelayState::Done);
                                yield Ok(sse::done_frame());
                                break 'relay;
                            }
                            FrameKind::Error => {
                                tracker.frames += 1;
                                tracker.transition(RelayState::Error);
                                yield Ok(sse::terminate(&rest));
                                break 'relay;
                            }
                            FrameKind::Data | FrameKind::Comment => {
                                tracker.frames += 1;
                                yield Ok(sse::terminate(&rest));
                            }
                        }
                    }
                    tracing::warn!(service = %service, frames = tracker.frames, "Upstream stream ended without completion marker");
                    tracker.transition(RelayState::Error);
                    yield Ok(sse::error_frame(&GatewayError::UpstreamProtocolError {
                        service: service.clone(),
                        message: "stream ended before completion".to_string(),
                    }));
                    break 'relay;
                }
                Err(_) => {
                    tracing::warn!(service = %service, idle_secs = idle.as_secs(), "Upstream stream idle timeout");
                    tracker.transition(RelayState::Error);
                    yield Ok(sse::error_frame(&GatewayError::UpstreamTimeout {
                        service: service.clone(),
                        after: idle,
                    }));
                    break 'relay;
                }
            };

            // Zero-byte keepalive fragments.
            if chunk.is_empty() {
                continue;
            }
            decoder.push(&chunk);

            loop {
                let frame = match decoder.next_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(service = %service, error = %e, "Dropping oversized event frame");
                        tracker.transition(RelayState::Error);
                        yield Ok(sse::error_frame(&GatewayError::UpstreamProtocolError {
                            service: service.clone(),
                            message: e.to_string(),
                        }));
                        break 'relay;
                    }
                };

                match sse::classify(&frame) {
                    FrameKind::Data | FrameKind::Comment => {
                        tracker.frames += 1;
                        yield Ok(frame);
                    }
                    FrameKind::Done => {
                        tracker.frames += 1;
                        tracker.transition(RelayState::Done);
                        yield Ok(frame);
                        break 'relay;
                    }
                    FrameKind::AltDone => {
                        tracker.transition(RelayState::Done);
                        yield Ok(sse::done_frame());
                        break 'relay;
                    }
                    FrameKind::Error => {
                        tracker.frames += 1;
                        tracker.transition(RelayState::Error);
                        yield Ok(frame);
                        break 'relay;
                    }
                }
            }
        }
        // `upstream` and `tracker` drop here; bytes after completion are never read.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    async fn collect(chunks: Vec<&'static [u8]>) -> String {
        let upstream = stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, reqwest::Error>(Bytes::from_static(c))),
        );
        let tracker = StreamTracker::new("ai_chatbot", "test");
        let frames: Vec<_> = relay_frames(upstream, tracker, Duration::from_secs(1))
            .collect()
            .await;
        let bytes: Vec<u8> = frames
            .into_iter()
            .flat_map(|f| f.map(|b| b.to_vec()).unwrap_or_default())
            .collect();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn only_done_and_error_are_terminal() {
        assert!(RelayState::Done.is_terminal());
        assert!(RelayState::Error.is_terminal());
        assert!(!RelayState::Streaming.is_terminal());
        assert!(!RelayState::Connecting.is_terminal());
    }

    #[tokio::test]
    async fn forwards_frames_then_done() {
        let out = collect(vec![
            b"data: {\"chunk\": \"a\"}\n\n",
            b"",
            b"data: {\"chunk\": \"b\"}\n\ndata: {\"done\": true}\n\n",
            b"data: {\"chunk\": \"late\"}\n\n",
        ])
        .await;
        assert_eq!(
            out,
            "data: {\"chunk\": \"a\"}\n\ndata: {\"chunk\": \"b\"}\n\ndata: {\"done\": true}\n\n"
        );
    }

    #[tokio::test]
    async fn alternative_sentinel_becomes_canonical() {
        let out = collect(vec![b"data: {\"chunk\": \"a\"}\n\ndata: [DONE]\n\n"]).await;
        assert_eq!(out, "data: {\"chunk\": \"a\"}\n\ndata: {\"done\": true}\n\n");
    }

    #[tokio::test]
    async fn eof_without_marker_ends_with_error_frame() {
        let out = collect(vec![b"data: {\"chunk\": \"a\"}\n\n"]).await;
        assert!(out.starts_with("data: {\"chunk\": \"a\"}\n\n"));
        assert!(out.contains("UpstreamProtocolError"));
        assert!(!out.contains("\"done\""));
        assert_eq!(out.matches("data:").count(), 2);
    }

    #[tokio::test]
    async fn unterminated_final_marker_is_closed() {
        let out = collect(vec![b"data: {\"chunk\": \"a\"}\n\n", b"data: {\"done\": true}"]).await;
        assert_eq!(out, "data: {\"chunk\": \"a\"}\n\ndata: {\"done\": true}\n\n");

        let out = collect(vec![b"data: {\"error\": \"oom\"}\n"]).await;
        assert_eq!(out, "data: {\"error\": \"oom\"}\n\n");
    }

    #[tokio::test]
    async fn upstream_error_frame_is_terminal() {
        let out = collect(vec![b"data: {\"error\": \"AI model inference failed\"}\n\n"]).await;
        assert_eq!(out, "data: {\"error\": \"AI model inference failed\"}\n\n");
    }

    #[tokio::test]
    async fn idle_gap_times_out() {
        let upstream = stream::pending::<Result<Bytes, reqwest::Error>>();
        let tracker = StreamTracker::new("ai_chatbot", "test");
        let frames: Vec<_> = relay_frames(upstream, tracker, Duration::from_millis(50))
            .collect()
            .await;
        assert_eq!(frames.len(), 1);
        let frame = frames.into_iter().next().unwrap().unwrap();
        assert!(String::from_utf8_lossy(&frame).contains("UpstreamTimeout"));
    }
}
