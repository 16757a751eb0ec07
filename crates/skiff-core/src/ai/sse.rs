//! Shared SSE plumbing for streaming providers.
//!
//! Providers hand their HTTP byte stream to [`spawn_sse_stream`] together
//! with a protocol-specific [`SseParser`]. The plumbing frames `data:`
//! payloads, feeds them to the parser, and forwards the resulting
//! [`StreamPart`]s over a channel until the stream ends, errors, or the
//! abort token fires.

use anyhow::Result;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ai::streaming::StreamPart;
use crate::ai::types::{FinishReason, ToolCall, Usage};

/// Protocol-level event produced by an [`SseParser`].
#[derive(Debug, Clone)]
pub enum SseEvent {
    TextDelta(String),
    ThinkingStart {
        index: usize,
    },
    ThinkingDelta {
        index: usize,
        thinking: String,
    },
    SignatureDelta {
        index: usize,
        signature: String,
    },
    ThinkingComplete {
        index: usize,
        thinking: String,
        signature: String,
    },
    RedactedThinking {
        data: String,
    },
    ToolCallStart {
        id: String,
        name: String,
    },
    ToolCallDelta {
        id: String,
        delta: String,
    },
    ToolCallComplete(ToolCall),
    /// Some protocols only finalize tool calls at end of stream.
    FinishWithToolCalls {
        tool_calls: Vec<ToolCall>,
        usage: Option<Usage>,
    },
    Usage(Usage),
    Finish {
        reason: FinishReason,
        usage: Option<Usage>,
    },
    /// Event carried no information for the loop.
    Skip,
}

/// Parser for one SSE wire protocol.
///
/// Implementations are stateful: partial tool calls and thinking blocks
/// accumulate across events until the protocol closes them.
#[async_trait::async_trait]
pub trait SseParser: Send + Sync {
    async fn parse_event(&self, json: &Value) -> Result<SseEvent>;
}

/// Map a stop reason string to a [`FinishReason`].
pub fn parse_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
        "length" | "max_tokens" => FinishReason::Length,
        "tool_use" | "tool_calls" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

// ── Accumulators ───────────────────────────────────────────────────────

/// Accumulates tool-call argument JSON across deltas.
#[derive(Debug)]
pub struct ToolCallAccumulator {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallAccumulator {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            arguments: String::new(),
        }
    }

    pub fn add_arguments(&mut self, delta: &str) {
        self.arguments.push_str(delta);
    }

    /// Complete if the accumulated arguments parse as JSON.
    pub fn try_complete(&mut self) -> Option<ToolCall> {
        if self.arguments.is_empty() {
            return Some(self.finish(Value::Object(serde_json::Map::new())));
        }
        let parsed = serde_json::from_str(&self.arguments).ok()?;
        Some(self.finish(parsed))
    }

    /// Complete unconditionally. Unparseable arguments become an empty
    /// object; the validator downstream flags the missing parameters and
    /// the retry protocol takes over.
    pub fn force_complete(&mut self) -> ToolCall {
        match self.try_complete() {
            Some(call) => call,
            None => {
                debug!(
                    tool = %self.name,
                    len = self.arguments.len(),
                    "tool call arguments did not parse; substituting empty object"
                );
                self.finish(Value::Object(serde_json::Map::new()))
            }
        }
    }

    fn finish(&mut self, arguments: Value) -> ToolCall {
        ToolCall {
            id: std::mem::take(&mut self.id),
            name: std::mem::take(&mut self.name),
            arguments,
        }
    }
}

/// Accumulates a thinking block and its signature.
#[derive(Debug, Default)]
pub struct ThinkingAccumulator {
    thinking: String,
    signature: String,
}

impl ThinkingAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_thinking(&mut self, delta: &str) {
        self.thinking.push_str(delta);
    }

    pub fn add_signature(&mut self, delta: &str) {
        self.signature.push_str(delta);
    }

    pub fn complete(self) -> (String, String) {
        (self.thinking, self.signature)
    }
}

// ── Line framing ───────────────────────────────────────────────────────

/// Frames raw bytes into complete `data:` payloads.
///
/// Chunk boundaries can fall anywhere, including inside a UTF-8
/// sequence, so bytes are buffered until a full line is available.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buf: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every completed `data:` payload.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }
}

/// Sentinel some protocols send to mark end of stream.
pub const DONE_MARKER: &str = "[DONE]";

// ── Stream driver ──────────────────────────────────────────────────────

/// Spawn a task that drains an HTTP byte stream through `parser` into
/// `tx`. The task ends on stream end, `[DONE]`, a parse/read error
/// (reported as [`StreamPart::Error`]), or cancellation.
pub(crate) fn spawn_sse_stream<S, P>(
    stream: S,
    parser: P,
    tx: mpsc::UnboundedSender<StreamPart>,
    cancel: CancellationToken,
    label: &'static str,
) where
    S: futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
    P: SseParser + 'static,
{
    tokio::spawn(async move {
        tokio::pin!(stream);
        let mut lines = SseLineBuffer::new();

        'stream: loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break 'stream,
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = chunk else { break };
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("{label} read error: {e}");
                    let _ = tx.send(StreamPart::Error {
                        error: format!("{label} read error: {e}"),
                    });
                    break;
                }
            };

            for payload in lines.push(&bytes) {
                if payload == DONE_MARKER {
                    break 'stream;
                }

                let json: Value = match serde_json::from_str(&payload) {
                    Ok(json) => json,
                    Err(e) => {
                        debug!("{label} skipping malformed SSE payload: {e}");
                        continue;
                    }
                };

                match parser.parse_event(&json).await {
                    Ok(event) => {
                        if !forward_event(event, &tx) {
                            break 'stream;
                        }
                    }
                    Err(e) => {
                        warn!("{label} parse error: {e}");
                        let _ = tx.send(StreamPart::Error {
                            error: format!("{label} parse error: {e}"),
                        });
                        break 'stream;
                    }
                }
            }
        }
    });
}

/// Translate a protocol event into stream parts. Returns `false` when
/// the stream is finished and the driver should stop.
fn forward_event(event: SseEvent, tx: &mpsc::UnboundedSender<StreamPart>) -> bool {
    match event {
        SseEvent::TextDelta(delta) => {
            let _ = tx.send(StreamPart::TextDelta { delta });
        }
        SseEvent::ThinkingStart { .. } | SseEvent::SignatureDelta { .. } | SseEvent::Skip => {}
        SseEvent::ThinkingDelta { thinking, .. } => {
            let _ = tx.send(StreamPart::ThinkingDelta { delta: thinking });
        }
        SseEvent::ThinkingComplete {
            thinking,
            signature,
            ..
        } => {
            let _ = tx.send(StreamPart::ThinkingComplete {
                thinking,
                signature,
            });
        }
        SseEvent::RedactedThinking { data } => {
            let _ = tx.send(StreamPart::RedactedThinking { data });
        }
        SseEvent::ToolCallStart { id, name } => {
            let _ = tx.send(StreamPart::ToolCallStart { id, name });
        }
        SseEvent::ToolCallDelta { id, delta } => {
            let _ = tx.send(StreamPart::ToolCallDelta { id, delta });
        }
        SseEvent::ToolCallComplete(tool_call) => {
            let _ = tx.send(StreamPart::ToolCallComplete { tool_call });
        }
        SseEvent::FinishWithToolCalls { tool_calls, usage } => {
            for tool_call in tool_calls {
                let _ = tx.send(StreamPart::ToolCallComplete { tool_call });
            }
            if let Some(usage) = usage {
                let _ = tx.send(StreamPart::Usage { usage });
            }
            let _ = tx.send(StreamPart::Finish {
                reason: FinishReason::ToolCalls,
            });
            return false;
        }
        SseEvent::Usage(usage) => {
            let _ = tx.send(StreamPart::Usage { usage });
        }
        SseEvent::Finish { reason, usage } => {
            if let Some(usage) = usage {
                let _ = tx.send(StreamPart::Usage { usage });
            }
            let _ = tx.send(StreamPart::Finish { reason });
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_frames_across_chunk_boundaries() {
        let mut buf = SseLineBuffer::new();
        assert!(buf.push(b"data: {\"a\"").is_empty());
        let payloads = buf.push(b": 1}\n\ndata: [DONE]\n");
        assert_eq!(payloads, vec![r#"{"a": 1}"#, "[DONE]"]);
    }

    #[test]
    fn line_buffer_ignores_event_lines_and_comments() {
        let mut buf = SseLineBuffer::new();
        let payloads = buf.push(b"event: message_start\r\n: keepalive\r\ndata: {}\r\n");
        assert_eq!(payloads, vec!["{}"]);
    }

    #[test]
    fn line_buffer_handles_split_utf8() {
        let mut buf = SseLineBuffer::new();
        let line = "data: {\"t\":\"héllo\"}\n".as_bytes();
        // Split inside the two-byte 'é' sequence.
        let split = line.iter().position(|&b| b == 0xc3).unwrap() + 1;
        assert!(buf.push(&line[..split]).is_empty());
        let payloads = buf.push(&line[split..]);
        assert_eq!(payloads, vec![r#"{"t":"héllo"}"#]);
    }

    #[test]
    fn accumulator_parses_complete_arguments() {
        let mut acc = ToolCallAccumulator::new("tu_1".to_string(), "read".to_string());
        acc.add_arguments(r#"{"path":"#);
        acc.add_arguments(r#""a.rs"}"#);
        let call = acc.force_complete();
        assert_eq!(call.name, "read");
        assert_eq!(call.arguments["path"], "a.rs");
    }

    #[test]
    fn accumulator_substitutes_empty_object_for_garbage() {
        let mut acc = ToolCallAccumulator::new("tu_1".to_string(), "write".to_string());
        acc.add_arguments(r#"{"path": "a.rs", "conte"#);
        let call = acc.force_complete();
        assert_eq!(call.arguments, serde_json::json!({}));
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(parse_finish_reason("end_turn"), FinishReason::Stop);
        assert_eq!(parse_finish_reason("max_tokens"), FinishReason::Length);
        assert_eq!(parse_finish_reason("tool_use"), FinishReason::ToolCalls);
        assert_eq!(
            parse_finish_reason("weird"),
            FinishReason::Other("weird".to_string())
        );
    }
}
