//! Stream processing for the agent loop.
//!
//! Consumes [`StreamPart`]s from a provider call, accumulates the turn,
//! and emits loop events as fragments arrive. Cancellation here is a
//! graceful interruption, never a failure.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::loop_events::{EventSender, LoopEvent};
use crate::ai::streaming::StreamPart;
use crate::ai::types::{ToolCall, Usage};

/// Give up if the provider sends nothing for this long.
const STREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// Accumulated thinking block from the turn.
#[derive(Debug, Clone)]
pub(crate) struct ThinkingBlock {
    pub thinking: String,
    pub signature: String,
}

/// Everything one provider call produced.
#[derive(Debug, Default)]
pub(crate) struct StreamResult {
    pub text: String,
    pub thinking_blocks: Vec<ThinkingBlock>,
    pub redacted_blocks: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

/// How one provider stream ended.
pub(crate) enum StreamOutcome {
    Completed(Box<StreamResult>),
    /// The abort token fired mid-stream; the turn is discarded.
    Interrupted,
    /// The stream failed; the round fails with it.
    Failed(String),
}

/// Drain a provider stream, forwarding loop events for each fragment.
pub(crate) async fn process_stream(
    mut rx: mpsc::UnboundedReceiver<StreamPart>,
    events: &EventSender,
    cancel: &CancellationToken,
) -> StreamOutcome {
    let mut result = StreamResult::default();

    loop {
        let part = tokio::select! {
            _ = cancel.cancelled() => return StreamOutcome::Interrupted,
            recv = tokio::time::timeout(STREAM_TIMEOUT, rx.recv()) => match recv {
                Ok(Some(part)) => part,
                Ok(None) => break,
                Err(_) => {
                    return StreamOutcome::Failed(format!(
                        "provider stream stalled: no data for {} seconds",
                        STREAM_TIMEOUT.as_secs()
                    ));
                }
            },
        };

        match part {
            StreamPart::TextDelta { delta } => {
                result.text.push_str(&delta);
                let _ = events.send(LoopEvent::TextDelta { delta });
            }
            StreamPart::ThinkingDelta { delta } => {
                let _ = events.send(LoopEvent::ThinkingDelta { delta });
            }
            StreamPart::ThinkingComplete {
                thinking,
                signature,
            } => {
                result.thinking_blocks.push(ThinkingBlock {
                    thinking: thinking.clone(),
                    signature: signature.clone(),
                });
                let _ = events.send(LoopEvent::ThinkingEnd {
                    thinking,
                    signature,
                });
            }
            StreamPart::RedactedThinking { data } => {
                result.redacted_blocks.push(data);
            }
            StreamPart::ToolCallStart { id, name } => {
                let _ = events.send(LoopEvent::ToolUseStart { id, name });
            }
            StreamPart::ToolCallDelta { id, delta } => {
                let _ = events.send(LoopEvent::ToolInputDelta { id, delta });
            }
            StreamPart::ToolCallComplete { tool_call } => {
                result.tool_calls.push(tool_call);
            }
            StreamPart::Usage { usage } => {
                let _ = events.send(LoopEvent::Usage {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                });
                result.usage = usage;
            }
            StreamPart::Finish { .. } => {
                // End of generation; the channel closing ends the loop.
            }
            StreamPart::Error { error } => {
                return StreamOutcome::Failed(error);
            }
        }
    }

    StreamOutcome::Completed(Box::new(result))
}
