//! Event protocol for the agent loop.
//!
//! `LoopEvent` is everything the orchestrator emits. Events are
//! fire-and-forget: the loop never blocks on, or fails because of, a
//! consumer. Hosts map them to their own presentation.

use serde::Serialize;
use tokio::sync::mpsc;

/// Events emitted by the agent loop, one variant per state change.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// A session was created or resumed for this run.
    SessionStart { session_id: String },

    /// A loop iteration began.
    IterationStart { iteration: usize },

    /// Text content delta from the model.
    TextDelta { delta: String },

    /// Extended thinking delta.
    ThinkingDelta { delta: String },

    /// A thinking block completed.
    ThinkingEnd { thinking: String, signature: String },

    /// A tool use started: emitted when the model begins streaming the
    /// call, and again when the scheduler starts executing it.
    ToolUseStart { id: String, name: String },

    /// Partial tool-call argument JSON from the model.
    ToolInputDelta { id: String, delta: String },

    /// A tool finished (or was denied/skipped) with its result.
    ToolResult {
        id: String,
        output: String,
        is_error: bool,
    },

    /// The provider stream for this iteration ended.
    StreamEnd { iteration: usize },

    /// Token usage for this turn.
    Usage {
        prompt_tokens: usize,
        completion_tokens: usize,
    },

    /// An incomplete tool batch triggered a corrective retry.
    Retry { attempt: usize, missing: Vec<String> },

    /// Old history was replaced with a summary.
    Compact { before: usize, after: usize },

    /// The run finished.
    Complete {
        session_id: String,
        iterations: usize,
    },

    /// The run failed.
    Error { error: String },

    /// The abort token fired; the interrupted turn was discarded.
    Interrupted { session_id: String },
}

/// Sender half of the event channel handed to `run`.
pub type EventSender = mpsc::UnboundedSender<LoopEvent>;
