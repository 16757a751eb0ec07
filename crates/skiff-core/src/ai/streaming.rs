//! Stream parts emitted by providers.
//!
//! Every provider, regardless of its wire protocol, is reduced to this
//! one sequence of parts. The agent loop consumes parts without knowing
//! which protocol produced them.

use crate::ai::types::{FinishReason, ToolCall, Usage};

/// One fragment of a streaming provider response.
#[derive(Debug, Clone)]
pub enum StreamPart {
    /// Text content delta.
    TextDelta { delta: String },

    /// Extended thinking delta.
    ThinkingDelta { delta: String },

    /// A thinking block finished accumulating.
    ThinkingComplete { thinking: String, signature: String },

    /// Redacted thinking block (opaque, passed back verbatim).
    RedactedThinking { data: String },

    /// The model started emitting a tool call; arguments follow as deltas.
    ToolCallStart { id: String, name: String },

    /// Partial tool-call argument JSON.
    ToolCallDelta { id: String, delta: String },

    /// A tool call finished accumulating with parsed arguments.
    ToolCallComplete { tool_call: ToolCall },

    /// Token usage reported by the provider.
    Usage { usage: Usage },

    /// Generation finished.
    Finish { reason: FinishReason },

    /// The stream failed mid-flight.
    Error { error: String },
}
