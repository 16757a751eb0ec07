//! Incomplete tool-call detection and the corrective retry protocol.
//!
//! Streaming cutoffs produce tool calls whose required parameters are
//! absent, null, or empty. Those are not errors: the turn is discarded
//! and the model is asked to re-issue the calls, up to a bounded number
//! of attempts. Past the bound the batch degrades to synthetic results
//! instead of failing the run.

use std::collections::HashMap;

use serde_json::Value;

use crate::ai::types::{Content, Message, ToolCall};

/// Corrective retries before a batch degrades to synthetic results.
pub const DEFAULT_MAX_TOOL_RETRIES: usize = 2;

/// Retry counter for one run. Resets on every cleanly-validated batch.
#[derive(Debug, Default)]
pub(crate) struct RetryState {
    pub count: usize,
}

/// One tool call flagged incomplete, with the parameters it is missing.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IncompleteCall {
    pub tool_use_id: String,
    pub tool_name: String,
    pub missing: Vec<String>,
}

/// Check every call in the batch against the required-parameter table.
pub(crate) fn find_incomplete_calls(
    calls: &[ToolCall],
    required: &HashMap<String, Vec<String>>,
) -> Vec<IncompleteCall> {
    let mut incomplete = Vec::new();

    for call in calls {
        let Some(params) = required.get(&call.name) else {
            continue;
        };

        let missing: Vec<String> = params
            .iter()
            .filter(|param| is_missing(&call.arguments, param))
            .cloned()
            .collect();

        if !missing.is_empty() {
            incomplete.push(IncompleteCall {
                tool_use_id: call.id.clone(),
                tool_name: call.name.clone(),
                missing,
            });
        }
    }

    incomplete
}

/// A parameter is missing if it is absent, null, or an empty string.
/// Non-object arguments (a truncated stream parses to nothing useful)
/// mean every required parameter is missing.
fn is_missing(arguments: &Value, param: &str) -> bool {
    if !arguments.is_object() {
        return true;
    }
    match arguments.get(param) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// Corrective user-role instruction naming the missing parameters.
/// Wording escalates from the second attempt and adds size-limit
/// guidance, since repeated truncation usually means oversized values.
pub(crate) fn corrective_message(incomplete: &[IncompleteCall], attempt: usize) -> Message {
    let mut listing = String::new();
    for call in incomplete {
        listing.push_str(&format!(
            "- `{}` is missing: {}\n",
            call.tool_name,
            call.missing
                .iter()
                .map(|p| format!("`{p}`"))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    let text = if attempt <= 1 {
        format!(
            "Your tool calls were incomplete — required parameters were \
             missing or empty:\n{listing}\
             Re-issue the affected tool calls with every required parameter \
             filled in."
        )
    } else {
        format!(
            "IMPORTANT: your tool calls are STILL incomplete after a retry:\n{listing}\
             This usually means a parameter value was too large and the call \
             was cut off. Re-issue the calls with ALL required parameters, \
             and keep each parameter small — split large writes into several \
             smaller calls if needed."
        )
    };

    Message::user(text)
}

/// Synthetic results for a batch abandoned after exhausting retries.
///
/// Flagged calls get error results; calls that were complete get neutral
/// results, so every tool-use id still receives exactly one tool result
/// and the next provider call stays protocol-valid.
pub(crate) fn degraded_results(
    calls: &[ToolCall],
    incomplete: &[IncompleteCall],
    retries: usize,
) -> Vec<Content> {
    calls
        .iter()
        .map(|call| {
            let flagged = incomplete.iter().find(|c| c.tool_use_id == call.id);
            match flagged {
                Some(c) => Content::ToolResult {
                    tool_use_id: call.id.clone(),
                    output: Value::String(format!(
                        "skipped after {retries} retries: required parameters still missing ({})",
                        c.missing.join(", ")
                    )),
                    is_error: Some(true),
                },
                None => Content::ToolResult {
                    tool_use_id: call.id.clone(),
                    output: Value::String(
                        "not executed: the batch was abandoned after repeated incomplete tool calls"
                            .to_string(),
                    ),
                    is_error: None,
                },
            }
        })
        .collect()
}
