//! Tool batch execution: ordering policy and permission gating.
//!
//! Sequential mode runs calls in original order, one at a time. Parallel
//! mode fans out everything except `bash` concurrently, then runs `bash`
//! calls serially in their original relative order — shell commands can
//! mutate the same filesystem the file tools touch, so they are deferred
//! and serialized rather than interleaved. Either way, results are
//! reassembled into the original block order before they reach the model.

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info};

use crate::agent::context::RunContext;
use crate::agent::loop_events::{EventSender, LoopEvent};
use crate::ai::types::{Content, ToolCall};
use crate::tools::registry::{ToolOutput, ToolRegistry};

/// Tool output larger than this is truncated before reaching the model.
const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;

/// Execute one turn's tool batch and return results in block order.
pub(crate) async fn execute_batch(
    calls: &[ToolCall],
    registry: &ToolRegistry,
    ctx: &RunContext,
    parallel: bool,
    events: &EventSender,
) -> Vec<Content> {
    if !parallel || calls.len() <= 1 {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(run_one(call, registry, ctx, events).await);
        }
        return results;
    }

    let (bash_indices, other_indices): (Vec<usize>, Vec<usize>) =
        (0..calls.len()).partition(|&i| calls[i].name == "bash");

    info!(
        concurrent = other_indices.len(),
        deferred_bash = bash_indices.len(),
        "executing tool batch in parallel"
    );

    // Fan out the non-bash calls; completion order is irrelevant because
    // results carry their original index.
    let futures: Vec<_> = other_indices
        .into_iter()
        .map(|i| {
            let call = &calls[i];
            async move { (i, run_one(call, registry, ctx, events).await) }
        })
        .collect();
    let mut indexed: Vec<(usize, Content)> = join_all(futures).await;

    // Bash only after every concurrent call has finished.
    for i in bash_indices {
        let result = run_one(&calls[i], registry, ctx, events).await;
        indexed.push((i, result));
    }

    indexed.sort_by_key(|(i, _)| *i);
    indexed.into_iter().map(|(_, result)| result).collect()
}

/// Gate and execute a single call, emitting start/result events.
async fn run_one(
    call: &ToolCall,
    registry: &ToolRegistry,
    ctx: &RunContext,
    events: &EventSender,
) -> Content {
    let _ = events.send(LoopEvent::ToolUseStart {
        id: call.id.clone(),
        name: call.name.clone(),
    });

    let result = gated_execute(call, registry, ctx).await;
    let output = truncate_output(&result.output);

    let _ = events.send(LoopEvent::ToolResult {
        id: call.id.clone(),
        output: output.clone(),
        is_error: result.is_error,
    });

    Content::ToolResult {
        tool_use_id: call.id.clone(),
        output: Value::String(output),
        is_error: if result.is_error { Some(true) } else { None },
    }
}

/// Apply the permission gate, then execute.
///
/// A call that requires confirmation goes through the host's hook; a
/// `false` resolution becomes a denial result instead of an execution.
/// With no hook installed the decision falls through to allow — the
/// gate decides, the host enforces.
async fn gated_execute(call: &ToolCall, registry: &ToolRegistry, ctx: &RunContext) -> ToolOutput {
    if ctx.requires_confirmation(&call.name, &call.arguments) {
        if let Some(hook) = &ctx.confirm_hook {
            if !hook.before_tool_execute(&call.name, &call.arguments).await {
                info!(tool = %call.name, id = %call.id, "tool execution denied");
                return ToolOutput {
                    output: "Tool execution denied by user".to_string(),
                    is_error: true,
                };
            }
        } else {
            debug!(tool = %call.name, "confirmation required but no hook installed; allowing");
        }
    }

    registry
        .execute(&call.name, call.arguments.clone(), ctx)
        .await
}

pub(crate) fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }

    let truncated_len = floor_char_boundary(output, MAX_TOOL_OUTPUT_CHARS);
    let truncated = &output[..truncated_len];
    let break_point = truncated.rfind('\n').unwrap_or(truncated_len);
    let clean = &output[..break_point];
    format!(
        "{}\n\n[... output truncated: {} chars -> {} chars ...]",
        clean,
        output.len(),
        clean.len()
    )
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut boundary = index.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}
