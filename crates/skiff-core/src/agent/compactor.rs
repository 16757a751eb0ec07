//! Message compaction.
//!
//! When the estimated token footprint of the conversation exceeds the
//! budget, everything older than the most recent K messages is replaced
//! with one synthetic user message summarizing what was dropped. Under
//! budget, the input is returned untouched — same allocation, no copy —
//! and callers rely on that.

use crate::ai::types::{Content, Message, Role};

/// Characters per token, the usual rough estimate.
const CHARS_PER_TOKEN: usize = 4;
/// Summary excerpt length per elided message.
const EXCERPT_CHARS: usize = 100;

/// Compaction thresholds.
#[derive(Debug, Clone)]
pub struct CompactionPolicy {
    /// Token estimate above which compaction triggers.
    pub token_budget: usize,
    /// Messages kept verbatim at the tail.
    pub keep_recent: usize,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            token_budget: 120_000,
            keep_recent: 10,
        }
    }
}

/// Rough token estimate for a message list.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    let chars: usize = messages.iter().map(message_chars).sum();
    chars / CHARS_PER_TOKEN
}

fn message_chars(message: &Message) -> usize {
    message
        .content
        .iter()
        .map(|block| match block {
            Content::Text { text } => text.len(),
            Content::Thinking { thinking, .. } => thinking.len(),
            Content::RedactedThinking { data } => data.len(),
            Content::ToolUse { input, .. } => input.to_string().len(),
            Content::ToolResult { output, .. } => match output {
                serde_json::Value::String(s) => s.len(),
                other => other.to_string().len(),
            },
        })
        .sum()
}

/// Compact the conversation if it exceeds the policy's budget.
///
/// Over budget: returns `[summary, ...last keep_recent]`. Under budget
/// (or too short to compact): returns the input vector unchanged.
pub fn compact(messages: Vec<Message>, policy: &CompactionPolicy) -> Vec<Message> {
    if messages.len() <= policy.keep_recent || estimate_tokens(&messages) <= policy.token_budget {
        return messages;
    }

    let split = messages.len() - policy.keep_recent;
    let (old, recent) = messages.split_at(split);

    let mut compacted = Vec::with_capacity(policy.keep_recent + 1);
    compacted.push(summarize(old));
    compacted.extend_from_slice(recent);
    compacted
}

fn summarize(old: &[Message]) -> Message {
    let mut summary = format!(
        "Earlier conversation ({} messages) condensed to stay within the context budget:\n",
        old.len()
    );

    for message in old {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let text = message.text();
        let excerpt: String = if text.is_empty() {
            describe_blocks(message)
        } else {
            text.chars().take(EXCERPT_CHARS).collect()
        };
        summary.push_str(&format!("- {role}: {excerpt}\n"));
    }

    Message::user(summary)
}

fn describe_blocks(message: &Message) -> String {
    let mut kinds: Vec<&str> = Vec::new();
    for block in &message.content {
        let kind = match block {
            Content::Text { .. } => "text",
            Content::Thinking { .. } | Content::RedactedThinking { .. } => "thinking",
            Content::ToolUse { .. } => "tool use",
            Content::ToolResult { .. } => "tool results",
        };
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    format!("[{}]", kinds.join(", "))
}
