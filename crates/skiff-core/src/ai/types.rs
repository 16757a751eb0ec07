//! Provider-facing message types.
//!
//! These are wire-level types shared by all providers, not domain types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool definition sent to the provider alongside the conversation.
///
/// `required_params` is consumed by the tool-call validator; it is not
/// part of any provider wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    #[serde(default)]
    pub required_params: Vec<String>,
}

/// A fully accumulated tool call from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Content blocks that can appear in a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text {
        text: String,
    },

    /// Extended thinking block.
    Thinking {
        thinking: String,
        signature: String,
    },

    /// Thinking the provider redacted; the opaque payload must be
    /// passed back verbatim on subsequent calls.
    RedactedThinking {
        data: String,
    },

    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    ToolResult {
        tool_use_id: String,
        output: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<Content>,
}

impl Message {
    /// Plain-text user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![Content::Text { text: text.into() }],
        }
    }

    /// Concatenated text blocks of this message.
    pub fn text(&self) -> String {
        let mut combined = String::new();
        for block in &self.content {
            if let Content::Text { text } = block {
                if !combined.is_empty() {
                    combined.push('\n');
                }
                combined.push_str(text);
            }
        }
        combined
    }

    /// Tool-use blocks of this message, in order.
    pub fn tool_uses(&self) -> Vec<&Content> {
        self.content
            .iter()
            .filter(|c| matches!(c, Content::ToolUse { .. }))
            .collect()
    }
}

/// Finish reasons for model generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

/// Token usage for one provider call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_serializes_with_type_tag() {
        let block = Content::ToolUse {
            id: "tu_1".to_string(),
            name: "read".to_string(),
            input: json!({"path": "src/main.rs"}),
        };
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "tool_use");
        assert_eq!(value["name"], "read");
    }

    #[test]
    fn tool_result_omits_absent_error_flag() {
        let block = Content::ToolResult {
            tool_use_id: "tu_1".to_string(),
            output: json!("ok"),
            is_error: None,
        };
        let value = serde_json::to_value(&block).unwrap();
        assert!(value.get("is_error").is_none());
    }

    #[test]
    fn message_text_joins_blocks() {
        let msg = Message {
            role: Role::Assistant,
            content: vec![
                Content::Text {
                    text: "one".to_string(),
                },
                Content::Thinking {
                    thinking: "hidden".to_string(),
                    signature: String::new(),
                },
                Content::Text {
                    text: "two".to_string(),
                },
            ],
        };
        assert_eq!(msg.text(), "one\ntwo");
    }
}
