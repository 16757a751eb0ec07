//! Parser for the index-keyed OpenAI chat/completions protocol.
//!
//! Tool calls arrive as incremental deltas keyed by their position in
//! the `tool_calls` array; nothing marks an individual call finished.
//! Calls are drained, in first-seen order, when `finish_reason` lands.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use serde_json::Value;

use crate::ai::sse::{SseEvent, SseParser, ToolCallAccumulator};
use crate::ai::types::{FinishReason, ToolCall, Usage};

pub struct OpenAiParser {
    /// Tool calls in flight, keyed by array index.
    tool_accumulators: Mutex<HashMap<usize, ToolCallAccumulator>>,
    /// First-seen order of indices, for deterministic completion.
    tool_order: Mutex<Vec<usize>>,
}

impl OpenAiParser {
    pub fn new() -> Self {
        Self {
            tool_accumulators: Mutex::new(HashMap::new()),
            tool_order: Mutex::new(Vec::new()),
        }
    }

    fn lock_tools(&self) -> Result<std::sync::MutexGuard<'_, HashMap<usize, ToolCallAccumulator>>> {
        self.tool_accumulators
            .lock()
            .map_err(|e| anyhow::anyhow!("tool accumulators lock poisoned: {e}"))
    }

    fn lock_order(&self) -> Result<std::sync::MutexGuard<'_, Vec<usize>>> {
        self.tool_order
            .lock()
            .map_err(|e| anyhow::anyhow!("tool order lock poisoned: {e}"))
    }

    fn drain_tool_calls(&self) -> Result<Vec<ToolCall>> {
        let order = std::mem::take(&mut *self.lock_order()?);
        let mut accumulators = self.lock_tools()?;

        let mut calls = Vec::new();
        for index in order {
            if let Some(mut acc) = accumulators.remove(&index) {
                calls.push(acc.force_complete());
            }
        }
        for (_, mut acc) in accumulators.drain() {
            calls.push(acc.force_complete());
        }
        Ok(calls)
    }

    fn on_tool_call_delta(&self, tool_call: &Value) -> Result<Option<SseEvent>> {
        let index = tool_call.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
        let Some(function) = tool_call.get("function") else {
            return Ok(None);
        };

        let mut started: Option<SseEvent> = None;

        if let Some(name) = function.get("name").and_then(|n| n.as_str()) {
            let id = tool_call
                .get("id")
                .and_then(|i| i.as_str())
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("call-{index}"));

            let mut tools = self.lock_tools()?;
            if !tools.contains_key(&index) {
                tools.insert(index, ToolCallAccumulator::new(id.clone(), name.to_string()));
                self.lock_order()?.push(index);
                started = Some(SseEvent::ToolCallStart {
                    id,
                    name: name.to_string(),
                });
            }
        }

        if let Some(args) = function.get("arguments").and_then(|a| a.as_str()) {
            let mut tools = self.lock_tools()?;
            if let Some(acc) = tools.get_mut(&index) {
                acc.add_arguments(args);
                if started.is_none() {
                    return Ok(Some(SseEvent::ToolCallDelta {
                        id: acc.id.clone(),
                        delta: args.to_string(),
                    }));
                }
            }
        }

        Ok(started)
    }

    fn on_finish(&self, reason: &str) -> Result<SseEvent> {
        if reason == "tool_calls" {
            let tool_calls = self.drain_tool_calls()?;
            if !tool_calls.is_empty() {
                return Ok(SseEvent::FinishWithToolCalls {
                    tool_calls,
                    usage: None,
                });
            }
            return Ok(SseEvent::Finish {
                reason: FinishReason::ToolCalls,
                usage: None,
            });
        }

        Ok(SseEvent::Finish {
            reason: crate::ai::sse::parse_finish_reason(reason),
            usage: None,
        })
    }
}

#[async_trait::async_trait]
impl SseParser for OpenAiParser {
    async fn parse_event(&self, json: &Value) -> Result<SseEvent> {
        // {"error": {"message": ..., "type": ...}}
        if let Some(error) = json.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            return Err(anyhow::anyhow!("API error: {message}"));
        }

        if let Some(choice) = json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
        {
            if let Some(reason) = choice.get("finish_reason").and_then(|r| r.as_str()) {
                return self.on_finish(reason);
            }

            if let Some(delta) = choice.get("delta") {
                if let Some(content) = delta.get("content").and_then(|c| c.as_str()) {
                    if !content.is_empty() {
                        return Ok(SseEvent::TextDelta(content.to_string()));
                    }
                }

                // Reasoning-model thinking rides in a side channel.
                if let Some(reasoning) = delta.get("reasoning_content").and_then(|r| r.as_str()) {
                    if !reasoning.is_empty() {
                        return Ok(SseEvent::ThinkingDelta {
                            index: 0,
                            thinking: reasoning.to_string(),
                        });
                    }
                }

                if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
                    for tool_call in tool_calls {
                        if let Some(event) = self.on_tool_call_delta(tool_call)? {
                            return Ok(event);
                        }
                    }
                }
            }
        }

        // Usage arrives on the final chunk with an empty choices array.
        if let Some(usage) = json.get("usage") {
            let prompt = usage
                .get("prompt_tokens")
                .and_then(|t| t.as_u64())
                .unwrap_or(0) as usize;
            let completion = usage
                .get("completion_tokens")
                .and_then(|t| t.as_u64())
                .unwrap_or(0) as usize;
            if prompt > 0 || completion > 0 {
                return Ok(SseEvent::Usage(Usage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: prompt + completion,
                }));
            }
        }

        Ok(SseEvent::Skip)
    }
}

impl Default for OpenAiParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn assembles_interleaved_tool_calls_by_index() {
        let parser = OpenAiParser::new();

        let start_a = json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "call_a", "function": {"name": "read", "arguments": ""}}
        ]}}]});
        let start_b = json!({"choices": [{"delta": {"tool_calls": [
            {"index": 1, "id": "call_b", "function": {"name": "grep", "arguments": ""}}
        ]}}]});
        let delta_b = json!({"choices": [{"delta": {"tool_calls": [
            {"index": 1, "function": {"arguments": "{\"pattern\":\"fn\"}"}}
        ]}}]});
        let delta_a = json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "{\"path\":\"a.rs\"}"}}
        ]}}]});
        let finish = json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]});

        for event in [&start_a, &start_b, &delta_b, &delta_a] {
            parser.parse_event(event).await.unwrap();
        }

        match parser.parse_event(&finish).await.unwrap() {
            SseEvent::FinishWithToolCalls { tool_calls, .. } => {
                assert_eq!(tool_calls.len(), 2);
                // First-seen order, not completion order.
                assert_eq!(tool_calls[0].id, "call_a");
                assert_eq!(tool_calls[0].arguments["path"], "a.rs");
                assert_eq!(tool_calls[1].id, "call_b");
                assert_eq!(tool_calls[1].arguments["pattern"], "fn");
            }
            other => panic!("expected tool calls at finish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn text_deltas_pass_through() {
        let parser = OpenAiParser::new();
        let event = parser
            .parse_event(&json!({"choices": [{"delta": {"content": "hello"}}]}))
            .await
            .unwrap();
        assert!(matches!(event, SseEvent::TextDelta(t) if t == "hello"));
    }

    #[tokio::test]
    async fn stop_without_tool_calls_finishes_clean() {
        let parser = OpenAiParser::new();
        let event = parser
            .parse_event(&json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}))
            .await
            .unwrap();
        assert!(matches!(
            event,
            SseEvent::Finish {
                reason: FinishReason::Stop,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn usage_chunk_is_reported() {
        let parser = OpenAiParser::new();
        let event = parser
            .parse_event(&json!({"choices": [], "usage": {"prompt_tokens": 7, "completion_tokens": 3}}))
            .await
            .unwrap();
        assert!(matches!(event, SseEvent::Usage(u) if u.total_tokens == 10));
    }

    #[tokio::test]
    async fn api_error_propagates() {
        let parser = OpenAiParser::new();
        let result = parser
            .parse_event(&json!({"error": {"message": "context length exceeded"}}))
            .await;
        assert!(result.is_err());
    }
}
