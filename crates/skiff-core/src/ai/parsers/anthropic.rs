//! Parser for the block-framed Anthropic messages protocol.
//!
//! Content arrives as indexed blocks: `content_block_start` opens a
//! block at an index, `content_block_delta` extends it, and
//! `content_block_stop` closes it. Tool-call arguments and thinking
//! text are accumulated per block index until the stop event.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use serde_json::Value;

use crate::ai::sse::{
    parse_finish_reason, SseEvent, SseParser, ThinkingAccumulator, ToolCallAccumulator,
};
use crate::ai::types::Usage;

pub struct AnthropicParser {
    /// Tool calls in flight, keyed by content block index.
    tool_accumulators: Mutex<HashMap<usize, ToolCallAccumulator>>,
    /// Thinking blocks in flight, keyed by content block index.
    thinking_accumulators: Mutex<HashMap<usize, ThinkingAccumulator>>,
}

impl AnthropicParser {
    pub fn new() -> Self {
        Self {
            tool_accumulators: Mutex::new(HashMap::new()),
            thinking_accumulators: Mutex::new(HashMap::new()),
        }
    }

    fn lock_tools(&self) -> Result<std::sync::MutexGuard<'_, HashMap<usize, ToolCallAccumulator>>> {
        self.tool_accumulators
            .lock()
            .map_err(|e| anyhow::anyhow!("tool accumulators lock poisoned: {e}"))
    }

    fn lock_thinking(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<usize, ThinkingAccumulator>>> {
        self.thinking_accumulators
            .lock()
            .map_err(|e| anyhow::anyhow!("thinking accumulators lock poisoned: {e}"))
    }

    fn on_block_start(&self, index: usize, content_block: &Value) -> Result<SseEvent> {
        match content_block.get("type").and_then(|t| t.as_str()) {
            Some("tool_use") => {
                let id = str_field(content_block, "id");
                let name = str_field(content_block, "name");
                self.lock_tools()?
                    .insert(index, ToolCallAccumulator::new(id.clone(), name.clone()));
                Ok(SseEvent::ToolCallStart { id, name })
            }
            Some("thinking") => {
                self.lock_thinking()?.insert(index, ThinkingAccumulator::new());
                Ok(SseEvent::ThinkingStart { index })
            }
            Some("redacted_thinking") => Ok(SseEvent::RedactedThinking {
                data: str_field(content_block, "data"),
            }),
            _ => Ok(SseEvent::Skip),
        }
    }

    fn on_block_delta(&self, index: usize, delta: &Value) -> Result<SseEvent> {
        match delta.get("type").and_then(|t| t.as_str()) {
            Some("text_delta") => Ok(SseEvent::TextDelta(str_field(delta, "text"))),
            Some("input_json_delta") => {
                let partial = str_field(delta, "partial_json");
                let mut tools = self.lock_tools()?;
                if let Some(acc) = tools.get_mut(&index) {
                    acc.add_arguments(&partial);
                    return Ok(SseEvent::ToolCallDelta {
                        id: acc.id.clone(),
                        delta: partial,
                    });
                }
                Ok(SseEvent::Skip)
            }
            Some("thinking_delta") => {
                let thinking = str_field(delta, "thinking");
                if let Some(acc) = self.lock_thinking()?.get_mut(&index) {
                    acc.add_thinking(&thinking);
                }
                Ok(SseEvent::ThinkingDelta { index, thinking })
            }
            Some("signature_delta") => {
                let signature = str_field(delta, "signature");
                if let Some(acc) = self.lock_thinking()?.get_mut(&index) {
                    acc.add_signature(&signature);
                }
                Ok(SseEvent::SignatureDelta { index, signature })
            }
            _ => Ok(SseEvent::Skip),
        }
    }

    fn on_block_stop(&self, index: usize) -> Result<SseEvent> {
        if let Some(mut acc) = self.lock_tools()?.remove(&index) {
            return Ok(SseEvent::ToolCallComplete(acc.force_complete()));
        }

        if let Some(acc) = self.lock_thinking()?.remove(&index) {
            let (thinking, signature) = acc.complete();
            return Ok(SseEvent::ThinkingComplete {
                index,
                thinking,
                signature,
            });
        }

        Ok(SseEvent::Skip)
    }
}

#[async_trait::async_trait]
impl SseParser for AnthropicParser {
    async fn parse_event(&self, json: &Value) -> Result<SseEvent> {
        let event_type = json.get("type").and_then(|t| t.as_str()).unwrap_or("");
        let index = json.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;

        match event_type {
            "content_block_start" => match json.get("content_block") {
                Some(block) => self.on_block_start(index, block),
                None => Ok(SseEvent::Skip),
            },

            "content_block_delta" => match json.get("delta") {
                Some(delta) => self.on_block_delta(index, delta),
                None => Ok(SseEvent::Skip),
            },

            "content_block_stop" => self.on_block_stop(index),

            "message_start" => {
                // Opening usage carries the prompt token count.
                if let Some(usage) = json.get("message").and_then(|m| m.get("usage")) {
                    let prompt = u64_field(usage, "input_tokens");
                    if prompt > 0 {
                        return Ok(SseEvent::Usage(Usage {
                            prompt_tokens: prompt,
                            completion_tokens: 0,
                            total_tokens: prompt,
                        }));
                    }
                }
                Ok(SseEvent::Skip)
            }

            "message_delta" => {
                // Usage first: the final token counts ride on message_delta
                // and the finish still arrives via message_stop.
                if let Some(usage) = json.get("usage") {
                    let prompt = u64_field(usage, "input_tokens");
                    let completion = u64_field(usage, "output_tokens");
                    if prompt > 0 || completion > 0 {
                        return Ok(SseEvent::Usage(Usage {
                            prompt_tokens: prompt,
                            completion_tokens: completion,
                            total_tokens: prompt + completion,
                        }));
                    }
                }

                if let Some(reason) = json
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(|s| s.as_str())
                {
                    return Ok(SseEvent::Finish {
                        reason: parse_finish_reason(reason),
                        usage: None,
                    });
                }

                Ok(SseEvent::Skip)
            }

            "message_stop" => Ok(SseEvent::Finish {
                reason: crate::ai::types::FinishReason::Stop,
                usage: None,
            }),

            "error" => {
                let message = json
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error");
                Err(anyhow::anyhow!("API error: {message}"))
            }

            _ => Ok(SseEvent::Skip),
        }
    }
}

impl Default for AnthropicParser {
    fn default() -> Self {
        Self::new()
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn u64_field(value: &Value, key: &str) -> usize {
    value.get(key).and_then(|v| v.as_u64()).unwrap_or(0) as usize
}
