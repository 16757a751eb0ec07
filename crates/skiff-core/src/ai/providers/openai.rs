//! OpenAI chat/completions provider (index-keyed delta protocol).
//!
//! Tool results become `role: "tool"` entries and assistant tool uses
//! become `tool_calls`; thinking blocks are preserved as bracketed text
//! so reasoning context survives round trips through this format.

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{alternation_filler, send_checked};
use crate::ai::parsers::OpenAiParser;
use crate::ai::provider::{Provider, ProviderConfig, StreamRequest};
use crate::ai::retry::{with_retry, RetryConfig};
use crate::ai::sse::spawn_sse_stream;
use crate::ai::streaming::StreamPart;
use crate::ai::types::{Content, Message, Role, ToolDefinition};
use crate::error::AgentError;

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    retry: RetryConfig,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            retry: RetryConfig::default(),
        }
    }

    fn api_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    fn build_body(&self, request: &StreamRequest<'_>) -> Value {
        let mut messages = convert_messages(request.messages);
        if let Some(system) = request.system_prompt {
            messages.insert(0, json!({"role": "system", "content": system}));
        }

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        if !request.tools.is_empty() {
            body["tools"] = json!(convert_tools(request.tools));
        }

        body
    }
}

#[async_trait::async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream(
        &self,
        request: StreamRequest<'_>,
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<StreamPart>, AgentError> {
        let body = self.build_body(&request);
        info!(
            model = %self.config.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "openai streaming call"
        );

        let response = with_retry(&self.retry, "openai chat/completions", || {
            let req = self
                .client
                .post(self.api_url())
                .bearer_auth(&self.config.api_key)
                .json(&body);
            async move { send_checked(req).await }
        })
        .await
        .map_err(|failure| failure.into_agent_error("openai"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_sse_stream(
            response.bytes_stream(),
            OpenAiParser::new(),
            tx,
            cancel,
            "openai",
        );
        Ok(rx)
    }
}

fn convert_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(messages.len());
    let mut last_role: Option<&str> = None;

    for message in messages {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };

        // Tool results become standalone role:"tool" entries.
        let has_results = message
            .content
            .iter()
            .any(|c| matches!(c, Content::ToolResult { .. }));
        if has_results {
            for block in &message.content {
                if let Content::ToolResult {
                    tool_use_id,
                    output,
                    ..
                } = block
                {
                    let output_str = match output {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    out.push(json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": output_str,
                    }));
                }
            }
            last_role = Some("tool");
            continue;
        }

        if let Some(filler) = alternation_filler(last_role, role) {
            out.push(json!({"role": filler, "content": "."}));
        }

        let has_tool_use = message
            .content
            .iter()
            .any(|c| matches!(c, Content::ToolUse { .. }));

        if has_tool_use && message.role == Role::Assistant {
            let mut tool_calls = Vec::new();
            let mut text = String::new();

            for block in &message.content {
                match block {
                    Content::Text { text: t } => text.push_str(t),
                    Content::Thinking { thinking, .. } => {
                        if !thinking.is_empty() {
                            if !text.is_empty() {
                                text.push_str("\n\n");
                            }
                            text.push_str(&format!("[Thinking]\n{thinking}\n[/Thinking]"));
                        }
                    }
                    Content::ToolUse { id, name, input } => {
                        tool_calls.push(json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            },
                        }));
                    }
                    _ => {}
                }
            }

            let mut entry = json!({"role": "assistant", "tool_calls": tool_calls});
            if !text.is_empty() {
                entry["content"] = json!(text);
            }
            out.push(entry);
            last_role = Some(role);
            continue;
        }

        let mut parts: Vec<String> = Vec::new();
        for block in &message.content {
            match block {
                Content::Text { text } => {
                    if !text.is_empty() {
                        parts.push(text.clone());
                    }
                }
                Content::Thinking { thinking, .. } => {
                    if !thinking.is_empty() {
                        parts.push(format!("[Thinking]\n{thinking}\n[/Thinking]"));
                    }
                }
                _ => {}
            }
        }

        let text = parts.join("\n\n");
        if !text.is_empty() {
            out.push(json!({"role": role, "content": text}));
            last_role = Some(role);
        }
    }

    out
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                },
            })
        })
        .collect()
}
