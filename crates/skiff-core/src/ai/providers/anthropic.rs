//! Anthropic messages API provider (block-framed streaming protocol).

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{alternation_filler, send_checked};
use crate::ai::parsers::AnthropicParser;
use crate::ai::provider::{Provider, ProviderConfig, StreamRequest};
use crate::ai::retry::{with_retry, RetryConfig};
use crate::ai::sse::spawn_sse_stream;
use crate::ai::streaming::StreamPart;
use crate::ai::types::{Content, Message, Role, ToolDefinition};
use crate::error::AgentError;

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const THINKING_BUDGET_TOKENS: u32 = 8192;

pub struct AnthropicProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    retry: RetryConfig,
}

impl AnthropicProvider {
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
        let mut body = json!({
            "model": self.config.model,
            "messages": convert_messages(request.messages),
            "max_tokens": self.config.max_tokens,
            "stream": true,
        });

        if let Some(system) = request.system_prompt {
            body["system"] = json!(system);
        }

        if !request.tools.is_empty() {
            body["tools"] = json!(convert_tools(request.tools));
        }

        if request.thinking {
            body["thinking"] = json!({
                "type": "enabled",
                "budget_tokens": THINKING_BUDGET_TOKENS,
            });
        }

        body
    }
}

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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
            "anthropic streaming call"
        );

        let response = with_retry(&self.retry, "anthropic messages", || {
            let req = self
                .client
                .post(self.api_url())
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", API_VERSION)
                .json(&body);
            async move { send_checked(req).await }
        })
        .await
        .map_err(|failure| failure.into_agent_error("anthropic"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_sse_stream(
            response.bytes_stream(),
            AnthropicParser::new(),
            tx,
            cancel,
            "anthropic",
        );
        Ok(rx)
    }
}

/// Convert conversation messages to the Anthropic wire format,
/// inserting filler turns where alternation would break.
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(messages.len());
    let mut last_role: Option<&str> = None;

    for message in messages {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };

        if let Some(filler) = alternation_filler(last_role, role) {
            out.push(json!({
                "role": filler,
                "content": [{"type": "text", "text": "."}],
            }));
        }

        let content: Vec<Value> = message.content.iter().map(convert_content).collect();
        out.push(json!({ "role": role, "content": content }));
        last_role = Some(role);
    }

    out
}

fn convert_content(block: &Content) -> Value {
    match block {
        Content::Text { text } => json!({"type": "text", "text": text}),
        Content::Thinking {
            thinking,
            signature,
        } => json!({
            "type": "thinking",
            "thinking": thinking,
            "signature": signature,
        }),
        Content::RedactedThinking { data } => json!({
            "type": "redacted_thinking",
            "data": data,
        }),
        Content::ToolUse { id, name, input } => json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        }),
        Content::ToolResult {
            tool_use_id,
            output,
            is_error,
        } => json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": output,
            "is_error": is_error.unwrap_or(false),
        }),
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema,
            })
        })
        .collect()
}
