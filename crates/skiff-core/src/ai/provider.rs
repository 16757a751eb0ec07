//! Provider capability contract.
//!
//! A provider turns a conversation plus tool catalog into a stream of
//! [`StreamPart`]s. The two wire protocols (block-framed and
//! index-keyed deltas) are interchangeable implementations of this one
//! trait; nothing above the trait knows which is in use.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::streaming::StreamPart;
use crate::ai::types::{Message, ToolDefinition};
use crate::error::AgentError;

/// One streaming provider call.
#[derive(Debug, Clone, Copy)]
pub struct StreamRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolDefinition],
    pub system_prompt: Option<&'a str>,
    pub thinking: bool,
}

/// Connection settings shared by provider implementations.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    /// Endpoint override; each provider supplies its own default.
    pub base_url: Option<String>,
    pub model: String,
    pub max_tokens: usize,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            model: model.into(),
            max_tokens: 8192,
        }
    }
}

/// Abstraction over a model backend's streaming API.
///
/// Firing `cancel` mid-stream is a graceful interruption: the stream
/// task stops and the channel closes; it is never reported as an error.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Provider identity, used in error reporting.
    fn name(&self) -> &str;

    /// Start a streaming call. Parts arrive on the returned channel;
    /// the channel closing marks end of stream.
    async fn stream(
        &self,
        request: StreamRequest<'_>,
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<StreamPart>, AgentError>;
}
