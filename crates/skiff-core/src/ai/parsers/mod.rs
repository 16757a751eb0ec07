//! Protocol-specific SSE parsers.

mod anthropic;
mod openai;

pub use anthropic::AnthropicParser;
pub use openai::OpenAiParser;
