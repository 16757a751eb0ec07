//! Provider implementations.

mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

use std::time::Duration;

use crate::ai::retry::HttpFailure;

/// Send a request and reject non-success statuses as [`HttpFailure`]s,
/// capturing the `Retry-After` hint when the server sent one.
pub(crate) async fn send_checked(
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, HttpFailure> {
    let response = request.send().await.map_err(HttpFailure::transport)?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(HttpFailure {
        status: Some(status.as_u16()),
        message: format!("{status}: {body}"),
        retry_after,
    })
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Filler role needed to keep strict user/assistant alternation.
///
/// The loop legitimately produces consecutive user messages (a
/// corrective retry instruction follows a discarded assistant turn), and
/// both wire protocols reject that.
pub(crate) fn alternation_filler(last: Option<&str>, current: &str) -> Option<&'static str> {
    match last {
        Some(prev) if prev == current => Some(if current == "user" { "assistant" } else { "user" }),
        _ => None,
    }
}
