//! Error taxonomy for the agent loop.
//!
//! Provider and session failures are the only errors that cross the
//! orchestrator boundary. Tool failures never become errors; they are
//! returned as `"[Tool Error] ..."` strings by the registry.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the agent loop and provider layer.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Upstream API failure, tagged with the provider that produced it.
    #[error("{provider} provider error: {message}")]
    Provider { provider: String, message: String },

    /// Rate limited by the provider after the backoff layer gave up.
    /// `retry_after` carries the server hint when one was sent.
    #[error("{provider} rate limited")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    /// Session could not be loaded or resolved.
    #[error("session error: {0}")]
    Session(String),
}

impl AgentError {
    /// Provider identity attached to this error, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Provider { provider, .. } | Self::RateLimited { provider, .. } => {
                Some(provider.as_str())
            }
            Self::Session(_) => None,
        }
    }
}
