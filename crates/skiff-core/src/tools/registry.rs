//! Tool registry.
//!
//! Maps tool names to handlers and owns the required-parameter table
//! the validator consumes. Recoverable tool failures are returned as
//! `"[Tool Error] ..."` strings by handlers themselves; only genuinely
//! unexpected failures may come back as `Err`, and the registry wraps
//! those into the same string form before anything upstream sees them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tracing::{info, warn};

use crate::agent::context::RunContext;
use crate::ai::types::ToolDefinition;

/// Default tool execution timeout.
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);
/// Hard ceiling no per-call request can exceed.
const HARD_TOOL_TIMEOUT: Duration = Duration::from_secs(600);

/// Prefix marking a recoverable tool failure.
pub const TOOL_ERROR_PREFIX: &str = "[Tool Error]";

/// Outcome of one tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub output: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            output: format!("{TOOL_ERROR_PREFIX} {message}"),
            is_error: true,
        }
    }
}

/// Trait for tool implementations.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (id).
    fn name(&self) -> &str;

    /// Tool description for the model.
    fn description(&self) -> &str;

    /// JSON schema for parameters.
    fn input_schema(&self) -> Value;

    /// Parameters the model must always supply. Consumed by the
    /// incomplete-call validator, not sent to providers.
    fn required_params(&self) -> Vec<String> {
        Vec::new()
    }

    /// Execute the tool. Recoverable failures are returned as
    /// `"[Tool Error] ..."` strings, never as `Err`.
    async fn execute(&self, input: Value, ctx: &RunContext) -> Result<String>;
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    default_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Tool catalog for the provider call.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
                required_params: t.required_params(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Required-parameter table for the validator.
    pub fn required_params(&self) -> HashMap<String, Vec<String>> {
        self.tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.required_params()))
            .collect()
    }

    /// Execute a tool by name under the effective timeout.
    ///
    /// The per-call timeout is the smaller of the caller-requested value
    /// (`timeout_ms` in the input, when present) and the hard ceiling; a
    /// timeout yields a bounded result string, not an error.
    pub async fn execute(&self, name: &str, input: Value, ctx: &RunContext) -> ToolOutput {
        let Some(tool) = self.get(name) else {
            return ToolOutput::error(format!("unknown tool: {name}"));
        };

        let timeout = effective_timeout(&input, self.default_timeout);
        info!(tool = name, timeout_secs = timeout.as_secs(), "executing tool");

        match tokio::time::timeout(timeout, tool.execute(input, ctx)).await {
            Ok(Ok(output)) => {
                let is_error = output.starts_with(TOOL_ERROR_PREFIX);
                ToolOutput { output, is_error }
            }
            Ok(Err(e)) => {
                warn!(tool = name, "tool failed unexpectedly: {e}");
                ToolOutput::error(format!("{name}: {}", describe_unexpected(&e)))
            }
            Err(_) => {
                warn!(
                    tool = name,
                    timeout_secs = timeout.as_secs(),
                    "tool execution timed out"
                );
                ToolOutput::error(format!(
                    "{name} timed out after {} seconds",
                    timeout.as_secs()
                ))
            }
        }
    }
}

fn effective_timeout(input: &Value, default: Duration) -> Duration {
    let requested = input
        .get("timeout_ms")
        .and_then(Value::as_u64)
        .map(Duration::from_millis)
        .unwrap_or(default);
    requested.min(HARD_TOOL_TIMEOUT)
}

/// Map unexpected failures to standard wording.
fn describe_unexpected(err: &anyhow::Error) -> String {
    if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
        return match io_err.kind() {
            std::io::ErrorKind::NotFound => "not found".to_string(),
            std::io::ErrorKind::PermissionDenied => "permission denied".to_string(),
            std::io::ErrorKind::AlreadyExists => "already exists".to_string(),
            _ => io_err.to_string(),
        };
    }
    err.to_string()
}
