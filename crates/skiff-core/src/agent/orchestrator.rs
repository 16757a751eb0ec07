//! The agent orchestration loop.
//!
//! `Orchestrator` owns one session for the duration of a `run` call and
//! drives the full cycle: compact history, stream the provider, extract
//! the promise signal, validate tool calls, execute the batch under the
//! concurrency policy, append results, persist, repeat — bounded by the
//! iteration budget.
//!
//! Hosts are thin consumers: they hand `run` an event channel and an
//! abort token, render [`LoopEvent`]s, and answer confirmation hooks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::compactor::{self, CompactionPolicy};
use crate::agent::context::{ConfirmHook, RunContext};
use crate::agent::executor;
use crate::agent::loop_events::{EventSender, LoopEvent};
use crate::agent::signal::{extract_signal, Signal};
use crate::agent::stream::{self, StreamOutcome, StreamResult};
use crate::agent::validator::{self, RetryState, DEFAULT_MAX_TOOL_RETRIES};
use crate::ai::provider::{Provider, StreamRequest};
use crate::ai::types::{Content, Message, Role};
use crate::storage::SessionStore;
use crate::tools::permissions::PermissionMode;
use crate::tools::registry::ToolRegistry;

const MAX_ITERATIONS: usize = 50;

/// Configuration for one orchestrator.
pub struct OrchestratorConfig {
    /// Resume this session instead of creating a fresh one.
    pub session_id: Option<String>,
    pub working_dir: PathBuf,
    pub permission_mode: PermissionMode,
    /// Iteration budget; guarantees termination.
    pub max_iterations: usize,
    /// Corrective retries for incomplete tool batches.
    pub max_tool_retries: usize,
    /// Run non-bash tool calls concurrently within a batch.
    pub parallel_tools: bool,
    pub system_prompt: Option<String>,
    pub thinking_enabled: bool,
    pub compaction: CompactionPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            working_dir: PathBuf::from("."),
            permission_mode: PermissionMode::default(),
            max_iterations: MAX_ITERATIONS,
            max_tool_retries: DEFAULT_MAX_TOOL_RETRIES,
            parallel_tools: false,
            system_prompt: None,
            thinking_enabled: false,
            compaction: CompactionPolicy::default(),
        }
    }
}

/// Shared services the orchestrator needs.
pub struct OrchestratorServices {
    pub provider: Arc<dyn Provider>,
    pub tools: Arc<ToolRegistry>,
    pub store: SessionStore,
    pub confirm_hook: Option<Arc<dyn ConfirmHook>>,
}

/// Result of one `run` call.
#[derive(Debug)]
pub struct RunOutcome {
    pub success: bool,
    /// Text of the last turn that produced any.
    pub last_text: String,
    /// Promise signal from the final turn. `Blocked`/`Decide` are
    /// best-effort hints and never affect `success`.
    pub signal: Signal,
    pub messages: Vec<Message>,
    pub session_id: String,
    /// The abort token fired mid-stream; the interrupted turn was
    /// discarded. Interruption is not a failure.
    pub interrupted: bool,
}

/// The agent orchestrator.
pub struct Orchestrator {
    services: OrchestratorServices,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(services: OrchestratorServices, config: OrchestratorConfig) -> Self {
        Self { services, config }
    }

    /// Run the loop for one user prompt.
    ///
    /// Exactly two failure-shaped exits exist: cancellation (graceful,
    /// `success = true, interrupted = true`) and everything else
    /// (`success = false` with messages accumulated up to the failed
    /// turn, so the caller can resume the session).
    pub async fn run(
        &self,
        prompt: &str,
        events: EventSender,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let (session_id, mut messages, mut title) = match self.resolve_session() {
            Ok(resolved) => resolved,
            Err(outcome) => return *outcome,
        };
        let git_root = discover_git_root(&self.config.working_dir);

        let _ = events.send(LoopEvent::SessionStart {
            session_id: session_id.clone(),
        });

        messages.push(Message::user(prompt));
        if title.is_empty() {
            title = SessionStore::derive_title(prompt);
        }

        let ctx = RunContext::new(
            self.config.working_dir.clone(),
            git_root.clone(),
            self.config.permission_mode,
            self.services.confirm_hook.clone(),
        );
        let tool_defs = self.services.tools.definitions();
        let required_params = self.services.tools.required_params();

        let mut retries = RetryState::default();
        let mut last_text = String::new();
        let mut signal = Signal::None;
        let mut iterations_run = 0;

        for iteration in 1..=self.config.max_iterations {
            iterations_run = iteration;
            let _ = events.send(LoopEvent::IterationStart { iteration });

            // compact returns the same allocation when nothing changed.
            let before = messages.len();
            let untouched = messages.as_ptr();
            messages = compactor::compact(messages, &self.config.compaction);
            if messages.as_ptr() != untouched {
                info!(before, after = messages.len(), "compacted conversation");
                let _ = events.send(LoopEvent::Compact {
                    before,
                    after: messages.len(),
                });
            }

            let request = StreamRequest {
                messages: &messages,
                tools: &tool_defs,
                system_prompt: self.config.system_prompt.as_deref(),
                thinking: self.config.thinking_enabled,
            };

            let rx = match self.services.provider.stream(request, cancel.clone()).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(session_id = %session_id, "provider call failed: {e}");
                    let _ = events.send(LoopEvent::Error {
                        error: e.to_string(),
                    });
                    self.persist(&session_id, &messages, &title, git_root.as_deref());
                    return RunOutcome {
                        success: false,
                        last_text,
                        signal,
                        messages,
                        session_id,
                        interrupted: false,
                    };
                }
            };

            let result = match stream::process_stream(rx, &events, &cancel).await {
                StreamOutcome::Completed(result) => result,
                StreamOutcome::Interrupted => {
                    info!(session_id = %session_id, iteration, "run interrupted mid-stream");
                    let _ = events.send(LoopEvent::Interrupted {
                        session_id: session_id.clone(),
                    });
                    self.persist(&session_id, &messages, &title, git_root.as_deref());
                    return RunOutcome {
                        success: true,
                        last_text,
                        signal,
                        messages,
                        session_id,
                        interrupted: true,
                    };
                }
                StreamOutcome::Failed(error) => {
                    warn!(session_id = %session_id, iteration, "stream failed: {error}");
                    let _ = events.send(LoopEvent::Error {
                        error: error.clone(),
                    });
                    self.persist(&session_id, &messages, &title, git_root.as_deref());
                    return RunOutcome {
                        success: false,
                        last_text,
                        signal,
                        messages,
                        session_id,
                        interrupted: false,
                    };
                }
            };
            let _ = events.send(LoopEvent::StreamEnd { iteration });

            if result.usage.total_tokens > 0 {
                debug!(
                    session_id = %session_id,
                    prompt_tokens = result.usage.prompt_tokens,
                    completion_tokens = result.usage.completion_tokens,
                    "turn token usage"
                );
            }

            if !result.text.is_empty() {
                last_text = result.text.clone();
            }
            signal = extract_signal(&result.text);

            // A completion promise short-circuits the turn; any tool
            // calls it carried are discarded.
            if signal.is_complete() {
                let assistant = build_assistant_message(&result, false);
                if !assistant.content.is_empty() {
                    messages.push(assistant);
                }
                let _ = events.send(LoopEvent::Complete {
                    session_id: session_id.clone(),
                    iterations: iteration,
                });
                self.persist(&session_id, &messages, &title, git_root.as_deref());
                return RunOutcome {
                    success: true,
                    last_text,
                    signal,
                    messages,
                    session_id,
                    interrupted: false,
                };
            }

            // No tool calls: a natural completion.
            if result.tool_calls.is_empty() {
                let assistant = build_assistant_message(&result, true);
                if !assistant.content.is_empty() {
                    messages.push(assistant);
                }
                break;
            }

            // Validate the batch before committing the turn, so retries
            // never mutate committed history.
            let incomplete = validator::find_incomplete_calls(&result.tool_calls, &required_params);

            if !incomplete.is_empty() && retries.count < self.config.max_tool_retries {
                retries.count += 1;
                let missing: Vec<String> = incomplete
                    .iter()
                    .flat_map(|c| c.missing.iter().map(|p| format!("{}.{p}", c.tool_name)))
                    .collect();
                warn!(
                    session_id = %session_id,
                    attempt = retries.count,
                    ?missing,
                    "incomplete tool calls; requesting a corrective retry"
                );
                let _ = events.send(LoopEvent::Retry {
                    attempt: retries.count,
                    missing,
                });
                messages.push(validator::corrective_message(&incomplete, retries.count));
                continue;
            }

            messages.push(build_assistant_message(&result, true));

            if !incomplete.is_empty() {
                // Retries exhausted: degrade to synthetic results.
                warn!(
                    session_id = %session_id,
                    flagged = incomplete.len(),
                    "tool batch still incomplete after {} retries; degrading",
                    retries.count
                );
                let results =
                    validator::degraded_results(&result.tool_calls, &incomplete, retries.count);
                emit_tool_results(&events, &results);
                messages.push(Message {
                    role: Role::User,
                    content: results,
                });
                retries.count = 0;
                self.persist(&session_id, &messages, &title, git_root.as_deref());
                continue;
            }
            retries.count = 0;

            let results = executor::execute_batch(
                &result.tool_calls,
                &self.services.tools,
                &ctx,
                self.config.parallel_tools,
                &events,
            )
            .await;
            messages.push(Message {
                role: Role::User,
                content: results,
            });
            self.persist(&session_id, &messages, &title, git_root.as_deref());
        }

        let _ = events.send(LoopEvent::Complete {
            session_id: session_id.clone(),
            iterations: iterations_run,
        });
        self.persist(&session_id, &messages, &title, git_root.as_deref());
        RunOutcome {
            success: true,
            last_text,
            signal,
            messages,
            session_id,
            interrupted: false,
        }
    }

    /// Resume the configured session or create a fresh one.
    fn resolve_session(&self) -> Result<(String, Vec<Message>, String), Box<RunOutcome>> {
        let Some(id) = &self.config.session_id else {
            return Ok((uuid::Uuid::new_v4().to_string(), Vec::new(), String::new()));
        };

        match self.services.store.load(id) {
            Ok(Some(snapshot)) => Ok((snapshot.id, snapshot.messages, snapshot.title)),
            Ok(None) => Err(Box::new(failed_outcome(
                id.clone(),
                format!("session {id} not found"),
            ))),
            Err(e) => Err(Box::new(failed_outcome(
                id.clone(),
                format!("failed to load session {id}: {e}"),
            ))),
        }
    }

    fn persist(&self, session_id: &str, messages: &[Message], title: &str, git_root: Option<&Path>) {
        if let Err(e) = self
            .services
            .store
            .save(session_id, messages, title, git_root)
        {
            warn!(session_id = %session_id, "failed to persist session: {e}");
        }
    }
}

fn failed_outcome(session_id: String, error: String) -> RunOutcome {
    warn!(session_id = %session_id, "{error}");
    RunOutcome {
        success: false,
        last_text: error,
        signal: Signal::None,
        messages: Vec::new(),
        session_id,
        interrupted: false,
    }
}

fn emit_tool_results(events: &EventSender, results: &[Content]) {
    for result in results {
        if let Content::ToolResult {
            tool_use_id,
            output,
            is_error,
        } = result
        {
            let output = match output {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let _ = events.send(LoopEvent::ToolResult {
                id: tool_use_id.clone(),
                output,
                is_error: is_error.unwrap_or(false),
            });
        }
    }
}

/// Assemble the assistant turn: thinking, then text, then tool uses.
fn build_assistant_message(result: &StreamResult, include_tool_calls: bool) -> Message {
    let mut content = Vec::new();

    for block in &result.thinking_blocks {
        content.push(Content::Thinking {
            thinking: block.thinking.clone(),
            signature: block.signature.clone(),
        });
    }
    for data in &result.redacted_blocks {
        content.push(Content::RedactedThinking { data: data.clone() });
    }

    if !result.text.is_empty() {
        content.push(Content::Text {
            text: result.text.clone(),
        });
    }

    if include_tool_calls {
        for call in &result.tool_calls {
            content.push(Content::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments.clone(),
            });
        }
    }

    Message {
        role: Role::Assistant,
        content,
    }
}

/// Nearest ancestor of `start` containing a `.git` directory.
fn discover_git_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|p| p.join(".git").exists())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::streaming::StreamPart;
    use crate::ai::types::{FinishReason, ToolCall};
    use crate::error::AgentError;
    use crate::tools::registry::Tool;
    use anyhow::Result as AnyResult;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    // ── Scripted provider ──────────────────────────────────────────────

    enum ScriptTurn {
        Parts(Vec<StreamPart>),
        /// Keep the stream open without sending anything.
        Hang,
        /// Fail the call itself.
        Fail,
    }

    struct FakeProvider {
        script: Mutex<VecDeque<ScriptTurn>>,
    }

    impl FakeProvider {
        fn new(turns: Vec<ScriptTurn>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(turns.into()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Provider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn stream(
            &self,
            _request: StreamRequest<'_>,
            _cancel: CancellationToken,
        ) -> Result<mpsc::UnboundedReceiver<StreamPart>, AgentError> {
            let turn = self
                .script
                .lock()
                .pop_front()
                .expect("provider script exhausted");

            let (tx, rx) = mpsc::unbounded_channel();
            match turn {
                ScriptTurn::Parts(parts) => {
                    for part in parts {
                        let _ = tx.send(part);
                    }
                }
                ScriptTurn::Hang => {
                    tokio::spawn(async move {
                        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                        drop(tx);
                    });
                }
                ScriptTurn::Fail => {
                    return Err(AgentError::Provider {
                        provider: "fake".to_string(),
                        message: "boom".to_string(),
                    });
                }
            }
            Ok(rx)
        }
    }

    fn text_turn(text: &str) -> ScriptTurn {
        ScriptTurn::Parts(vec![
            StreamPart::TextDelta {
                delta: text.to_string(),
            },
            StreamPart::Finish {
                reason: FinishReason::Stop,
            },
        ])
    }

    fn tool_turn(calls: Vec<(&str, &str, Value)>) -> ScriptTurn {
        let mut parts = Vec::new();
        for (id, name, arguments) in calls {
            parts.push(StreamPart::ToolCallComplete {
                tool_call: ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments,
                },
            });
        }
        parts.push(StreamPart::Finish {
            reason: FinishReason::ToolCalls,
        });
        ScriptTurn::Parts(parts)
    }

    // ── Recording tools ────────────────────────────────────────────────

    struct RecordingTool {
        name: String,
        required: Vec<String>,
        executions: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl Tool for RecordingTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "records executions"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn required_params(&self) -> Vec<String> {
            self.required.clone()
        }
        async fn execute(&self, _input: Value, _ctx: &RunContext) -> AnyResult<String> {
            self.executions.lock().push(self.name.clone());
            Ok(format!("{} ok", self.name))
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        executions: Arc<Mutex<Vec<String>>>,
        _dir: tempfile::TempDir,
    }

    fn harness(script: Vec<ScriptTurn>, config: OrchestratorConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let executions = Arc::new(Mutex::new(Vec::new()));

        let mut registry = ToolRegistry::new();
        for (name, required) in [
            ("read", vec!["path"]),
            ("write", vec!["path", "content"]),
            ("bash", vec!["command"]),
        ] {
            registry.register(Arc::new(RecordingTool {
                name: name.to_string(),
                required: required.into_iter().map(String::from).collect(),
                executions: executions.clone(),
            }));
        }

        let config = OrchestratorConfig {
            working_dir: dir.path().to_path_buf(),
            permission_mode: PermissionMode::AutoInProject,
            ..config
        };

        let orchestrator = Orchestrator::new(
            OrchestratorServices {
                provider: FakeProvider::new(script),
                tools: Arc::new(registry),
                store: SessionStore::new(dir.path().join("sessions.db")),
                confirm_hook: None,
            },
            config,
        );

        Harness {
            orchestrator,
            executions,
            _dir: dir,
        }
    }

    async fn run(harness: &Harness, prompt: &str) -> (RunOutcome, Vec<LoopEvent>) {
        let (events, mut rx) = mpsc::unbounded_channel();
        let outcome = harness
            .orchestrator
            .run(prompt, events, CancellationToken::new())
            .await;
        let mut collected = Vec::new();
        while let Ok(event) = rx.try_recv() {
            collected.push(event);
        }
        (outcome, collected)
    }

    // ── Scenario A: text-only turn ends the loop ──────────────────────

    #[tokio::test]
    async fn text_only_response_completes_in_one_iteration() {
        let h = harness(vec![text_turn("Hello!")], OrchestratorConfig::default());
        let (outcome, events) = run(&h, "hi").await;

        assert!(outcome.success);
        assert!(!outcome.interrupted);
        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(outcome.last_text, "Hello!");
        assert_eq!(outcome.signal, Signal::None);
        assert!(events
            .iter()
            .any(|e| matches!(e, LoopEvent::Complete { iterations, .. } if *iterations == 1)));
    }

    // ── Scenario B: incomplete call triggers a corrective retry ───────

    #[tokio::test]
    async fn incomplete_tool_call_retries_without_executing() {
        let h = harness(
            vec![
                tool_turn(vec![("t1", "write", json!({"path": "a.rs"}))]),
                text_turn("done after retry"),
            ],
            OrchestratorConfig::default(),
        );
        let (outcome, events) = run(&h, "write the file").await;

        assert!(outcome.success);
        // Nothing executed on the flagged iteration.
        assert!(h.executions.lock().is_empty());
        assert!(events
            .iter()
            .any(|e| matches!(e, LoopEvent::Retry { attempt: 1, .. })));

        // History: prompt, corrective instruction, final assistant text.
        // The incomplete assistant turn was never committed.
        assert_eq!(outcome.messages.len(), 3);
        assert_eq!(outcome.messages[1].role, Role::User);
        assert!(outcome.messages[1].text().contains("`content`"));
        assert_eq!(outcome.messages[2].text(), "done after retry");
    }

    // ── Retry exhaustion degrades to synthetic results ────────────────

    #[tokio::test]
    async fn exhausted_retries_synthesize_results_and_continue() {
        let incomplete = || {
            tool_turn(vec![
                ("bad", "write", json!({"path": "a.rs"})),
                ("good", "read", json!({"path": "a.rs"})),
            ])
        };
        let h = harness(
            vec![incomplete(), incomplete(), text_turn("gave up, moving on")],
            OrchestratorConfig {
                max_tool_retries: 1,
                ..OrchestratorConfig::default()
            },
        );
        let (outcome, _events) = run(&h, "write the file").await;

        assert!(outcome.success);
        // Turn 1 retried; turn 2 exhausted the budget and was committed
        // with synthetic results; turn 3 completed naturally.
        // [prompt, corrective, assistant+tools, synthetic results, final text]
        assert_eq!(outcome.messages.len(), 5);

        let synthetic = &outcome.messages[3];
        assert_eq!(synthetic.role, Role::User);
        assert_eq!(synthetic.content.len(), 2);
        match &synthetic.content[0] {
            Content::ToolResult {
                tool_use_id,
                is_error,
                output,
            } => {
                assert_eq!(tool_use_id, "bad");
                assert_eq!(*is_error, Some(true));
                assert!(output.as_str().unwrap().contains("skipped after 1 retries"));
            }
            other => panic!("expected tool result, got {other:?}"),
        }
        // The complete call still gets a (neutral) result: one result
        // per tool-use id, always.
        match &synthetic.content[1] {
            Content::ToolResult {
                tool_use_id,
                is_error,
                ..
            } => {
                assert_eq!(tool_use_id, "good");
                assert_eq!(*is_error, None);
            }
            other => panic!("expected tool result, got {other:?}"),
        }
        // Degraded batches never execute.
        assert!(h.executions.lock().is_empty());
    }

    // ── Clean batches execute and feed results back ───────────────────

    #[tokio::test]
    async fn clean_batch_executes_and_loops() {
        let h = harness(
            vec![
                tool_turn(vec![("t1", "read", json!({"path": "a.rs"}))]),
                text_turn("all read"),
            ],
            OrchestratorConfig::default(),
        );
        let (outcome, _events) = run(&h, "read it").await;

        assert!(outcome.success);
        assert_eq!(*h.executions.lock(), vec!["read"]);
        // [prompt, assistant+tool_use, tool results, final text]
        assert_eq!(outcome.messages.len(), 4);

        match &outcome.messages[2].content[0] {
            Content::ToolResult {
                tool_use_id,
                output,
                ..
            } => {
                assert_eq!(tool_use_id, "t1");
                assert_eq!(output.as_str().unwrap(), "read ok");
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    // ── Complete signal short-circuits, discarding tool calls ─────────

    #[tokio::test]
    async fn complete_signal_discards_tool_calls() {
        let h = harness(
            vec![ScriptTurn::Parts(vec![
                StreamPart::TextDelta {
                    delta: "all done <<COMPLETE>>".to_string(),
                },
                StreamPart::ToolCallComplete {
                    tool_call: ToolCall {
                        id: "t1".to_string(),
                        name: "read".to_string(),
                        arguments: json!({"path": "a.rs"}),
                    },
                },
                StreamPart::Finish {
                    reason: FinishReason::ToolCalls,
                },
            ])],
            OrchestratorConfig::default(),
        );
        let (outcome, _events) = run(&h, "finish up").await;

        assert!(outcome.success);
        assert_eq!(outcome.signal, Signal::Complete);
        assert!(h.executions.lock().is_empty());
        // The committed assistant turn kept the text but not the call.
        assert_eq!(outcome.messages.len(), 2);
        assert!(outcome.messages[1].tool_uses().is_empty());
    }

    // ── Scenario D: abort mid-stream is a graceful interruption ───────

    #[tokio::test]
    async fn abort_mid_stream_interrupts_gracefully() {
        let h = harness(vec![ScriptTurn::Hang], OrchestratorConfig::default());
        let (events, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = h.orchestrator.run("hi", events, cancel).await;

        assert!(outcome.success);
        assert!(outcome.interrupted);
        // Only the prompt: the interrupted turn was discarded.
        assert_eq!(outcome.messages.len(), 1);

        let mut collected = Vec::new();
        while let Ok(event) = rx.try_recv() {
            collected.push(event);
        }
        assert!(collected
            .iter()
            .any(|e| matches!(e, LoopEvent::Interrupted { .. })));
        assert!(!collected
            .iter()
            .any(|e| matches!(e, LoopEvent::Complete { .. })));
    }

    // ── Provider failure ends the loop with partial state ─────────────

    #[tokio::test]
    async fn provider_failure_preserves_partial_messages() {
        let h = harness(
            vec![
                tool_turn(vec![("t1", "read", json!({"path": "a.rs"}))]),
                ScriptTurn::Fail,
            ],
            OrchestratorConfig::default(),
        );
        let (outcome, events) = run(&h, "read it").await;

        assert!(!outcome.success);
        assert!(!outcome.interrupted);
        // The completed first round survives for resumption.
        assert_eq!(outcome.messages.len(), 3);
        assert!(events
            .iter()
            .any(|e| matches!(e, LoopEvent::Error { error } if error.contains("boom"))));
    }

    // ── Iteration budget exhaustion is a success with a signal ────────

    #[tokio::test]
    async fn iteration_budget_exhaustion_reports_final_signal() {
        let tool_loop = || {
            ScriptTurn::Parts(vec![
                StreamPart::TextDelta {
                    delta: "<<BLOCKED: tests keep failing>> still trying".to_string(),
                },
                StreamPart::ToolCallComplete {
                    tool_call: ToolCall {
                        id: "t1".to_string(),
                        name: "read".to_string(),
                        arguments: json!({"path": "a.rs"}),
                    },
                },
                StreamPart::Finish {
                    reason: FinishReason::ToolCalls,
                },
            ])
        };
        let h = harness(
            vec![tool_loop(), tool_loop()],
            OrchestratorConfig {
                max_iterations: 2,
                ..OrchestratorConfig::default()
            },
        );
        let (outcome, _events) = run(&h, "go").await;

        // Blocked is informational: success stays true.
        assert!(outcome.success);
        assert_eq!(
            outcome.signal,
            Signal::Blocked {
                reason: "tests keep failing".to_string()
            }
        );
        assert_eq!(h.executions.lock().len(), 2);
        // [prompt] + 2 * [assistant, results]
        assert_eq!(outcome.messages.len(), 5);
    }

    // ── Over-budget history is compacted before the next call ─────────

    #[tokio::test]
    async fn over_budget_history_compacts_mid_run() {
        let h = harness(
            vec![
                tool_turn(vec![("t1", "read", json!({"path": "a.rs"}))]),
                text_turn("done"),
            ],
            OrchestratorConfig {
                compaction: CompactionPolicy {
                    token_budget: 1,
                    keep_recent: 1,
                },
                ..OrchestratorConfig::default()
            },
        );
        let (outcome, events) = run(&h, "read the file and summarize it").await;

        assert!(outcome.success);
        assert!(events
            .iter()
            .any(|e| matches!(e, LoopEvent::Compact { before: 3, after: 2 })));
        // [summary, tool results, final text]
        assert_eq!(outcome.messages.len(), 3);
        assert!(outcome.messages[0].text().contains("condensed"));
    }

    // ── Sessions persist and resume ───────────────────────────────────

    #[tokio::test]
    async fn resumed_session_extends_prior_history() {
        let h = harness(
            vec![text_turn("first answer"), text_turn("second answer")],
            OrchestratorConfig::default(),
        );
        let (first, _) = run(&h, "first question").await;
        assert_eq!(first.messages.len(), 2);

        // Rebuild an orchestrator over the same store, resuming.
        let resumed = Orchestrator::new(
            OrchestratorServices {
                provider: FakeProvider::new(vec![text_turn("second answer")]),
                tools: h.orchestrator.services.tools.clone(),
                store: h.orchestrator.services.store.clone(),
                confirm_hook: None,
            },
            OrchestratorConfig {
                session_id: Some(first.session_id.clone()),
                working_dir: h.orchestrator.config.working_dir.clone(),
                permission_mode: PermissionMode::AutoInProject,
                ..OrchestratorConfig::default()
            },
        );
        let (events, _rx) = mpsc::unbounded_channel();
        let outcome = resumed
            .run("second question", events, CancellationToken::new())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.session_id, first.session_id);
        assert_eq!(outcome.messages.len(), 4);
        assert_eq!(outcome.messages[0].text(), "first question");
        assert_eq!(outcome.messages[3].text(), "second answer");
    }

    #[tokio::test]
    async fn resuming_unknown_session_fails_cleanly() {
        let h = harness(vec![], OrchestratorConfig {
            session_id: Some("missing".to_string()),
            ..OrchestratorConfig::default()
        });
        let (outcome, _events) = run(&h, "hi").await;

        assert!(!outcome.success);
        assert!(outcome.messages.is_empty());
        assert_eq!(outcome.session_id, "missing");
    }
}
