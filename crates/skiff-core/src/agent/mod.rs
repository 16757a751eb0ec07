//! The agent loop.
//!
//! ## Orchestrator (the canonical loop)
//! - `Orchestrator` - compact, stream, validate, execute, persist
//! - `LoopEvent` / `EventSender` - event protocol to the host
//! - `OrchestratorConfig` / `OrchestratorServices` - configuration and
//!   dependencies
//!
//! ## Supporting pieces
//! - `validator` - incomplete tool-call detection and corrective retries
//! - `executor` - batch ordering policy and permission gating
//! - `compactor` - history compaction under a token budget
//! - `signal` - promise-signal extraction from turn text
//! - `RunContext` / `ConfirmHook` - per-run state and the host's
//!   confirmation hook

pub mod compactor;
pub mod context;
pub mod executor;
pub mod loop_events;
pub mod orchestrator;
pub mod signal;
pub mod stream;
pub mod validator;

pub use compactor::{compact, estimate_tokens, CompactionPolicy};
pub use context::{ConfirmHook, RunContext};
pub use loop_events::{EventSender, LoopEvent};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorServices, RunOutcome};
pub use signal::{extract_signal, Signal};
