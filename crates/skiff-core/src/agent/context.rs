//! Per-run execution context.
//!
//! One `RunContext` is constructed per `run` call and passed explicitly
//! to everything that needs it. There are no ambient singletons; the
//! backup map and permission state live here and die with the run.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::tools::permissions::{self, PermissionMode};

/// Host-owned confirmation hook.
///
/// When present and it resolves `false`, the caller substitutes a
/// denial result instead of invoking the tool.
#[async_trait::async_trait]
pub trait ConfirmHook: Send + Sync {
    async fn before_tool_execute(&self, tool: &str, input: &Value) -> bool;
}

/// Shared state for all tool executions within one run.
pub struct RunContext {
    pub working_dir: PathBuf,
    pub git_root: Option<PathBuf>,
    pub permission_mode: PermissionMode,
    /// Tools requiring confirmation under the current mode.
    pub confirm_tools: HashSet<String>,
    /// Pre-edit file contents, written by write/edit tools and read by
    /// the undo tool. `None` records that the file did not exist.
    ///
    /// Shared across every execution in the run. Two concurrent edits to
    /// the same path within one parallel batch can interleave at await
    /// points; the mutex guards individual accesses, not the batch.
    pub backups: Arc<Mutex<HashMap<PathBuf, Option<String>>>>,
    pub confirm_hook: Option<Arc<dyn ConfirmHook>>,
}

impl RunContext {
    pub fn new(
        working_dir: PathBuf,
        git_root: Option<PathBuf>,
        permission_mode: PermissionMode,
        confirm_hook: Option<Arc<dyn ConfirmHook>>,
    ) -> Self {
        Self {
            working_dir,
            git_root,
            permission_mode,
            confirm_tools: permissions::confirm_tools(permission_mode),
            backups: Arc::new(Mutex::new(HashMap::new())),
            confirm_hook,
        }
    }

    /// Project root for path-protection decisions.
    pub fn project_root(&self) -> &Path {
        self.git_root.as_deref().unwrap_or(&self.working_dir)
    }

    /// Whether this call must go through the confirmation hook.
    ///
    /// True when the mode's confirm set names the tool, or when any
    /// path-like argument points at an always-confirm location.
    pub fn requires_confirmation(&self, tool: &str, input: &Value) -> bool {
        if self.confirm_tools.contains(tool) {
            return true;
        }

        for key in ["path", "file_path"] {
            if let Some(path) = input.get(key).and_then(Value::as_str) {
                if permissions::is_always_confirm_path(Path::new(path), self.project_root()) {
                    return true;
                }
            }
        }

        false
    }

    /// Record the pre-edit content for a path. First write wins so undo
    /// restores the state from before the whole run.
    pub fn record_backup(&self, path: PathBuf, prior: Option<String>) {
        self.backups.lock().entry(path).or_insert(prior);
    }

    /// Take the recorded backup for a path, if any.
    pub fn take_backup(&self, path: &Path) -> Option<Option<String>> {
        self.backups.lock().remove(path)
    }
}
