//! Permission gate decision contract.
//!
//! Pure decisions only: which tools a mode requires confirmation for,
//! and which paths always require confirmation. Enforcement lives in
//! the executor, and the human-facing confirmation UI is the host's.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Directory under the project root holding private configuration.
pub const PROJECT_CONFIG_DIR: &str = ".skiff";

/// Permission mode governing which tools require confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    Plan,
    #[default]
    Default,
    AcceptEdits,
    AutoInProject,
}

/// Tools that require confirmation under the given mode.
pub fn confirm_tools(mode: PermissionMode) -> HashSet<String> {
    let names: &[&str] = match mode {
        PermissionMode::Plan => &["bash", "write", "edit", "undo"],
        PermissionMode::Default => &["bash", "write", "edit"],
        PermissionMode::AcceptEdits => &["bash"],
        PermissionMode::AutoInProject => &[],
    };
    names.iter().map(|n| (*n).to_string()).collect()
}

/// Whether a path always requires confirmation, independent of mode.
///
/// True for the project's private config directory, the user's global
/// config directory, and anything outside the project root. There is no
/// bypass for these.
pub fn is_always_confirm_path(path: &Path, project_root: &Path) -> bool {
    let root = normalize(project_root);
    let resolved = if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&root.join(path))
    };

    if resolved.starts_with(root.join(PROJECT_CONFIG_DIR)) {
        return true;
    }

    if let Some(global) = global_config_dir() {
        if resolved.starts_with(normalize(&global)) {
            return true;
        }
    }

    !resolved.starts_with(&root)
}

fn global_config_dir() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("skiff"))
        .or_else(|| dirs::home_dir().map(|d| d.join(PROJECT_CONFIG_DIR)))
}

/// Lexical normalization: resolves `.` and `..` without touching the
/// filesystem, so decisions stay pure and testable.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}
