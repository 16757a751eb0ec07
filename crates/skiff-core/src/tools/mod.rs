//! Tool registry and permission gating.

pub mod permissions;
pub mod registry;

pub use permissions::{confirm_tools, is_always_confirm_path, PermissionMode};
pub use registry::{Tool, ToolOutput, ToolRegistry, TOOL_ERROR_PREFIX};
