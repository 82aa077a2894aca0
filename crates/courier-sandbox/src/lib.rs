//! # courier-sandbox
//!
//! Capability-scoped tool execution. Every tool runs under exactly one
//! capability (shell, filesystem, web, sub-agent spawn) and every capability
//! carries a mandatory security policy:
//!
//! - shell: destructive command shapes denied, paths confined to the
//!   workspace root, environment cleared of secrets
//! - filesystem: workspace-confined, never "unrestricted unless configured"
//! - web: private/link-local/metadata address ranges rejected before
//!   connecting
//! - sub-agent spawn: hard concurrency cap, fail-fast when full
//!
//! The sandbox knows nothing about sessions or channels.

pub mod fs;
pub mod sandbox;
pub mod shell;
pub mod ssrf;
pub mod subagent;
pub mod web;

pub use fs::{FileReadTool, FileWriteTool};
pub use sandbox::{Sandbox, SandboxTool};
pub use shell::ShellTool;
pub use subagent::{SubAgentGate, SubAgentSlot};
pub use web::WebFetchTool;
