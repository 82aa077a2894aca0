use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;

use courier_core::{Capability, CourierError, Result, ToolSpec};

use crate::sandbox::SandboxTool;

const MAX_READ_BYTES: usize = 262_144;

/// Resolve a tool-supplied path inside the workspace root.
///
/// Workspace confinement is the default, not an option: relative paths are
/// joined under the root, absolute paths must already be under it, and
/// parent-directory traversal is rejected outright.
fn resolve_in_workspace(root: &Path, raw: &str) -> Result<PathBuf> {
    let candidate = Path::new(raw);
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(CourierError::ToolDenied {
            tool: "filesystem".into(),
            reason: "parent-directory traversal is not allowed".into(),
        });
    }

    let resolved = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    if !resolved.starts_with(root) {
        return Err(CourierError::ToolDenied {
            tool: "filesystem".into(),
            reason: format!("path outside workspace: {raw}"),
        });
    }
    Ok(resolved)
}

/// Read a file from the workspace.
pub struct FileReadTool {
    workspace_root: PathBuf,
}

impl FileReadTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl SandboxTool for FileReadTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "file_read".into(),
            description: "Read a file from the workspace".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path relative to the workspace" }
                },
                "required": ["path"]
            }),
            capability: Capability::Filesystem,
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<String> {
        let raw = path_arg(arguments)?;
        let path = resolve_in_workspace(&self.workspace_root, raw)?;
        let mut content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CourierError::ToolExecution {
                tool: "file_read".into(),
                reason: format!("{raw}: {e}"),
            }
        })?;
        if content.len() > MAX_READ_BYTES {
            content.truncate(MAX_READ_BYTES);
            content.push_str("\n... [truncated]");
        }
        Ok(content)
    }
}

/// Write a file into the workspace, creating parent directories.
pub struct FileWriteTool {
    workspace_root: PathBuf,
}

impl FileWriteTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl SandboxTool for FileWriteTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "file_write".into(),
            description: "Write a file inside the workspace".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path relative to the workspace" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }),
            capability: Capability::Filesystem,
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<String> {
        let raw = path_arg(arguments)?;
        let content = arguments
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CourierError::ToolExecution {
                tool: "file_write".into(),
                reason: "missing 'content' parameter".into(),
            })?;

        let path = resolve_in_workspace(&self.workspace_root, raw)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(format!("wrote {} bytes to {raw}", content.len()))
    }
}

fn path_arg(arguments: &serde_json::Value) -> Result<&str> {
    arguments
        .get("path")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CourierError::ToolExecution {
            tool: "filesystem".into(),
            reason: "missing 'path' parameter".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn traversal_is_rejected() {
        let root = PathBuf::from("/ws");
        assert!(resolve_in_workspace(&root, "../etc/passwd").is_err());
        assert!(resolve_in_workspace(&root, "a/../../b").is_err());
    }

    #[test]
    fn absolute_path_outside_workspace_is_rejected() {
        let root = PathBuf::from("/ws");
        assert!(resolve_in_workspace(&root, "/etc/passwd").is_err());
    }

    #[test]
    fn relative_and_absolute_workspace_paths_resolve() {
        let root = PathBuf::from("/ws");
        assert_eq!(
            resolve_in_workspace(&root, "notes/a.txt").unwrap(),
            PathBuf::from("/ws/notes/a.txt")
        );
        assert_eq!(
            resolve_in_workspace(&root, "/ws/b.txt").unwrap(),
            PathBuf::from("/ws/b.txt")
        );
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let write = FileWriteTool::new(dir.path().to_path_buf());
        let read = FileReadTool::new(dir.path().to_path_buf());

        write
            .execute(&json!({"path": "notes/hello.txt", "content": "hi there"}))
            .await
            .unwrap();
        let content = read
            .execute(&json!({"path": "notes/hello.txt"}))
            .await
            .unwrap();
        assert_eq!(content, "hi there");
    }

    #[tokio::test]
    async fn read_outside_workspace_is_denied_not_attempted() {
        let dir = tempfile::tempdir().unwrap();
        let read = FileReadTool::new(dir.path().to_path_buf());
        let err = read
            .execute(&json!({"path": "/etc/passwd"}))
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::ToolDenied { .. }));
    }
}
