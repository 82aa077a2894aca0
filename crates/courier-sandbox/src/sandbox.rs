use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use courier_core::{CourierError, Result, ToolCall, ToolOutcome, ToolSpec};

/// A tool executable inside the sandbox. Implementations enforce their
/// capability's security policy themselves; the dispatcher adds the timeout
/// and cancellation handling on top.
#[async_trait]
pub trait SandboxTool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn execute(&self, arguments: &serde_json::Value) -> Result<String>;
}

/// Tool registry and dispatcher.
pub struct Sandbox {
    tools: HashMap<String, Arc<dyn SandboxTool>>,
    tool_timeout: Duration,
}

impl Sandbox {
    pub fn new(tool_timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            tool_timeout,
        }
    }

    pub fn register(&mut self, tool: Arc<dyn SandboxTool>) {
        self.tools.insert(tool.spec().name, tool);
    }

    /// Specs of every registered tool, for the provider request.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }

    /// Run one tool call with the per-tool timeout.
    ///
    /// Only cancellation is returned as `Err` — everything else, including
    /// unknown tools, policy denials, and timeouts, becomes an error
    /// outcome the loop feeds back to the model.
    pub async fn run(&self, call: &ToolCall, cancel: &CancellationToken) -> Result<ToolOutcome> {
        let Some(tool) = self.tools.get(&call.tool_name) else {
            warn!(tool = %call.tool_name, "tool call for unregistered tool");
            return Ok(ToolOutcome::error(
                &call.id,
                format!("unknown tool: {}", call.tool_name),
            ));
        };

        debug!(tool = %call.tool_name, "executing tool call");
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CourierError::Cancelled),
            r = tokio::time::timeout(self.tool_timeout, tool.execute(&call.arguments)) => {
                match r {
                    Ok(inner) => inner,
                    Err(_) => Err(CourierError::ToolTimeout {
                        tool: call.tool_name.clone(),
                        timeout_secs: self.tool_timeout.as_secs(),
                    }),
                }
            }
        };

        match result {
            Ok(content) => Ok(ToolOutcome::ok(&call.id, content)),
            Err(e) if e.is_cancellation() => Err(e),
            Err(e) => {
                warn!(tool = %call.tool_name, error = %e, "tool call failed");
                Ok(ToolOutcome::error(&call.id, e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::Capability;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl SandboxTool for EchoTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "echo".into(),
                description: "echo back the input".into(),
                parameters: json!({"type": "object"}),
                capability: Capability::Shell,
            }
        }

        async fn execute(&self, arguments: &serde_json::Value) -> Result<String> {
            Ok(arguments["text"].as_str().unwrap_or("").to_string())
        }
    }

    struct StuckTool;

    #[async_trait]
    impl SandboxTool for StuckTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "stuck".into(),
                description: "never returns".into(),
                parameters: json!({"type": "object"}),
                capability: Capability::Shell,
            }
        }

        async fn execute(&self, _arguments: &serde_json::Value) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    fn call(tool: &str) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            tool_name: tool.into(),
            arguments: json!({"text": "hi"}),
        }
    }

    #[tokio::test]
    async fn dispatches_to_registered_tool() {
        let mut sandbox = Sandbox::new(Duration::from_secs(5));
        sandbox.register(Arc::new(EchoTool));

        let outcome = sandbox
            .run(&call("echo"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.is_error);
        assert_eq!(outcome.content, "hi");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_outcome_not_a_failure() {
        let sandbox = Sandbox::new(Duration::from_secs(5));
        let outcome = sandbox
            .run(&call("nope"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_error);
        assert!(outcome.content.contains("unknown tool"));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_tool_hits_the_timeout() {
        let mut sandbox = Sandbox::new(Duration::from_secs(2));
        sandbox.register(Arc::new(StuckTool));

        let outcome = sandbox
            .run(&call("stuck"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_error);
        assert!(outcome.content.contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_propagates_out_of_run() {
        let mut sandbox = Sandbox::new(Duration::from_secs(5));
        sandbox.register(Arc::new(StuckTool));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = sandbox.run(&call("stuck"), &cancel).await.unwrap_err();
        assert!(err.is_cancellation());
    }
}
