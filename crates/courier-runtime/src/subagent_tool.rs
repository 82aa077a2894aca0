//! Sub-agent spawn tool: a one-shot delegated completion behind the
//! concurrency gate.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use courier_core::{Capability, CourierError, Result, Role, ToolSpec, Turn};
use courier_llm::{CompletionOutcome, Credentials, ProviderGateway, ProviderRequest};
use courier_sandbox::{SandboxTool, SubAgentGate};

const SUB_AGENT_SYSTEM: &str = "You are a focused sub-agent. Answer the task you were given \
     directly and completely in one response. You have no tools.";

/// Lets the model delegate a self-contained task to a fresh, tool-less
/// completion. The gate caps concurrent spawns and fails fast when full;
/// each spawn runs under a token derived from the process shutdown token,
/// so sub-agents never outlive a shutdown.
pub struct SubAgentTool {
    gate: Arc<SubAgentGate>,
    gateway: Arc<ProviderGateway>,
    credentials: Credentials,
    model: String,
    shutdown: CancellationToken,
}

impl SubAgentTool {
    pub fn new(
        gate: Arc<SubAgentGate>,
        gateway: Arc<ProviderGateway>,
        credentials: Credentials,
        model: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            gate,
            gateway,
            credentials,
            model: model.into(),
            shutdown,
        }
    }
}

#[async_trait]
impl SandboxTool for SubAgentTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "spawn_agent".into(),
            description: "Delegate a self-contained task to a sub-agent and get its answer back."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "The complete task for the sub-agent"
                    }
                },
                "required": ["prompt"]
            }),
            capability: Capability::SubAgent,
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<String> {
        let prompt = arguments
            .get("prompt")
            .and_then(|p| p.as_str())
            .ok_or_else(|| CourierError::ToolExecution {
                tool: "spawn_agent".into(),
                reason: "missing required argument 'prompt'".into(),
            })?;

        // Fails fast with the limit error when every slot is taken.
        let slot = self.gate.admit(&self.shutdown)?;
        debug!(slots_left = self.gate.available(), "sub-agent admitted");

        let request = ProviderRequest {
            model: self.model.clone(),
            turns: vec![Turn::text(Role::User, prompt)],
            tools: vec![],
            system: Some(SUB_AGENT_SYSTEM.into()),
            max_tokens: 4096,
            temperature: 0.7,
        };
        let response = self
            .gateway
            .complete(&request, &self.credentials, &slot.cancel)
            .await?;

        match response.outcome {
            CompletionOutcome::Final(text) => Ok(text),
            CompletionOutcome::ToolCalls { .. } => Err(CourierError::ToolExecution {
                tool: "spawn_agent".into(),
                reason: "sub-agent requested tools, which it does not have".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_llm::{GatewayOptions, MockProvider};

    fn tool(gate: Arc<SubAgentGate>, mock: Arc<MockProvider>) -> SubAgentTool {
        SubAgentTool::new(
            gate,
            Arc::new(ProviderGateway::new(
                mock,
                GatewayOptions {
                    max_attempts: 1,
                    ..Default::default()
                },
            )),
            Credentials::new("k"),
            "mock",
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn delegated_prompt_returns_the_sub_agents_answer() {
        let mock = Arc::new(MockProvider::new());
        mock.push_final("42");

        let tool = tool(Arc::new(SubAgentGate::new(2)), mock);
        let answer = tool
            .execute(&json!({"prompt": "what is 6 * 7?"}))
            .await
            .unwrap();
        assert_eq!(answer, "42");
    }

    #[tokio::test]
    async fn missing_prompt_is_a_tool_error() {
        let mock = Arc::new(MockProvider::new());
        let tool = tool(Arc::new(SubAgentGate::new(2)), mock);

        let err = tool.execute(&json!({})).await.unwrap_err();
        assert!(matches!(err, CourierError::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn full_gate_rejects_the_spawn() {
        let gate = Arc::new(SubAgentGate::new(1));
        let shutdown = CancellationToken::new();
        let _held = gate.admit(&shutdown).unwrap();

        let mock = Arc::new(MockProvider::new());
        mock.push_final("never");
        let tool = tool(Arc::clone(&gate), mock);

        let err = tool.execute(&json!({"prompt": "hi"})).await.unwrap_err();
        assert!(matches!(err, CourierError::SubAgentLimit { max: 1 }));
    }
}
