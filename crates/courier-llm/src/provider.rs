use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use courier_core::{Result, ToolCall, ToolSpec, Turn};

/// Credentials scoped to a single call.
///
/// Passed explicitly per request rather than exported into the process
/// environment, so capabilities that inherit ambient state (shell tools in
/// particular) can never read them.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("api_key", &"***").finish()
    }
}

/// A request to a language-model backend.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    /// Conversation context, oldest first. Role alternation is the context
    /// builder's responsibility; providers send it as given.
    pub turns: Vec<Turn>,
    pub tools: Vec<ToolSpec>,
    pub system: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// What the model decided.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    /// A final answer to surface to the user.
    Final(String),
    /// The model wants tools run before it can answer.
    ToolCalls {
        content: Option<String>,
        calls: Vec<ToolCall>,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub outcome: CompletionOutcome,
    pub usage: Usage,
}

/// A language-model backend.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// One completion call. No retry or timeout here — that is the
    /// gateway's job.
    async fn complete(
        &self,
        request: &ProviderRequest,
        credentials: &Credentials,
    ) -> Result<ProviderResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_never_prints_the_key() {
        let creds = Credentials::new("sk-super-secret");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("sk-super-secret"));
        assert!(rendered.contains("***"));
    }
}
