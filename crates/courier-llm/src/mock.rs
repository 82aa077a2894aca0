use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use courier_core::{CourierError, Result, ToolCall};

use crate::provider::*;

/// Scripted provider for tests: responses are pushed ahead of time and
/// popped per call, in order.
pub struct MockProvider {
    script: Mutex<VecDeque<Result<ProviderResponse>>>,
    calls: AtomicUsize,
    last_request: Mutex<Option<ProviderRequest>>,
    delay: Option<Duration>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            delay: None,
        }
    }

    /// Sleep this long inside every call, for timeout tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_final(&self, text: impl Into<String>) {
        self.script.lock().push_back(Ok(ProviderResponse {
            outcome: CompletionOutcome::Final(text.into()),
            usage: Usage::default(),
        }));
    }

    pub fn push_tool_call(
        &self,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
    ) {
        self.script.lock().push_back(Ok(ProviderResponse {
            outcome: CompletionOutcome::ToolCalls {
                content: None,
                calls: vec![ToolCall {
                    id: call_id.into(),
                    tool_name: tool_name.into(),
                    arguments,
                }],
            },
            usage: Usage::default(),
        }));
    }

    pub fn push_error(&self, error: CourierError) {
        self.script.lock().push_back(Err(error));
    }

    /// Number of `complete` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recent request, for asserting on context construction.
    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.last_request.lock().clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        request: &ProviderRequest,
        _credentials: &Credentials,
    ) -> Result<ProviderResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(CourierError::Provider("mock script exhausted".into())))
    }
}
