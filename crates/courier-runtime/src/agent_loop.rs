use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_core::{
    InboundEvent, OutboundMessage, Result, Role, SessionKey, ToolOutcome, Turn,
};
use courier_llm::{CompletionOutcome, Credentials, ProviderGateway, ProviderRequest};
use courier_sandbox::Sandbox;
use courier_store::{LongTermMemory, SessionStore};

use crate::session::SessionLocks;

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub model: String,
    pub system_prompt: Option<String>,
    /// Hard cap on provider/tool iterations per invocation.
    pub max_iterations: u32,
    /// Tool results longer than this are truncated before re-entering the
    /// context.
    pub tool_result_max_bytes: usize,
    /// Un-consolidated turn count that triggers memory consolidation.
    pub consolidate_after_turns: usize,
    /// Recent turns included in the provider context.
    pub context_turns: usize,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            system_prompt: None,
            max_iterations: 20,
            tool_result_max_bytes: 49_152,
            consolidate_after_turns: 40,
            context_turns: 50,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// The per-session bounded tool-calling loop.
///
/// Every entry point — inbound events via [`AgentLoop::handle`], scheduler
/// invocations via [`AgentLoop::invoke_direct`] — acquires the same
/// per-session lock before touching session state, so turns within one
/// session are processed strictly in admission order regardless of source.
pub struct AgentLoop {
    store: Arc<SessionStore>,
    memory: Arc<LongTermMemory>,
    gateway: Arc<ProviderGateway>,
    sandbox: Arc<Sandbox>,
    locks: SessionLocks,
    credentials: Credentials,
    options: LoopOptions,
}

impl AgentLoop {
    pub fn new(
        store: Arc<SessionStore>,
        memory: Arc<LongTermMemory>,
        gateway: Arc<ProviderGateway>,
        sandbox: Arc<Sandbox>,
        credentials: Credentials,
        options: LoopOptions,
    ) -> Self {
        Self {
            store,
            memory,
            gateway,
            sandbox,
            locks: SessionLocks::new(),
            credentials,
            options,
        }
    }

    /// Process one inbound user event.
    pub async fn handle(
        &self,
        event: &InboundEvent,
        cancel: &CancellationToken,
    ) -> Result<Option<OutboundMessage>> {
        let lock = self.locks.acquire(&event.session_key).await;
        let _guard = lock.lock().await;

        self.store
            .append(&event.session_key, &Turn::text(Role::User, &event.content))?;
        self.run_locked(&event.session_key, &event.channel_id, cancel)
            .await
    }

    /// Direct invocation for scheduler-originated turns. Serializes through
    /// the same per-session lock as inbound traffic.
    pub async fn invoke_direct(
        &self,
        key: &SessionKey,
        channel_id: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<OutboundMessage>> {
        let lock = self.locks.acquire(key).await;
        let _guard = lock.lock().await;

        self.store.append(key, &Turn::text(Role::User, prompt))?;
        self.run_locked(key, channel_id, cancel).await
    }

    /// Most recent committed turn timestamp, for idle gating.
    pub fn last_activity(&self, key: &SessionKey) -> Option<chrono::DateTime<chrono::Utc>> {
        self.store
            .load(key)
            .ok()
            .and_then(|state| state.turns.last().map(|t| t.timestamp))
    }

    // ── Loop body ──────────────────────────────────────────────

    async fn run_locked(
        &self,
        key: &SessionKey,
        channel_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<OutboundMessage>> {
        for iteration in 0..self.options.max_iterations {
            let state = self.store.load(key)?;
            let request = self.build_request(&state.turns[state.consolidated_through.min(state.turns.len())..]);

            match self.gateway.complete(&request, &self.credentials, cancel).await {
                Ok(response) => match response.outcome {
                    CompletionOutcome::Final(text) => {
                        let turn = Turn::text(Role::Assistant, text);
                        self.store.append(key, &turn)?;
                        self.maybe_consolidate(key, cancel).await;
                        let mut message =
                            OutboundMessage::text(channel_id, &key.conversation, &turn.content);
                        message.reply_to_turn = Some(turn.id);
                        return Ok(Some(message));
                    }
                    CompletionOutcome::ToolCalls { content, calls } => {
                        debug!(session = %key, iteration, tools = calls.len(), "model requested tools");
                        let mut assistant = Turn::text(Role::Assistant, content.unwrap_or_default());
                        assistant.tool_calls = calls.clone();
                        self.store.append(key, &assistant)?;

                        let mut outcomes = Vec::with_capacity(calls.len());
                        for call in &calls {
                            // Err here is cancellation only; it propagates
                            // with the session lock released on unwind.
                            let mut outcome = self.sandbox.run(call, cancel).await?;
                            self.truncate_outcome(&mut outcome);
                            outcomes.push(outcome);
                        }
                        self.store.append(key, &Turn::tool_results(outcomes))?;
                    }
                },
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    // Recoverable failure: becomes a clearly marked error
                    // turn, never a fake answer and never a process death.
                    warn!(session = %key, error = %e, "provider failure surfaced to session");
                    let turn = Turn::error(e.to_string());
                    self.store.append(key, &turn)?;
                    return Ok(Some(OutboundMessage::text(
                        channel_id,
                        &key.conversation,
                        &turn.content,
                    )));
                }
            }
        }

        let turn = Turn::error(format!(
            "stopped after {} tool iterations without a final answer",
            self.options.max_iterations
        ));
        self.store.append(key, &turn)?;
        Ok(Some(OutboundMessage::text(
            channel_id,
            &key.conversation,
            &turn.content,
        )))
    }

    fn build_request(&self, turns: &[Turn]) -> ProviderRequest {
        let recent = if turns.len() > self.options.context_turns {
            &turns[turns.len() - self.options.context_turns..]
        } else {
            turns
        };

        let mut system = self.options.system_prompt.clone().unwrap_or_default();
        if let Ok(doc) = self.memory.read() {
            if !doc.entries.is_empty() {
                system.push_str("\n\nLong-term memory:\n");
                system.push_str(&doc.render());
            }
        }

        ProviderRequest {
            model: self.options.model.clone(),
            turns: normalize_roles(recent),
            tools: self.sandbox.specs(),
            system: (!system.is_empty()).then_some(system),
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
        }
    }

    fn truncate_outcome(&self, outcome: &mut ToolOutcome) {
        let max = self.options.tool_result_max_bytes;
        if outcome.content.len() > max {
            let mut cut = max;
            while cut > 0 && !outcome.content.is_char_boundary(cut) {
                cut -= 1;
            }
            outcome.content.truncate(cut);
            outcome.content.push_str("\n... [result truncated]");
        }
    }

    // ── Consolidation ──────────────────────────────────────────

    /// Fold turns older than the watermark into long-term memory once
    /// enough have accumulated. Failures are logged and retried on a later
    /// trigger; the message flow never fails because of consolidation.
    async fn maybe_consolidate(&self, key: &SessionKey, cancel: &CancellationToken) {
        let state = match self.store.load(key) {
            Ok(state) => state,
            Err(e) => {
                warn!(session = %key, error = %e, "consolidation skipped: load failed");
                return;
            }
        };
        let pending = state.turns.len().saturating_sub(state.consolidated_through);
        if pending < self.options.consolidate_after_turns {
            return;
        }

        info!(session = %key, pending, "consolidating session into long-term memory");
        let transcript: String = state.turns[state.consolidated_through..]
            .iter()
            .map(|t| format!("{:?}: {}\n", t.role, t.content))
            .collect();
        let request = ProviderRequest {
            model: self.options.model.clone(),
            turns: vec![Turn::text(Role::User, transcript)],
            tools: vec![],
            system: Some(
                "Summarize the durable facts, preferences, and open tasks from this \
                 conversation in a few short bullet points."
                    .into(),
            ),
            max_tokens: 1024,
            temperature: 0.2,
        };

        // The memory writer lock is held across the summarization call and
        // released on every exit path below, including failures.
        let mut guard = match self.memory.begin_write().await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(session = %key, error = %e, "consolidation skipped: memory unavailable");
                return;
            }
        };
        match self.gateway.complete(&request, &self.credentials, cancel).await {
            Ok(response) => {
                let summary = match response.outcome {
                    CompletionOutcome::Final(text) => text,
                    CompletionOutcome::ToolCalls { .. } => {
                        warn!(session = %key, "consolidation produced tool calls, skipping");
                        return;
                    }
                };
                guard.doc_mut().push(key.to_string(), summary);
                if let Err(e) = guard.commit() {
                    warn!(session = %key, error = %e, "consolidation commit failed");
                    return;
                }
                if let Err(e) = self.store.set_watermark(key, state.turns.len()) {
                    warn!(session = %key, error = %e, "watermark update failed");
                }
            }
            Err(e) => {
                warn!(session = %key, error = %e, "consolidation summarization failed");
            }
        }
    }
}

/// Enforce provider role-alternation conventions: consecutive same-role
/// text turns are merged instead of sent back to back. Tool-call and
/// tool-result turns are structural and pass through untouched.
fn normalize_roles(turns: &[Turn]) -> Vec<Turn> {
    let mut normalized: Vec<Turn> = Vec::with_capacity(turns.len());
    for turn in turns {
        let structural = !turn.tool_calls.is_empty() || !turn.tool_results.is_empty();
        if let Some(last) = normalized.last_mut() {
            let last_structural = !last.tool_calls.is_empty() || !last.tool_results.is_empty();
            if !structural && !last_structural && last.role == turn.role {
                last.content.push_str("\n\n");
                last.content.push_str(&turn.content);
                continue;
            }
        }
        normalized.push(turn.clone());
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_user_turns_are_merged() {
        let turns = vec![
            Turn::text(Role::User, "first"),
            Turn::text(Role::User, "second"),
            Turn::text(Role::Assistant, "reply"),
        ];
        let normalized = normalize_roles(&turns);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].content, "first\n\nsecond");
    }

    #[test]
    fn tool_sequences_are_not_merged() {
        let mut with_calls = Turn::text(Role::Assistant, "");
        with_calls.tool_calls = vec![courier_core::ToolCall {
            id: "c1".into(),
            tool_name: "shell".into(),
            arguments: serde_json::json!({}),
        }];
        let turns = vec![
            Turn::text(Role::User, "go"),
            with_calls,
            Turn::tool_results(vec![ToolOutcome::ok("c1", "done")]),
            Turn::text(Role::Assistant, "all done"),
        ];
        let normalized = normalize_roles(&turns);
        assert_eq!(normalized.len(), 4);
    }

    #[test]
    fn alternating_turns_pass_through() {
        let turns = vec![
            Turn::text(Role::User, "a"),
            Turn::text(Role::Assistant, "b"),
            Turn::text(Role::User, "c"),
        ];
        assert_eq!(normalize_roles(&turns).len(), 3);
    }
}
