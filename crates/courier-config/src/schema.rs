use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use courier_core::AccessPolicy;

/// Root configuration — maps to `courier.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub agent: AgentConfig,
    pub provider: ProviderConfig,
    pub sandbox: SandboxConfig,
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub channels: HashMap<String, ChannelConfig>,
    pub logging: LoggingConfig,
}

// ── Agent ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// System prompt injected at the start of every conversation.
    pub system_prompt: Option<String>,
    /// Maximum agent loop iterations before forcing a stop.
    pub max_iterations: u32,
    /// Maximum bytes per tool result. Longer results are truncated with a note.
    pub tool_result_max_bytes: usize,
    /// Un-consolidated turns above this count trigger memory consolidation.
    pub consolidate_after_turns: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_iterations: 20,
            tool_result_max_bytes: 49_152,
            consolidate_after_turns: 40,
        }
    }
}

// ── Provider ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Model identifier passed to the backend.
    pub model: String,
    /// OpenAI-compatible chat-completions base URL.
    pub base_url: String,
    /// API key. Supplied to the gateway per call, never exported into the
    /// process environment.
    pub api_key: Option<String>,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            timeout_secs: 120,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

// ── Sandbox ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// All filesystem and shell activity is confined under this root.
    pub workspace_root: PathBuf,
    /// Per-tool execution timeout in seconds.
    pub tool_timeout_secs: u64,
    /// Maximum concurrently running sub-agents. Exceeding this fails fast.
    pub max_sub_agents: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workspace_root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".courier")
                .join("workspace"),
            tool_timeout_secs: 60,
            max_sub_agents: 4,
        }
    }
}

// ── Store ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding session logs, the memory document, and the job store.
    pub state_dir: PathBuf,
    /// Maximum sessions held in the in-memory cache.
    pub cache_max_sessions: usize,
    /// Cache entry TTL in seconds. Eviction never touches durable logs.
    pub cache_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".courier")
                .join("state"),
            cache_max_sessions: 128,
            cache_ttl_secs: 1800,
        }
    }
}

// ── Scheduler ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tick interval in seconds for the due-job check.
    pub tick_secs: u64,
    /// Per-job execution timeout in seconds.
    pub job_timeout_secs: u64,
    /// Idle-heartbeat interval in seconds. 0 disables heartbeats.
    pub heartbeat_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 1,
            job_timeout_secs: 300,
            heartbeat_secs: 0,
        }
    }
}

// ── Channels ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Transport type: "telegram", "discord", "whatsapp", "email", "matrix",
    /// "qq", "dingtalk".
    #[serde(rename = "type")]
    pub transport: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Sender access policy. Defaults to deny-all.
    #[serde(default)]
    pub access: AccessPolicy,
    /// Adapter-specific settings (tokens, endpoints, …).
    #[serde(flatten)]
    pub settings: HashMap<String, toml::Value>,
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

fn default_true() -> bool {
    true
}

// ── Validation ─────────────────────────────────────────────────

impl CourierConfig {
    /// Validate the config. Returns non-fatal warnings; hard problems are
    /// an `Err`.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.provider.model.is_empty() {
            errors.push("provider.model is empty".to_string());
        }
        if self.provider.timeout_secs == 0 {
            errors.push("provider.timeout_secs must be > 0".to_string());
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            errors.push(format!(
                "provider.temperature {} is out of range 0.0..=2.0",
                self.provider.temperature
            ));
        }
        if self.agent.max_iterations == 0 {
            errors.push("agent.max_iterations must be > 0".to_string());
        }
        if self.sandbox.max_sub_agents == 0 {
            warnings.push("sandbox.max_sub_agents is 0 — sub-agent spawn will always fail".into());
        }
        if self.scheduler.tick_secs == 0 {
            errors.push("scheduler.tick_secs must be > 0".to_string());
        }

        let known_transports = [
            "telegram", "discord", "whatsapp", "email", "matrix", "qq", "dingtalk", "mock",
        ];
        for (id, ch) in &self.channels {
            if !known_transports.contains(&ch.transport.as_str()) {
                warnings.push(format!(
                    "channels.{id}: unknown transport '{}' (supported: {})",
                    ch.transport,
                    known_transports.join(", ")
                ));
            }
            if ch.access.allow_all {
                warnings.push(format!(
                    "channels.{id}: allow_all is set — every sender on this channel is admitted"
                ));
            }
        }

        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(format!("configuration errors:\n  - {}", errors.join("\n  - ")))
        }
    }
}
