use thiserror::Error;

/// Unified error type for the entire Courier gateway.
#[derive(Error, Debug)]
pub enum CourierError {
    // ── Provider errors ────────────────────────────────────────
    #[error("provider error: {0}")]
    Provider(String),

    #[error("provider rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider call timed out after {timeout_secs}s")]
    ProviderTimeout { timeout_secs: u64 },

    /// Caller-initiated cancellation. Must propagate as-is — converting
    /// this into text content loses the distinction the loop relies on.
    #[error("cancelled")]
    Cancelled,

    // ── Tool errors ────────────────────────────────────────────
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution failed: {tool}: {reason}")]
    ToolExecution { tool: String, reason: String },

    #[error("tool denied by policy: {tool}: {reason}")]
    ToolDenied { tool: String, reason: String },

    #[error("tool {tool} timed out after {timeout_secs}s")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("sub-agent limit reached: {max} already running")]
    SubAgentLimit { max: usize },

    // ── Channel errors ─────────────────────────────────────────
    #[error("channel error: {channel}: {reason}")]
    Channel { channel: String, reason: String },

    #[error("channel not connected: {0}")]
    ChannelNotConnected(String),

    #[error("sender not authorized: {sender} on channel {channel}")]
    AccessDenied { channel: String, sender: String },

    #[error("inbound bus full, event rejected")]
    BusFull,

    #[error("delivery permanently failed to {channel} after {attempts} attempts")]
    DeliveryFailed { channel: String, attempts: u32 },

    // ── Store errors ───────────────────────────────────────────
    #[error("store error: {0}")]
    Store(String),

    // ── Scheduler errors ───────────────────────────────────────
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("scheduled job not found: {0}")]
    JobNotFound(String),

    // ── Config errors ──────────────────────────────────────────
    /// A present-but-unparsable config is a hard failure. Falling back to
    /// defaults would silently reset security-relevant fields like the
    /// per-channel allow-list.
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CourierError {
    /// Transient failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::ProviderTimeout { .. } => true,
            Self::Provider(msg) => {
                msg.starts_with("HTTP 429")
                    || msg.starts_with("HTTP 500")
                    || msg.starts_with("HTTP 502")
                    || msg.starts_with("HTTP 503")
                    || msg.starts_with("HTTP 529")
                    || msg.contains("timed out")
                    || msg.contains("connection reset")
                    || msg.contains("connection closed")
                    || msg.contains("overloaded")
            }
            _ => false,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, CourierError>;
