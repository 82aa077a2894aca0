//! # courier-config
//!
//! TOML configuration schema and loader. A config file that exists but does
//! not parse is a hard error: falling back to defaults would silently reset
//! security-relevant fields such as per-channel allow-lists.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    AgentConfig, ChannelConfig, CourierConfig, LoggingConfig, ProviderConfig, SandboxConfig,
    SchedulerConfig, StoreConfig,
};
