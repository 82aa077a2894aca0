//! # courier-channels
//!
//! The channel adapter layer. Each transport is one [`ChannelAdapter`]
//! driven by an explicit connection state machine
//! (`Disconnected → Connecting → Authenticated → Live → Reconnecting`),
//! supervised by the [`ChannelManager`]: inbound events are normalized and
//! access-checked before they reach the bounded inbound bus, outbound
//! delivery retries with backoff before reporting a permanent drop, and a
//! watchdog restarts crashed adapters.

pub mod access;
pub mod adapter;
pub mod manager;
pub mod mock;
pub mod state;
pub mod telegram;

pub use access::AccessController;
pub use adapter::{AdapterEvent, ChannelAdapter};
pub use manager::{AdapterHealth, ChannelManager, DeliveryReport, ManagerOptions, OutboundRequest};
pub use mock::MockAdapter;
pub use state::{AdapterState, HeartbeatMonitor};
pub use telegram::TelegramAdapter;
