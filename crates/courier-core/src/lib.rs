//! # courier-core
//!
//! Core types, traits, and primitives for the Courier conversational-agent
//! gateway. This crate defines the shared vocabulary used by every other
//! crate in the workspace.

pub mod error;
pub mod event;
pub mod key;
pub mod policy;
pub mod tool;
pub mod turn;

pub use error::{CourierError, Result};
pub use event::{InboundEvent, OutboundMessage};
pub use key::SessionKey;
pub use policy::AccessPolicy;
pub use tool::{Capability, ToolCall, ToolOutcome, ToolSpec};
pub use turn::{Role, Turn};
