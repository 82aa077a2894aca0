//! # courier-store
//!
//! Durable persistence for the Courier gateway:
//!
//! - **Session logs**: one append-only JSONL file per session. A torn tail
//!   line is never observable as a parsed record.
//! - **Long-term memory**: one workspace-scoped JSON document, rewritten
//!   atomically under a single serialized writer.
//!
//! Full-document writes go through [`atomic::write_atomic`]: serialize,
//! write to a temp file in the same directory, then rename over the target.

pub mod atomic;
pub mod log;
pub mod memory;
pub mod store;

pub use log::{SessionLog, SessionState};
pub use memory::{LongTermMemory, MemoryDoc, MemoryEntry};
pub use store::SessionStore;
