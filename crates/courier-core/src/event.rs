use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::key::SessionKey;

/// A normalized inbound event, produced by the Channel Manager after access
/// control and placed on the bounded inbound bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub sender: String,
    pub channel_id: String,
    pub session_key: SessionKey,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(
        sender: impl Into<String>,
        channel_id: impl Into<String>,
        session_key: SessionKey,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            channel_id: channel_id.into(),
            session_key,
            content: content.into(),
            received_at: Utc::now(),
        }
    }
}

/// An outbound message from the Agent Loop, delivered by a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel_id: String,
    /// Target conversation on that channel.
    pub conversation: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_turn: Option<Uuid>,
}

impl OutboundMessage {
    pub fn text(
        channel_id: impl Into<String>,
        conversation: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            conversation: conversation.into(),
            content: content.into(),
            reply_to_turn: None,
        }
    }
}
