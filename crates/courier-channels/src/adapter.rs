use async_trait::async_trait;
use tokio::sync::mpsc;

use courier_core::{InboundEvent, OutboundMessage, Result};

/// Events an adapter surfaces to its supervisor.
#[derive(Debug)]
pub enum AdapterEvent {
    /// A normalized inbound message. Access control has NOT been applied
    /// yet — that happens in the manager, on every path.
    Inbound(InboundEvent),
    /// The transport acknowledged a heartbeat.
    HeartbeatAck,
    /// The connection died; the supervisor decides what happens next.
    ConnectionLost(String),
}

/// One chat transport (Telegram, Discord, email bridge, …).
///
/// Adapters own wire-format concerns only. Connection supervision, access
/// control, and the bounded buses live in the manager.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Configured channel id, e.g. "tg-main".
    fn id(&self) -> &str;

    /// Transport type, e.g. "telegram".
    fn transport(&self) -> &str;

    /// Establish the connection and authenticate. Returns the event stream
    /// for this connection; called again on every reconnect.
    async fn connect(&self) -> Result<mpsc::Receiver<AdapterEvent>>;

    /// Deliver one message. A single attempt — retry policy is the
    /// manager's.
    async fn send(&self, message: &OutboundMessage) -> Result<()>;

    /// Whether this transport needs keepalive probes while live.
    fn requires_heartbeat(&self) -> bool {
        false
    }

    /// Send one keepalive probe. The ack arrives as
    /// [`AdapterEvent::HeartbeatAck`] on the event stream.
    async fn send_heartbeat(&self) -> Result<()> {
        Ok(())
    }

    /// Tear the connection down.
    async fn disconnect(&self) -> Result<()>;
}
