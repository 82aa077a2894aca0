use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use courier_core::{CourierError, OutboundMessage, Result};

use crate::adapter::{AdapterEvent, ChannelAdapter};

/// In-memory adapter for tests: inbound events are injected by hand,
/// connect and send failures are scripted.
pub struct MockAdapter {
    id: String,
    current: Mutex<Option<mpsc::Sender<AdapterEvent>>>,
    connects: AtomicUsize,
    connect_failures_remaining: AtomicUsize,
    send_failures_remaining: AtomicUsize,
    sent: Mutex<Vec<OutboundMessage>>,
    heartbeats: AtomicUsize,
    heartbeat: bool,
    auto_ack: bool,
}

impl MockAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            current: Mutex::new(None),
            connects: AtomicUsize::new(0),
            connect_failures_remaining: AtomicUsize::new(0),
            send_failures_remaining: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            heartbeats: AtomicUsize::new(0),
            heartbeat: false,
            auto_ack: false,
        }
    }

    /// Enable keepalive; `auto_ack` makes every probe ack itself.
    pub fn with_heartbeat(mut self, auto_ack: bool) -> Self {
        self.heartbeat = true;
        self.auto_ack = auto_ack;
        self
    }

    pub fn fail_next_connects(&self, n: usize) {
        self.connect_failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_sends(&self, n: usize) {
        self.send_failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Push an event into the current connection. Returns false when not
    /// connected.
    pub async fn push(&self, event: AdapterEvent) -> bool {
        let tx = self.current.lock().clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Kill the current connection from the transport side.
    pub async fn drop_connection(&self, reason: &str) -> bool {
        self.push(AdapterEvent::ConnectionLost(reason.into())).await
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn heartbeats(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ChannelAdapter for MockAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn transport(&self) -> &str {
        "mock"
    }

    async fn connect(&self) -> Result<mpsc::Receiver<AdapterEvent>> {
        if Self::take_failure(&self.connect_failures_remaining) {
            return Err(CourierError::Channel {
                channel: self.id.clone(),
                reason: "scripted connect failure".into(),
            });
        }
        let (tx, rx) = mpsc::channel(64);
        *self.current.lock() = Some(tx);
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        if Self::take_failure(&self.send_failures_remaining) {
            return Err(CourierError::Channel {
                channel: self.id.clone(),
                reason: "scripted send failure".into(),
            });
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }

    fn requires_heartbeat(&self) -> bool {
        self.heartbeat
    }

    async fn send_heartbeat(&self) -> Result<()> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        if self.auto_ack {
            self.push(AdapterEvent::HeartbeatAck).await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.current.lock() = None;
        Ok(())
    }
}
