use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use courier_core::{AccessPolicy, CourierError, InboundEvent, OutboundMessage, Result};

use crate::access::AccessController;
use crate::adapter::{AdapterEvent, ChannelAdapter};
use crate::state::{AdapterState, HeartbeatMonitor};

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Capacity of the inbound and outbound buses.
    pub bus_capacity: usize,
    /// Outbound delivery attempts before a permanent drop.
    pub delivery_attempts: u32,
    pub delivery_backoff: Duration,
    /// Reconnect backoff base; doubles per consecutive failure.
    pub reconnect_backoff: Duration,
    pub reconnect_backoff_max: Duration,
    pub heartbeat_interval: Duration,
    /// Outstanding unacked heartbeats that force a reconnect.
    pub missed_ack_threshold: u32,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            bus_capacity: 256,
            delivery_attempts: 3,
            delivery_backoff: Duration::from_millis(500),
            reconnect_backoff: Duration::from_secs(1),
            reconnect_backoff_max: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
            missed_ack_threshold: 3,
        }
    }
}

/// Successful delivery, with the attempt count it took.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub channel: String,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct AdapterHealth {
    pub state: AdapterState,
    pub consecutive_failures: u32,
    pub last_change: DateTime<Utc>,
}

type HealthRegistry = Arc<RwLock<HashMap<String, AdapterHealth>>>;

/// One queued outbound delivery; the result travels back on `reply`.
pub struct OutboundRequest {
    pub message: OutboundMessage,
    pub reply: oneshot::Sender<Result<DeliveryReport>>,
}

/// Supervises every channel adapter: runs each one's connection state
/// machine, normalizes and access-checks inbound traffic onto the bounded
/// inbound bus, and pumps the bounded outbound bus through retrying
/// delivery.
pub struct ChannelManager {
    adapters: HashMap<String, Arc<dyn ChannelAdapter>>,
    policies: HashMap<String, AccessPolicy>,
    inbound_tx: mpsc::Sender<InboundEvent>,
    health: HealthRegistry,
    options: ManagerOptions,
    cancel: CancellationToken,
}

impl ChannelManager {
    /// Returns the manager and the consumer side of the inbound bus.
    pub fn new(
        options: ManagerOptions,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<InboundEvent>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(options.bus_capacity);
        (
            Self {
                adapters: HashMap::new(),
                policies: HashMap::new(),
                inbound_tx,
                health: Arc::new(RwLock::new(HashMap::new())),
                options,
                cancel,
            },
            inbound_rx,
        )
    }

    /// Register an adapter with its sender policy. No policy, no traffic:
    /// the policy defaults to deny-all if the caller passes
    /// [`AccessPolicy::deny_all`].
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>, policy: AccessPolicy) {
        let id = adapter.id().to_string();
        self.health.write().insert(
            id.clone(),
            AdapterHealth {
                state: AdapterState::Disconnected,
                consecutive_failures: 0,
                last_change: Utc::now(),
            },
        );
        self.policies.insert(id.clone(), policy);
        self.adapters.insert(id, adapter);
    }

    pub fn state_of(&self, channel_id: &str) -> Option<AdapterState> {
        self.health.read().get(channel_id).map(|h| h.state)
    }

    /// Spawn one supervision task per registered adapter.
    pub fn spawn_adapters(&self) -> Vec<JoinHandle<()>> {
        let access = Arc::new(AccessController::new(self.policies.clone()));
        self.adapters
            .values()
            .map(|adapter| {
                tokio::spawn(Self::supervise(
                    Arc::clone(adapter),
                    Arc::clone(&access),
                    self.inbound_tx.clone(),
                    Arc::clone(&self.health),
                    self.options.clone(),
                    self.cancel.clone(),
                ))
            })
            .collect()
    }

    /// Spawn the outbound pump and return the producer side of the bounded
    /// outbound bus.
    pub fn spawn_outbound(self: &Arc<Self>) -> mpsc::Sender<OutboundRequest> {
        let (tx, mut rx) = mpsc::channel::<OutboundRequest>(self.options.bus_capacity);
        let manager = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    request = rx.recv() => {
                        let Some(OutboundRequest { message, reply }) = request else { break };
                        let result = manager.deliver(&message).await;
                        let _ = reply.send(result);
                    }
                }
            }
        });
        tx
    }

    /// Deliver one message with bounded retry. Permanent failure comes back
    /// as [`CourierError::DeliveryFailed`] — a signal to the caller, never
    /// a silent drop.
    pub async fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryReport> {
        let adapter = self
            .adapters
            .get(&message.channel_id)
            .ok_or_else(|| CourierError::ChannelNotConnected(message.channel_id.clone()))?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match adapter.send(message).await {
                Ok(()) => {
                    return Ok(DeliveryReport {
                        channel: message.channel_id.clone(),
                        attempts: attempt,
                    });
                }
                Err(e) if attempt < self.options.delivery_attempts => {
                    let delay = self.options.delivery_backoff * 2u32.pow(attempt - 1);
                    warn!(
                        channel = %message.channel_id,
                        attempt,
                        error = %e,
                        "delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        channel = %message.channel_id,
                        attempts = attempt,
                        error = %e,
                        "delivery permanently failed"
                    );
                    return Err(CourierError::DeliveryFailed {
                        channel: message.channel_id.clone(),
                        attempts: attempt,
                    });
                }
            }
        }
    }

    // ── Supervision ────────────────────────────────────────────

    fn set_state(health: &HealthRegistry, id: &str, state: AdapterState, failures: u32) {
        let mut map = health.write();
        if let Some(entry) = map.get_mut(id) {
            if entry.state != state && !entry.state.can_transition(state) {
                warn!(channel = id, from = ?entry.state, to = ?state, "illegal state transition");
            }
            entry.state = state;
            entry.consecutive_failures = failures;
            entry.last_change = Utc::now();
        }
    }

    /// Watchdog loop for one adapter: connect, run live, reconnect with
    /// backoff on any failure. The adapter is never left silently dead.
    async fn supervise(
        adapter: Arc<dyn ChannelAdapter>,
        access: Arc<AccessController>,
        inbound_tx: mpsc::Sender<InboundEvent>,
        health: HealthRegistry,
        options: ManagerOptions,
        cancel: CancellationToken,
    ) {
        let id = adapter.id().to_string();
        let mut failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                Self::set_state(&health, &id, AdapterState::Disconnected, failures);
                let _ = adapter.disconnect().await;
                return;
            }

            Self::set_state(&health, &id, AdapterState::Connecting, failures);
            match adapter.connect().await {
                Ok(events) => {
                    Self::set_state(&health, &id, AdapterState::Authenticated, failures);
                    Self::set_state(&health, &id, AdapterState::Live, 0);
                    failures = 0;
                    info!(channel = %id, transport = adapter.transport(), "adapter live");

                    let reason = Self::run_live(
                        &adapter, events, &access, &inbound_tx, &options, &cancel,
                    )
                    .await;

                    if cancel.is_cancelled() {
                        Self::set_state(&health, &id, AdapterState::Disconnected, failures);
                        let _ = adapter.disconnect().await;
                        return;
                    }
                    warn!(channel = %id, reason, "connection ended, reconnecting");
                    Self::set_state(&health, &id, AdapterState::Reconnecting, failures);
                    failures += 1;
                }
                Err(e) => {
                    failures += 1;
                    warn!(channel = %id, error = %e, failures, "connect failed");
                    Self::set_state(&health, &id, AdapterState::Reconnecting, failures);
                }
            }

            let delay = (options.reconnect_backoff * 2u32.pow(failures.min(10)))
                .min(options.reconnect_backoff_max);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Drive one live connection until it dies.
    ///
    /// The heartbeat sender lives inside this loop rather than in its own
    /// task, so two concurrent senders for one logical connection cannot
    /// exist. Returns the reason the connection ended.
    async fn run_live(
        adapter: &Arc<dyn ChannelAdapter>,
        mut events: mpsc::Receiver<AdapterEvent>,
        access: &AccessController,
        inbound_tx: &mpsc::Sender<InboundEvent>,
        options: &ManagerOptions,
        cancel: &CancellationToken,
    ) -> &'static str {
        let mut heartbeat = HeartbeatMonitor::new(options.missed_ack_threshold);
        let start = tokio::time::Instant::now() + options.heartbeat_interval;
        let mut ticker = tokio::time::interval_at(start, options.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return "shutdown",

                event = events.recv() => match event {
                    None => return "event stream closed",
                    Some(AdapterEvent::ConnectionLost(reason)) => {
                        warn!(channel = adapter.id(), %reason, "connection lost");
                        return "connection lost";
                    }
                    Some(AdapterEvent::HeartbeatAck) => heartbeat.on_ack(),
                    Some(AdapterEvent::Inbound(event)) => {
                        if access.check(&event.channel_id, &event.sender).is_err() {
                            // Report the denial to the sender, nothing more.
                            let notice = OutboundMessage::text(
                                &event.channel_id,
                                &event.session_key.conversation,
                                "You are not authorized to use this service.",
                            );
                            let _ = adapter.send(&notice).await;
                            continue;
                        }
                        match inbound_tx.try_send(event) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(event)) => {
                                warn!(
                                    channel = adapter.id(),
                                    session = %event.session_key,
                                    "inbound bus full, rejecting event"
                                );
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                return "inbound bus closed";
                            }
                        }
                    }
                },

                _ = ticker.tick(), if adapter.requires_heartbeat() => {
                    if adapter.send_heartbeat().await.is_err() {
                        return "heartbeat send failed";
                    }
                    if heartbeat.on_sent() {
                        warn!(
                            channel = adapter.id(),
                            outstanding = heartbeat.outstanding(),
                            "missed heartbeat acks, forcing reconnect"
                        );
                        return "missed heartbeat acks";
                    }
                }
            }
        }
    }
}
