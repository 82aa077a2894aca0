use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use courier_core::{InboundEvent, SessionKey};
use courier_channels::OutboundRequest;

use crate::agent_loop::AgentLoop;

const WORKER_QUEUE_CAPACITY: usize = 8;
const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const WORKER_SWEEP_THRESHOLD: usize = 64;

/// Routes inbound events from the bus to per-session workers.
///
/// Each session gets one worker task with a small bounded queue, so a slow
/// tool call in one session never delays another session, while events
/// within a session stay in admission order. Workers exit after an idle
/// period and are respawned on demand; once the routing map outgrows a
/// threshold, entries for exited workers are swept out.
pub struct Dispatcher {
    agent: Arc<AgentLoop>,
    outbound: mpsc::Sender<OutboundRequest>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        agent: Arc<AgentLoop>,
        outbound: mpsc::Sender<OutboundRequest>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            agent,
            outbound,
            cancel,
        }
    }

    /// Consume the inbound bus until shutdown.
    pub async fn run(self, mut inbound: mpsc::Receiver<InboundEvent>) {
        let mut workers: HashMap<SessionKey, mpsc::Sender<InboundEvent>> = HashMap::new();

        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = inbound.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let key = event.session_key.clone();
            let sender = workers
                .entry(key.clone())
                .or_insert_with(|| self.spawn_worker(key.clone()));

            match sender.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    warn!(session = %event.session_key, "session queue full, rejecting event");
                }
                Err(mpsc::error::TrySendError::Closed(event)) => {
                    // Worker idled out; respawn and re-route.
                    let sender = self.spawn_worker(key.clone());
                    if sender.try_send(event).is_err() {
                        warn!(session = %key, "event lost while respawning session worker");
                    }
                    workers.insert(key, sender);
                }
            }

            if workers.len() > WORKER_SWEEP_THRESHOLD {
                sweep_exited_workers(&mut workers);
            }
        }
        debug!("dispatcher stopped");
    }

    fn spawn_worker(&self, key: SessionKey) -> mpsc::Sender<InboundEvent> {
        let (tx, mut rx) = mpsc::channel::<InboundEvent>(WORKER_QUEUE_CAPACITY);
        let agent = Arc::clone(&self.agent);
        let outbound = self.outbound.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = tokio::time::timeout(WORKER_IDLE_TIMEOUT, rx.recv()) => match event {
                        Ok(Some(event)) => event,
                        Ok(None) | Err(_) => break,
                    },
                };

                match agent.handle(&event, &cancel).await {
                    Ok(Some(message)) => {
                        let (reply_tx, reply_rx) = oneshot::channel();
                        let request = OutboundRequest {
                            message,
                            reply: reply_tx,
                        };
                        if outbound.send(request).await.is_err() {
                            error!(session = %key, "outbound bus closed");
                            break;
                        }
                        match reply_rx.await {
                            Ok(Ok(report)) => {
                                debug!(session = %key, attempts = report.attempts, "reply delivered");
                            }
                            Ok(Err(e)) => {
                                // Permanent drop: surfaced, not swallowed.
                                error!(session = %key, error = %e, "reply permanently undeliverable");
                            }
                            Err(_) => {}
                        }
                    }
                    Ok(None) => {}
                    Err(e) if e.is_cancellation() => break,
                    Err(e) => {
                        error!(session = %key, error = %e, "agent invocation failed");
                    }
                }
            }
            debug!(session = %key, "session worker exited");
        });

        tx
    }
}

/// A worker that idled out dropped its receiver, which closes the sender
/// left behind in the map.
fn sweep_exited_workers(workers: &mut HashMap<SessionKey, mpsc::Sender<InboundEvent>>) {
    let before = workers.len();
    workers.retain(|_, tx| !tx.is_closed());
    debug!(
        swept = before - workers.len(),
        retained = workers.len(),
        "session worker sweep"
    );
}
