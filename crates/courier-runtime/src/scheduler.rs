//! Cron and heartbeat scheduler.
//!
//! Two timer sources share one persisted job store: cron-style recurring
//! jobs and idle-heartbeat interval jobs. Due jobs invoke the Agent Loop's
//! direct entry point (through [`JobRunner`]), so scheduled turns serialize
//! with user traffic under the same per-session lock.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_core::{CourierError, Result, SessionKey};
use courier_store::atomic::write_json_atomic;

// ── Job model ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Recurring on a cron expression.
    Cron { expression: String },
    /// Recurring every fixed interval; used for idle heartbeats.
    Interval { secs: u64 },
    /// Fires exactly once. The fire time is fixed at creation and never
    /// recomputed, including across restarts.
    Once { at: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub label: Option<String>,
    /// Prompt injected as a synthetic turn when the job fires.
    pub prompt: String,
    pub channel_id: String,
    pub session_key: SessionKey,
    pub trigger: Trigger,
    pub next_fire: DateTime<Utc>,
    pub enabled: bool,
    pub fire_count: u64,
    pub last_fired: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
}

// ── Job store ──────────────────────────────────────────────────

/// Persisted job store: one JSON document, rewritten atomically.
///
/// The in-memory map is authoritative between persists. A failed persist
/// is reported and retried on the next state change; it never disarms the
/// timers.
pub struct JobStore {
    path: PathBuf,
    jobs: Mutex<HashMap<Uuid, ScheduledJob>>,
}

impl JobStore {
    pub fn open(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join("jobs.json");
        let jobs = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Vec<ScheduledJob>>(&raw) {
                Ok(list) => list.into_iter().map(|j| (j.id, j)).collect(),
                Err(e) => {
                    let aside = path.with_extension("json.corrupt");
                    warn!(
                        path = %path.display(),
                        error = %e,
                        aside = %aside.display(),
                        "job store unparsable, quarantining"
                    );
                    std::fs::rename(&path, &aside)?;
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            jobs: Mutex::new(jobs),
        })
    }

    /// Create a cron job. The expression is validated here — a malformed
    /// one is rejected at creation, not discovered at first fire.
    pub fn add_cron(
        &self,
        prompt: impl Into<String>,
        expression: &str,
        channel_id: impl Into<String>,
        session_key: SessionKey,
        label: Option<String>,
    ) -> Result<ScheduledJob> {
        let schedule = Schedule::from_str(expression).map_err(|e| CourierError::InvalidCron {
            expr: expression.into(),
            reason: e.to_string(),
        })?;
        let next_fire = schedule
            .after(&Utc::now())
            .next()
            .ok_or_else(|| CourierError::InvalidCron {
                expr: expression.into(),
                reason: "schedule never fires".into(),
            })?;

        let job = ScheduledJob {
            id: Uuid::new_v4(),
            label,
            prompt: prompt.into(),
            channel_id: channel_id.into(),
            session_key,
            trigger: Trigger::Cron {
                expression: expression.into(),
            },
            next_fire,
            enabled: true,
            fire_count: 0,
            last_fired: None,
            consecutive_failures: 0,
        };
        self.insert(job)
    }

    pub fn add_interval(
        &self,
        prompt: impl Into<String>,
        secs: u64,
        channel_id: impl Into<String>,
        session_key: SessionKey,
        label: Option<String>,
    ) -> Result<ScheduledJob> {
        let job = ScheduledJob {
            id: Uuid::new_v4(),
            label,
            prompt: prompt.into(),
            channel_id: channel_id.into(),
            session_key,
            trigger: Trigger::Interval { secs },
            next_fire: Utc::now() + chrono::Duration::seconds(secs as i64),
            enabled: true,
            fire_count: 0,
            last_fired: None,
            consecutive_failures: 0,
        };
        self.insert(job)
    }

    pub fn add_once(
        &self,
        prompt: impl Into<String>,
        at: DateTime<Utc>,
        channel_id: impl Into<String>,
        session_key: SessionKey,
        label: Option<String>,
    ) -> Result<ScheduledJob> {
        let job = ScheduledJob {
            id: Uuid::new_v4(),
            label,
            prompt: prompt.into(),
            channel_id: channel_id.into(),
            session_key,
            trigger: Trigger::Once { at },
            next_fire: at,
            enabled: true,
            fire_count: 0,
            last_fired: None,
            consecutive_failures: 0,
        };
        self.insert(job)
    }

    fn insert(&self, job: ScheduledJob) -> Result<ScheduledJob> {
        self.jobs.lock().insert(job.id, job.clone());
        self.persist()?;
        info!(job = %job.id, label = ?job.label, next_fire = %job.next_fire, "job scheduled");
        Ok(job)
    }

    pub fn remove(&self, id: Uuid) -> Result<()> {
        self.jobs
            .lock()
            .remove(&id)
            .ok_or_else(|| CourierError::JobNotFound(id.to_string()))?;
        self.persist()
    }

    pub fn list(&self) -> Vec<ScheduledJob> {
        self.jobs.lock().values().cloned().collect()
    }

    pub fn get(&self, id: Uuid) -> Option<ScheduledJob> {
        self.jobs.lock().get(&id).cloned()
    }

    /// Jobs due at `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<ScheduledJob> {
        self.jobs
            .lock()
            .values()
            .filter(|j| j.enabled && j.next_fire <= now)
            .cloned()
            .collect()
    }

    /// Record one execution and arm the next fire. On failure, the next
    /// fire is pushed out with increasing backoff instead of retrying in a
    /// tight loop.
    pub fn record_outcome(&self, id: Uuid, now: DateTime<Utc>, success: bool) {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else { return };

        job.fire_count += 1;
        job.last_fired = Some(now);
        if success {
            job.consecutive_failures = 0;
        } else {
            job.consecutive_failures += 1;
        }

        let natural_next = match &job.trigger {
            Trigger::Cron { expression } => Schedule::from_str(expression)
                .ok()
                .and_then(|s| s.after(&now).next()),
            Trigger::Interval { secs } => Some(now + chrono::Duration::seconds(*secs as i64)),
            Trigger::Once { .. } => None,
        };

        match natural_next {
            Some(next) => {
                job.next_fire = if success {
                    next
                } else {
                    let backoff = chrono::Duration::seconds(
                        10 * 2i64.pow(job.consecutive_failures.min(6)),
                    );
                    next.max(now + backoff)
                };
            }
            None => {
                // One-shot: done after its single fire, success or not.
                job.enabled = false;
            }
        }
    }

    /// Advance a job's timer without firing it (heartbeat idle gating).
    pub fn skip(&self, id: Uuid, now: DateTime<Utc>) {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else { return };
        if let Trigger::Interval { secs } = &job.trigger {
            job.next_fire = now + chrono::Duration::seconds(*secs as i64);
        }
    }

    /// Rewrite the store atomically.
    pub fn persist(&self) -> Result<()> {
        let jobs: Vec<ScheduledJob> = self.jobs.lock().values().cloned().collect();
        write_json_atomic(&self.path, &jobs)
    }
}

// ── Execution ──────────────────────────────────────────────────

/// Executes one due job; implemented by the runtime over the Agent Loop's
/// direct-invocation entry point.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, job: &ScheduledJob, cancel: &CancellationToken) -> Result<()>;

    /// Whether the job's session is idle. Heartbeat (interval) jobs only
    /// fire on idle sessions; an active conversation is its own heartbeat.
    fn is_idle(&self, _job: &ScheduledJob) -> bool {
        true
    }
}

/// Production [`JobRunner`]: fires jobs through the Agent Loop's direct
/// entry point and delivers any reply over the outbound bus.
pub struct AgentJobRunner {
    agent: Arc<crate::agent_loop::AgentLoop>,
    outbound: tokio::sync::mpsc::Sender<courier_channels::OutboundRequest>,
    idle_after: chrono::Duration,
}

impl AgentJobRunner {
    pub fn new(
        agent: Arc<crate::agent_loop::AgentLoop>,
        outbound: tokio::sync::mpsc::Sender<courier_channels::OutboundRequest>,
        idle_after_secs: i64,
    ) -> Self {
        Self {
            agent,
            outbound,
            idle_after: chrono::Duration::seconds(idle_after_secs),
        }
    }
}

#[async_trait]
impl JobRunner for AgentJobRunner {
    async fn run_job(&self, job: &ScheduledJob, cancel: &CancellationToken) -> Result<()> {
        let message = self
            .agent
            .invoke_direct(&job.session_key, &job.channel_id, &job.prompt, cancel)
            .await?;
        let Some(message) = message else {
            return Ok(());
        };

        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        self.outbound
            .send(courier_channels::OutboundRequest {
                message,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CourierError::ChannelNotConnected(job.channel_id.clone()))?;
        match reply_rx.await {
            Ok(Ok(_)) | Err(_) => Ok(()),
            Ok(Err(e)) => Err(e),
        }
    }

    fn is_idle(&self, job: &ScheduledJob) -> bool {
        match self.agent.last_activity(&job.session_key) {
            Some(last) => Utc::now().signed_duration_since(last) >= self.idle_after,
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub tick: Duration,
    /// Per-job execution timeout.
    pub job_timeout: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            job_timeout: Duration::from_secs(300),
        }
    }
}

pub struct Scheduler {
    store: Arc<JobStore>,
    runner: Arc<dyn JobRunner>,
    options: SchedulerOptions,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        store: Arc<JobStore>,
        runner: Arc<dyn JobRunner>,
        options: SchedulerOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            runner,
            options,
            cancel,
        }
    }

    /// Tick loop. Due jobs are spawned into one long-lived [`JoinSet`] and
    /// reaped as they finish, so ticking never waits on a running job: a
    /// stalled execution delays neither its batch-mates nor jobs that
    /// become due later. Every execution is independently time-bounded.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.options.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(tick_secs = self.options.tick.as_secs(), "scheduler started");

        let mut running: JoinSet<(Uuid, bool)> = JoinSet::new();
        // A job stays "due" until its outcome is recorded; tracking spawned
        // ids keeps later ticks from starting it a second time while the
        // first run is still in flight.
        let mut in_flight: HashSet<Uuid> = HashSet::new();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("scheduler stopped");
                    return;
                }
                Some(joined) = running.join_next() => {
                    if let Ok((id, success)) = joined {
                        in_flight.remove(&id);
                        self.store.record_outcome(id, Utc::now(), success);
                        // Persist failure must not disarm the timers:
                        // next_fire is already updated in memory, so the
                        // next fire stays scheduled.
                        if let Err(e) = self.store.persist() {
                            warn!(error = %e, "job store persist failed, timers remain armed");
                        }
                    }
                }
                _ = ticker.tick() => {
                    let now = Utc::now();
                    for job in self.store.due(now) {
                        if in_flight.contains(&job.id) {
                            continue;
                        }
                        if matches!(job.trigger, Trigger::Interval { .. })
                            && !self.runner.is_idle(&job)
                        {
                            debug!(job = %job.id, "session active, skipping heartbeat");
                            self.store.skip(job.id, now);
                            continue;
                        }

                        in_flight.insert(job.id);
                        let runner = Arc::clone(&self.runner);
                        let cancel = self.cancel.clone();
                        let timeout = self.options.job_timeout;
                        running.spawn(async move {
                            let result =
                                tokio::time::timeout(timeout, runner.run_job(&job, &cancel)).await;
                            let success = match &result {
                                Ok(Ok(())) => true,
                                Ok(Err(e)) => {
                                    warn!(job = %job.id, error = %e, "job execution failed");
                                    false
                                }
                                Err(_) => {
                                    warn!(
                                        job = %job.id,
                                        timeout_secs = timeout.as_secs(),
                                        "job timed out"
                                    );
                                    false
                                }
                            };
                            (job.id, success)
                        });
                    }
                }
            }
        }
    }
}
