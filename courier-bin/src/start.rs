use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use courier_channels::{ChannelManager, ManagerOptions, TelegramAdapter};
use courier_config::CourierConfig;
use courier_core::{CourierError, Result, SessionKey};
use courier_llm::{Credentials, GatewayOptions, OpenAiCompatProvider, ProviderGateway};
use courier_runtime::{
    AgentJobRunner, AgentLoop, Dispatcher, JobStore, LoopOptions, Scheduler, SchedulerOptions,
    SubAgentTool,
};
use courier_sandbox::{
    FileReadTool, FileWriteTool, Sandbox, ShellTool, SubAgentGate, WebFetchTool,
};
use courier_store::{LongTermMemory, SessionStore};

const HEARTBEAT_PROMPT: &str = "Periodic check-in. Review the conversation and your long-term \
     memory for anything that needs follow-up, and report what you find.";

pub(crate) async fn cmd_start(config: CourierConfig) -> Result<()> {
    println!("Courier v{}", env!("CARGO_PKG_VERSION"));
    println!("   model:    {}", config.provider.model);
    println!("   state:    {}", config.store.state_dir.display());
    println!("   channels: {}", config.channels.len());
    println!();

    std::fs::create_dir_all(&config.store.state_dir)?;
    std::fs::create_dir_all(&config.sandbox.workspace_root)?;

    let cancel = CancellationToken::new();

    // ── Stores ─────────────────────────────────────────────────
    let store = Arc::new(SessionStore::new(
        &config.store.state_dir,
        config.store.cache_max_sessions,
        Duration::from_secs(config.store.cache_ttl_secs),
    ));
    let memory = Arc::new(LongTermMemory::new(&config.store.state_dir));

    // ── Provider ───────────────────────────────────────────────
    let Some(api_key) = config.provider.api_key.clone() else {
        return Err(CourierError::Config(
            "no API key configured: set provider.api_key in courier.toml \
             or export COURIER_API_KEY"
                .into(),
        ));
    };
    let credentials = Credentials::new(api_key);
    let gateway = Arc::new(ProviderGateway::new(
        Arc::new(OpenAiCompatProvider::new(config.provider.base_url.clone())),
        GatewayOptions {
            timeout: Duration::from_secs(config.provider.timeout_secs),
            ..Default::default()
        },
    ));

    // ── Sandbox ────────────────────────────────────────────────
    let workspace = config.sandbox.workspace_root.clone();
    let gate = Arc::new(SubAgentGate::new(config.sandbox.max_sub_agents));
    let mut sandbox = Sandbox::new(Duration::from_secs(config.sandbox.tool_timeout_secs));
    sandbox.register(Arc::new(ShellTool::new(workspace.clone())?));
    sandbox.register(Arc::new(FileReadTool::new(workspace.clone())));
    sandbox.register(Arc::new(FileWriteTool::new(workspace)));
    sandbox.register(Arc::new(WebFetchTool::new()?));
    sandbox.register(Arc::new(SubAgentTool::new(
        gate,
        Arc::clone(&gateway),
        credentials.clone(),
        config.provider.model.clone(),
        cancel.clone(),
    )));

    // ── Agent loop ─────────────────────────────────────────────
    let agent = Arc::new(AgentLoop::new(
        store,
        memory,
        Arc::clone(&gateway),
        Arc::new(sandbox),
        credentials,
        LoopOptions {
            model: config.provider.model.clone(),
            system_prompt: config.agent.system_prompt.clone(),
            max_iterations: config.agent.max_iterations,
            tool_result_max_bytes: config.agent.tool_result_max_bytes,
            consolidate_after_turns: config.agent.consolidate_after_turns,
            max_tokens: config.provider.max_tokens,
            temperature: config.provider.temperature,
            ..Default::default()
        },
    ));

    // ── Channels ───────────────────────────────────────────────
    let (mut manager, inbound_rx) = ChannelManager::new(ManagerOptions::default(), cancel.clone());
    let mut registered = 0usize;
    for (id, ch) in &config.channels {
        if !ch.enabled {
            continue;
        }
        match ch.transport.as_str() {
            "telegram" => {
                if let Some(token) = ch.settings.get("token").and_then(|v| v.as_str()) {
                    manager.register(
                        Arc::new(TelegramAdapter::new(id.clone(), token)),
                        ch.access.clone(),
                    );
                    registered += 1;
                } else {
                    warn!(channel = %id, "telegram channel has no token configured");
                }
            }
            other => {
                warn!(channel = %id, transport = other, "transport not supported yet");
            }
        }
    }
    if registered == 0 {
        warn!("no channels registered; only scheduled jobs will produce activity");
    }

    let manager = Arc::new(manager);
    let adapter_tasks = manager.spawn_adapters();
    let outbound = manager.spawn_outbound();

    // ── Dispatcher ─────────────────────────────────────────────
    let dispatcher = Dispatcher::new(Arc::clone(&agent), outbound.clone(), cancel.clone());
    let dispatcher_task = tokio::spawn(dispatcher.run(inbound_rx));

    // ── Scheduler ──────────────────────────────────────────────
    let jobs = Arc::new(JobStore::open(&config.store.state_dir)?);
    ensure_heartbeat_jobs(&config, &jobs)?;

    let idle_after = config.scheduler.heartbeat_secs.max(300) as i64;
    let runner = Arc::new(AgentJobRunner::new(
        Arc::clone(&agent),
        outbound,
        idle_after,
    ));
    let scheduler_task = tokio::spawn(
        Scheduler::new(
            jobs,
            runner,
            SchedulerOptions {
                tick: Duration::from_secs(config.scheduler.tick_secs),
                job_timeout: Duration::from_secs(config.scheduler.job_timeout_secs),
            },
            cancel.clone(),
        )
        .run(),
    );

    info!("courier is up");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    cancel.cancel();

    let drain = async {
        for task in adapter_tasks {
            let _ = task.await;
        }
        let _ = dispatcher_task.await;
        let _ = scheduler_task.await;
    };
    if tokio::time::timeout(Duration::from_secs(5), drain).await.is_err() {
        warn!("shutdown drain timed out");
    }
    Ok(())
}

/// Make sure every channel that asks for an idle heartbeat has its interval
/// job in the store. Existing jobs are left alone, so restart never resets
/// their timers.
fn ensure_heartbeat_jobs(config: &CourierConfig, jobs: &JobStore) -> Result<()> {
    if config.scheduler.heartbeat_secs == 0 {
        return Ok(());
    }
    let existing = jobs.list();
    for (id, ch) in &config.channels {
        if !ch.enabled {
            continue;
        }
        let Some(chat) = ch.settings.get("heartbeat_chat").and_then(|v| v.as_str()) else {
            continue;
        };
        let label = format!("heartbeat:{id}");
        if existing.iter().any(|j| j.label.as_deref() == Some(&label)) {
            continue;
        }
        let job = jobs.add_interval(
            HEARTBEAT_PROMPT,
            config.scheduler.heartbeat_secs,
            id.clone(),
            SessionKey::new(&ch.transport, chat),
            Some(label),
        )?;
        info!(channel = %id, job = %job.id, "heartbeat job created");
    }
    Ok(())
}
