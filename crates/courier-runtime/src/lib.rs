//! Courier runtime: the per-session agent loop, the inbound dispatcher,
//! and the cron/heartbeat scheduler.

pub mod agent_loop;
pub mod dispatcher;
pub mod scheduler;
pub mod session;
pub mod subagent_tool;

pub use agent_loop::{AgentLoop, LoopOptions};
pub use dispatcher::Dispatcher;
pub use scheduler::{
    AgentJobRunner, JobRunner, JobStore, ScheduledJob, Scheduler, SchedulerOptions, Trigger,
};
pub use session::SessionLocks;
pub use subagent_tool::SubAgentTool;
