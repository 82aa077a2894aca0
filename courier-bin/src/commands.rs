use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use courier_config::{ConfigLoader, CourierConfig};
use courier_core::Result;

use crate::{jobs, start};

/// Courier — multi-channel conversational agent gateway
#[derive(Parser)]
#[command(name = "courier", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to courier.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (channels + agent loop + scheduler)
    Start,
    /// Show the effective configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage scheduled jobs
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
}

#[derive(Subcommand)]
pub enum JobAction {
    /// List scheduled jobs
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Schedule a job. Exactly one of --cron, --every, --at picks the trigger.
    Add {
        /// Prompt injected into the session when the job fires
        prompt: String,
        /// Cron expression (sec min hour day month weekday [year])
        #[arg(long)]
        cron: Option<String>,
        /// Interval in seconds
        #[arg(long)]
        every: Option<u64>,
        /// One-shot fire time, RFC 3339 (e.g. 2026-09-01T09:00:00Z)
        #[arg(long)]
        at: Option<String>,
        /// Channel id the reply goes out on
        #[arg(long)]
        channel: String,
        /// Conversation on that channel
        #[arg(long)]
        conversation: String,
        /// Optional human-readable label
        #[arg(long)]
        label: Option<String>,
    },
    /// Remove a scheduled job
    Remove { id: Uuid },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = ConfigLoader::load(self.config.as_deref())?;
        self.init_logging(&config);

        match self.command {
            Commands::Start => start::cmd_start(config).await,
            Commands::Config { json } => cmd_config(config, json),
            Commands::Job { action } => jobs::cmd_job(&config, action),
        }
    }

    fn init_logging(&self, config: &CourierConfig) {
        let level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(&config.logging.level)
        };
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

        match config.logging.format.as_str() {
            "json" => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_target(true)
                .init(),
            "compact" => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .compact()
                .with_target(false)
                .init(),
            _ => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init(),
        }
    }
}

fn cmd_config(config: CourierConfig, json: bool) -> Result<()> {
    let mut shown = config;
    // Never print the key itself.
    if shown.provider.api_key.is_some() {
        shown.provider.api_key = Some("***".into());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&shown)?);
    } else {
        let rendered = toml::to_string_pretty(&shown)
            .map_err(|e| courier_core::CourierError::Config(e.to_string()))?;
        println!("{rendered}");
    }
    Ok(())
}
