use chrono::{DateTime, Utc};

use courier_config::CourierConfig;
use courier_core::{CourierError, Result, SessionKey};
use courier_runtime::JobStore;

use crate::commands::JobAction;

pub(crate) fn cmd_job(config: &CourierConfig, action: JobAction) -> Result<()> {
    let jobs = JobStore::open(&config.store.state_dir)?;

    match action {
        JobAction::List { json } => {
            let mut list = jobs.list();
            list.sort_by_key(|j| j.next_fire);
            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
                return Ok(());
            }
            if list.is_empty() {
                println!("no scheduled jobs");
                return Ok(());
            }
            for job in list {
                println!(
                    "{}  {}  next {}  fired {}x{}  {}",
                    job.id,
                    if job.enabled { "on " } else { "off" },
                    job.next_fire.format("%Y-%m-%d %H:%M:%S UTC"),
                    job.fire_count,
                    job.label
                        .as_deref()
                        .map(|l| format!("  [{l}]"))
                        .unwrap_or_default(),
                    job.prompt.chars().take(60).collect::<String>(),
                );
            }
            Ok(())
        }

        JobAction::Add {
            prompt,
            cron,
            every,
            at,
            channel,
            conversation,
            label,
        } => {
            let ch = config.channels.get(&channel).ok_or_else(|| {
                CourierError::Config(format!("unknown channel '{channel}' in configuration"))
            })?;
            let key = SessionKey::new(&ch.transport, &conversation);

            let job = match (cron, every, at) {
                (Some(expr), None, None) => jobs.add_cron(prompt, &expr, channel, key, label)?,
                (None, Some(secs), None) => {
                    jobs.add_interval(prompt, secs, channel, key, label)?
                }
                (None, None, Some(at)) => {
                    let at = DateTime::parse_from_rfc3339(&at)
                        .map_err(|e| {
                            CourierError::Config(format!("invalid --at timestamp: {e}"))
                        })?
                        .with_timezone(&Utc);
                    jobs.add_once(prompt, at, channel, key, label)?
                }
                _ => {
                    return Err(CourierError::Config(
                        "exactly one of --cron, --every, --at is required".into(),
                    ));
                }
            };
            println!("scheduled job {} (next fire {})", job.id, job.next_fire);
            Ok(())
        }

        JobAction::Remove { id } => {
            jobs.remove(id)?;
            println!("removed job {id}");
            Ok(())
        }
    }
}
