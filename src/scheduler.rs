use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::tasks;

/// Wall-clock fire times in the configured zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Daily { hour: u32, minute: u32 },
    Weekly { weekday: Weekday, hour: u32, minute: u32 },
}

impl Schedule {
    /// First fire time strictly after `now`. Local times that do not exist
    /// (DST gaps) are skipped.
    pub fn next_after(&self, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let (hour, minute) = match *self {
            Schedule::Daily { hour, minute } | Schedule::Weekly { hour, minute, .. } => {
                (hour, minute)
            }
        };
        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        let mut date = now.with_timezone(&tz).date_naive();

        for _ in 0..15 {
            let due_today = match *self {
                Schedule::Daily { .. } => true,
                Schedule::Weekly { weekday, .. } => date.weekday() == weekday,
            };
            if due_today {
                let candidate = tz
                    .from_local_datetime(&date.and_time(time))
                    .earliest()
                    .map(|local| local.with_timezone(&Utc));
                if let Some(candidate) = candidate.filter(|candidate| *candidate > now) {
                    return Some(candidate);
                }
            }
            date = date.succ_opt()?;
        }
        None
    }
}

pub struct Job {
    pub name: &'static str,
    pub schedule: Schedule,
    pub run: fn(&AppConfig) -> Result<()>,
}

pub fn default_jobs() -> Vec<Job> {
    vec![
        Job {
            name: "meetup-sync",
            schedule: Schedule::Daily { hour: 0, minute: 0 },
            run: |config| tasks::scrape_events_from_meetup(config).map(|_| ()),
        },
        Job {
            name: "eventbrite-sync",
            schedule: Schedule::Daily { hour: 0, minute: 30 },
            run: |config| tasks::scrape_events_from_eventbrite(config).map(|_| ()),
        },
        Job {
            name: "discord-digest",
            schedule: Schedule::Weekly {
                weekday: Weekday::Mon,
                hour: 0,
                minute: 0,
            },
            run: |config| tasks::send_events_to_discord(config).map(|_| ()),
        },
    ]
}

/// Runs every job on its schedule until ctrl-c.
pub async fn run(config: AppConfig) -> Result<()> {
    let tz = config.tz()?;
    let config = Arc::new(config);
    let handles: Vec<_> = default_jobs()
        .into_iter()
        .map(|job| tokio::spawn(run_job(job, config.clone(), tz)))
        .collect();

    tokio::signal::ctrl_c().await?;
    info!("shutting down scheduler");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

async fn run_job(job: Job, config: Arc<AppConfig>, tz: Tz) {
    loop {
        let now = Utc::now();
        let Some(next) = job.schedule.next_after(now, tz) else {
            warn!(job = job.name, "no future fire time, job stopped");
            return;
        };
        info!(job = job.name, next = %next.with_timezone(&tz), "job scheduled");
        tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;

        let run = job.run;
        let job_config = config.clone();
        match tokio::task::spawn_blocking(move || run(&job_config)).await {
            Ok(Ok(())) => info!(job = job.name, "job finished"),
            Ok(Err(err)) => error!(job = job.name, "job failed: {err:#}"),
            Err(err) => error!(job = job.name, "job panicked: {err}"),
        }
    }
}
