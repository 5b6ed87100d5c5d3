use std::io::{self, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::Store;
use crate::models::UpcomingEvent;

pub const DIGEST_INTRO: &str = "_Here are the upcoming Spokane Tech events for this week:_";
const DIGEST_WINDOW_DAYS: i64 = 7;
const LOCAL_TIMESTAMP_FORMAT: &str = "%A, %B %-d at %-I:%M %p";

/// How event start times are rendered in the digest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestTimestamps {
    /// `<t:UNIX:F>`, rendered by Discord in each reader's own zone.
    #[default]
    Discord,
    /// Plain text in the configured zone.
    Local,
}

/// Outbound channel for a finished message.
pub trait Sender {
    fn send(&self, message: &str) -> Result<()>;
}

/// Prints the message instead of posting it.
pub struct StdoutSender;

impl Sender for StdoutSender {
    fn send(&self, message: &str) -> Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(message.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}

pub struct DigestService<'a> {
    store: &'a Store,
    sender: &'a dyn Sender,
    site_url: String,
    tz: Tz,
    timestamps: DigestTimestamps,
}

impl<'a> DigestService<'a> {
    pub fn new(store: &'a Store, sender: &'a dyn Sender, site_url: &str, tz: Tz) -> Self {
        Self {
            store,
            sender,
            site_url: site_url.to_string(),
            tz,
            timestamps: DigestTimestamps::default(),
        }
    }

    pub fn with_timestamps(mut self, timestamps: DigestTimestamps) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn send_events(&self) -> Result<usize> {
        self.send_events_at(Utc::now())
    }

    /// Sends the digest for the week starting at `now`; returns the number of events listed.
    pub fn send_events_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let events = self
            .store
            .upcoming_events(now, now + Duration::days(DIGEST_WINDOW_DAYS))
            .context("unable to load upcoming events")?;
        let message = self.format_message(&events);
        self.sender.send(&message).context("unable to send digest")?;
        info!(count = events.len(), "digest sent");
        Ok(events.len())
    }

    pub fn format_message(&self, events: &[UpcomingEvent]) -> String {
        let mut message = format!("{DIGEST_INTRO}\n\n");
        for upcoming in events {
            message.push_str(&format!("**{}**\n", self.timestamp(upcoming.event.date_time)));
            if let Some(group) = &upcoming.group_name {
                message.push_str(&format!("{group} — "));
            }
            message.push_str(&format!(
                "[{}](<{}>)\n\n",
                upcoming.event.name,
                upcoming.absolute_url(&self.site_url)
            ));
        }
        message
    }

    fn timestamp(&self, start: DateTime<Utc>) -> String {
        match self.timestamps {
            DigestTimestamps::Discord => format!("<t:{}:F>", start.timestamp()),
            DigestTimestamps::Local => start
                .with_timezone(&self.tz)
                .format(LOCAL_TIMESTAMP_FORMAT)
                .to_string(),
        }
    }
}
