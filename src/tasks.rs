//! Job entry points shared by the CLI and the scheduler. Each call opens its
//! own store, so jobs can run on separate blocking threads.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::config::AppConfig;
use crate::db::Store;
use crate::digest::{DigestService, Sender};
use crate::discord::DiscordWebhook;
use crate::media::MediaStore;
use crate::scraping::{
    EventbriteScraper, Fetch, HttpFetcher, MeetupEventScraper, MeetupHomepageScraper,
};
use crate::sync::{EventService, EventbriteSync, MeetupSync, SyncReport};

pub fn open_store(config: &AppConfig) -> Result<Store> {
    let path = config.database_path();
    Store::open(&path).with_context(|| format!("unable to open database {path:?}"))
}

pub fn scrape_events_from_meetup(config: &AppConfig) -> Result<SyncReport> {
    let tz = config.tz()?;
    let store = open_store(config)?;
    let media = MediaStore::new(config.media_root());
    let fetcher: Arc<dyn Fetch> = Arc::new(HttpFetcher);

    let sync = MeetupSync::new(
        Box::new(MeetupHomepageScraper::new(fetcher.clone(), tz)),
        Box::new(MeetupEventScraper::new(fetcher, tz)),
        EventService::new(&store, &media),
    );
    finish("meetup", sync.save_events()?)
}

pub fn scrape_events_from_eventbrite(config: &AppConfig) -> Result<SyncReport> {
    let store = open_store(config)?;
    let media = MediaStore::new(config.media_root());

    // fresh scraper per run keeps the venue cache scoped to this sync
    let sync = EventbriteSync::new(
        Box::new(EventbriteScraper::from_config(config, None)?),
        EventService::new(&store, &media),
    );
    finish("eventbrite", sync.save_events()?)
}

pub fn send_events_to_discord(config: &AppConfig) -> Result<usize> {
    let webhook = DiscordWebhook::from_config(config)?;
    send_digest(config, &webhook)
}

pub fn send_digest(config: &AppConfig, sender: &dyn Sender) -> Result<usize> {
    let store = open_store(config)?;
    DigestService::new(&store, sender, &config.site_url, config.tz()?)
        .with_timestamps(config.digest_timestamps)
        .send_events()
}

fn finish(source: &str, report: SyncReport) -> Result<SyncReport> {
    info!(source, %report, "sync finished");
    if report.is_total_failure() {
        let joined = report
            .failures
            .iter()
            .map(|failure| format!("{}: {:#}", failure.source, failure.error))
            .collect::<Vec<_>>()
            .join("; ");
        bail!("{source} sync failed: {joined}");
    }
    Ok(report)
}
