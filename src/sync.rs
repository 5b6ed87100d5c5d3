use std::fmt;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::db::Store;
use crate::media::MediaStore;
use crate::models::{ImageResult, ScrapeResult, TechGroup};
use crate::scraping::Scraper;

/// Persists scrape results: upsert by external id, additive tags, deduplicated images.
pub struct EventService<'a> {
    store: &'a Store,
    media: &'a MediaStore,
}

impl<'a> EventService<'a> {
    pub fn new(store: &'a Store, media: &'a MediaStore) -> Self {
        Self { store, media }
    }

    pub fn store(&self) -> &'a Store {
        self.store
    }

    pub fn save_event_from_result(
        &self,
        result: &ScrapeResult,
        tech_group: &TechGroup,
    ) -> Result<i64> {
        let external_id = &result.event.external_id;
        let event_id = self.store.transaction(|store| -> Result<i64> {
            // synced events skip moderation, unlike user suggestions
            let event_id = store
                .upsert_scraped_event(&result.event, Some(tech_group.id), Utc::now())
                .with_context(|| format!("unable to save event {external_id}"))?;

            self.save_tags(event_id, &result.tags)
                .with_context(|| format!("unable to tag event {external_id}"))?;
            if let Some(image) = &result.image {
                self.save_image(event_id, image)
                    .with_context(|| format!("unable to store image for event {external_id}"))?;
            }
            Ok(event_id)
        })?;

        debug!(event_id, external_id = %external_id, group = %tech_group.name, "event saved");
        Ok(event_id)
    }

    fn save_tags(&self, event_id: i64, tags: &[String]) -> Result<()> {
        for value in tags {
            let tag = self.store.get_or_create_tag(value)?;
            self.store.add_event_tag(event_id, tag.id)?;
        }
        Ok(())
    }

    fn save_image(&self, event_id: i64, image: &ImageResult) -> Result<()> {
        let event = self.store.event(event_id)?;
        if let Some(existing) = event.image.as_deref() {
            match self.media.read(existing) {
                Ok(bytes) if bytes == image.content => {
                    debug!(event_id, image = existing, "image unchanged");
                    return Ok(());
                }
                Ok(_) => {}
                Err(err) => warn!(event_id, image = existing, "stored image unreadable: {err}"),
            }
        }

        let stored = self.media.save_event_image(&image.name, &image.content)?;
        self.store.set_event_image(event_id, &stored)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct SyncFailure {
    pub source: String,
    pub error: anyhow::Error,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub saved: usize,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    fn fail(&mut self, source: &str, error: anyhow::Error) {
        warn!(source, "sync step failed: {error:#}");
        self.failures.push(SyncFailure {
            source: source.to_string(),
            error,
        });
    }

    /// Nothing saved and something went wrong.
    pub fn is_total_failure(&self) -> bool {
        self.saved == 0 && !self.failures.is_empty()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "saved={} failed={}", self.saved, self.failures.len())
    }
}

pub type HomepageScraper<'a> = Box<dyn Scraper<Output = Vec<String>> + 'a>;
pub type EventScraper<'a> = Box<dyn Scraper<Output = ScrapeResult> + 'a>;
pub type OrganizationScraper<'a> = Box<dyn Scraper<Output = Vec<ScrapeResult>> + 'a>;

/// Scrapes every Meetup-hosted group, one homepage and one event page at a time.
pub struct MeetupSync<'a> {
    homepage_scraper: HomepageScraper<'a>,
    event_scraper: EventScraper<'a>,
    service: EventService<'a>,
}

impl<'a> MeetupSync<'a> {
    pub fn new(
        homepage_scraper: HomepageScraper<'a>,
        event_scraper: EventScraper<'a>,
        service: EventService<'a>,
    ) -> Self {
        Self {
            homepage_scraper,
            event_scraper,
            service,
        }
    }

    pub fn save_events(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let groups = self.service.store().meetup_groups()?;

        for group in groups {
            let Some(homepage) = group.homepage.as_deref() else {
                continue;
            };
            let event_urls = match self.homepage_scraper.scrape(homepage) {
                Ok(urls) => urls,
                Err(err) => {
                    report.fail(homepage, err);
                    continue;
                }
            };
            info!(group = %group.name, count = event_urls.len(), "meetup events listed");

            for event_url in event_urls {
                let saved = self
                    .event_scraper
                    .scrape(&event_url)
                    .and_then(|result| self.service.save_event_from_result(&result, &group));
                match saved {
                    Ok(_) => report.saved += 1,
                    Err(err) => report.fail(&event_url, err),
                }
            }
        }

        Ok(report)
    }
}

/// Pulls live events for every configured Eventbrite organization.
pub struct EventbriteSync<'a> {
    events_scraper: OrganizationScraper<'a>,
    service: EventService<'a>,
}

impl<'a> EventbriteSync<'a> {
    pub fn new(events_scraper: OrganizationScraper<'a>, service: EventService<'a>) -> Self {
        Self {
            events_scraper,
            service,
        }
    }

    pub fn save_events(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let organizations = self.service.store().eventbrite_organizations()?;

        for organization in organizations {
            let source = format!("eventbrite:{}", organization.eventbrite_id);
            let results = match self.events_scraper.scrape(&organization.eventbrite_id) {
                Ok(results) => results,
                Err(err) => {
                    report.fail(&source, err);
                    continue;
                }
            };
            info!(
                group = %organization.tech_group.name,
                organization = %organization.eventbrite_id,
                count = results.len(),
                "eventbrite events fetched"
            );

            for result in results {
                match self
                    .service
                    .save_event_from_result(&result, &organization.tech_group)
                {
                    Ok(_) => report.saved += 1,
                    Err(err) => report.fail(&source, err),
                }
            }
        }

        Ok(report)
    }
}
