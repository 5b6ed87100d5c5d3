pub mod apollo;
pub mod base;
pub mod eventbrite_api;
pub mod meetup_event;
pub mod meetup_homepage;
pub mod timezones;

pub use base::{Fetch, HttpFetcher};
pub use eventbrite_api::{EventbriteApi, EventbriteClient, EventbriteError, EventbriteScraper};
pub use meetup_event::MeetupEventScraper;
pub use meetup_homepage::MeetupHomepageScraper;

/// A source that turns one identifier (a URL, an organization id) into typed output.
pub trait Scraper: Send + Sync {
    type Output;

    fn scrape(&self, source: &str) -> anyhow::Result<Self::Output>;
}
