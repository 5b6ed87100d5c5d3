use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use super::base::{self, Fetch, HttpFetcher};
use super::Scraper;
use crate::config::AppConfig;
use crate::models::{ImageResult, ScrapeResult, ScrapedEvent};

pub const API_BASE_URL: &str = "https://www.eventbriteapi.com/v3";
const API_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum EventbriteError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("eventbrite returned {status} {reason}")]
    Status { status: u16, reason: String },
    #[error("unexpected eventbrite payload: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextContent {
    pub text: Option<String>,
    pub html: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventbriteDateTime {
    pub utc: String,
    pub timezone: Option<String>,
    pub local: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogoOriginal {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Logo {
    pub url: Option<String>,
    pub original: Option<LogoOriginal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventbriteEvent {
    pub id: String,
    pub name: TextContent,
    pub description: Option<TextContent>,
    pub start: EventbriteDateTime,
    pub end: EventbriteDateTime,
    pub url: String,
    pub venue_id: Option<String>,
    pub logo: Option<Logo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Address {
    pub address_1: Option<String>,
    pub address_2: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Venue {
    #[serde(default)]
    pub address: Address,
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    events: Vec<EventbriteEvent>,
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    has_more_items: bool,
    continuation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescriptionResponse {
    description: String,
}

/// The subset of the Eventbrite REST API the sync needs.
pub trait EventbriteApi: Send + Sync {
    /// Live events of an organization with their logo expanded.
    fn organization_events(&self, organization_id: &str)
        -> Result<Vec<EventbriteEvent>, EventbriteError>;
    fn venue(&self, venue_id: &str) -> Result<Venue, EventbriteError>;
    /// Full HTML description of an event.
    fn event_description(&self, event_id: &str) -> Result<String, EventbriteError>;
}

/// Bearer-token HTTP client for the Eventbrite v3 API.
pub struct EventbriteClient {
    client: Client,
    token: String,
    base_url: String,
}

impl EventbriteClient {
    pub fn new(token: impl Into<String>) -> Result<Self, EventbriteError> {
        let client = Client::builder()
            .timeout(API_TIMEOUT)
            .user_agent("SpokaneTechSync/0.1 (+https://spokanetech.org)")
            .build()?;
        Ok(Self {
            client,
            token: token.into(),
            base_url: API_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, EventbriteError> {
        let url = reqwest::Url::parse_with_params(&format!("{}{}", self.base_url, path), params)
            .map_err(|err| EventbriteError::Decode(format!("invalid url for {path}: {err}")))?;
        let response = self.client.get(url).bearer_auth(&self.token).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(EventbriteError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }
        let body = response.text()?;
        serde_json::from_str(&body).map_err(|err| EventbriteError::Decode(err.to_string()))
    }
}

impl EventbriteApi for EventbriteClient {
    fn organization_events(
        &self,
        organization_id: &str,
    ) -> Result<Vec<EventbriteEvent>, EventbriteError> {
        let path = format!("/organizations/{organization_id}/events/");
        collect_pages(|continuation| self.get(&path, &events_params(continuation)))
    }

    fn venue(&self, venue_id: &str) -> Result<Venue, EventbriteError> {
        self.get(&format!("/venues/{venue_id}/"), &[])
    }

    fn event_description(&self, event_id: &str) -> Result<String, EventbriteError> {
        let response: DescriptionResponse =
            self.get(&format!("/events/{event_id}/description/"), &[])?;
        Ok(response.description)
    }
}

fn events_params(continuation: Option<&str>) -> Vec<(&'static str, &str)> {
    let mut params = vec![("status", "live"), ("expand", "logo")];
    if let Some(token) = continuation {
        params.push(("continuation", token));
    }
    params
}

/// Requests pages until `has_more_items` is false or no continuation token is returned.
fn collect_pages<F>(mut get_page: F) -> Result<Vec<EventbriteEvent>, EventbriteError>
where
    F: FnMut(Option<&str>) -> Result<EventsPage, EventbriteError>,
{
    let mut events = Vec::new();
    let mut continuation: Option<String> = None;

    loop {
        let page = get_page(continuation.as_deref())?;
        events.extend(page.events);

        continuation = match page.pagination {
            Some(Pagination {
                has_more_items: true,
                continuation: Some(next),
            }) => Some(next),
            _ => None,
        };
        if continuation.is_none() {
            return Ok(events);
        }
    }
}

/// Turns an organization's live Eventbrite events into scrape results.
///
/// Venue addresses are cached per venue id for the lifetime of the scraper, so
/// build a fresh one per sync run.
pub struct EventbriteScraper {
    api: Box<dyn EventbriteApi>,
    fetcher: Arc<dyn Fetch>,
    locations: Mutex<HashMap<String, String>>,
}

impl EventbriteScraper {
    pub fn new(api: Box<dyn EventbriteApi>, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            api,
            fetcher,
            locations: Mutex::new(HashMap::new()),
        }
    }

    /// An explicit token wins over the configured one.
    pub fn from_config(config: &AppConfig, api_token: Option<String>) -> Result<Self> {
        let token = match api_token {
            Some(token) => token,
            None => config.eventbrite_token()?,
        };
        let client = EventbriteClient::new(token)?;
        Ok(Self::new(Box::new(client), Arc::new(HttpFetcher)))
    }

    fn map_to_event(&self, event: &EventbriteEvent) -> Result<ScrapeResult> {
        let name = event
            .name
            .text
            .clone()
            .ok_or_else(|| anyhow!("event {} has no name", event.id))?;
        let start = parse_utc(&event.start.utc)?;
        let end = parse_utc(&event.end.utc)?;
        let location = match event.venue_id.as_deref() {
            Some(venue_id) => Some(self.venue_location(venue_id)?),
            None => None,
        };

        let description = match self.api.event_description(&event.id) {
            Ok(description) => Some(description),
            Err(err) => {
                warn!(external_id = %event.id, "using short description: {err}");
                event
                    .description
                    .as_ref()
                    .and_then(|description| description.html.clone())
            }
        };

        let scraped = ScrapedEvent {
            name,
            description,
            date_time: start,
            duration: Some(end - start),
            location,
            url: Some(event.url.clone()),
            external_id: event.id.clone(),
        };

        // TODO: map category_id/subcategory_id to tags once categories are fetched
        Ok(ScrapeResult {
            event: scraped,
            tags: Vec::new(),
            image: self.logo(event),
        })
    }

    fn venue_location(&self, venue_id: &str) -> Result<String> {
        if let Some(location) = self
            .locations
            .lock()
            .map_err(|_| anyhow!("venue cache poisoned"))?
            .get(venue_id)
        {
            return Ok(location.clone());
        }

        let venue = self
            .api
            .venue(venue_id)
            .with_context(|| format!("unable to look up venue {venue_id}"))?;
        let location = format_address(&venue.address);
        self.locations
            .lock()
            .map_err(|_| anyhow!("venue cache poisoned"))?
            .insert(venue_id.to_string(), location.clone());
        Ok(location)
    }

    /// Original-size logo first, then the cropped logo, then nothing.
    fn logo(&self, event: &EventbriteEvent) -> Option<ImageResult> {
        let logo = event.logo.as_ref()?;
        let candidates = [
            logo.original.as_ref().and_then(|original| original.url.clone()),
            logo.url.clone(),
        ];
        for image_url in candidates.into_iter().flatten() {
            match base::fetch_image(self.fetcher.as_ref(), &image_url) {
                Ok(image) => return Some(image),
                Err(err) => {
                    warn!(external_id = %event.id, image_url = %image_url, "logo unavailable: {err:#}")
                }
            }
        }
        None
    }
}

impl Scraper for EventbriteScraper {
    type Output = Vec<ScrapeResult>;

    fn scrape(&self, organization_id: &str) -> Result<Vec<ScrapeResult>> {
        let events = self
            .api
            .organization_events(organization_id)
            .with_context(|| format!("unable to list events for organization {organization_id}"))?;
        events.iter().map(|event| self.map_to_event(event)).collect()
    }
}

fn parse_utc(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid eventbrite timestamp {text:?}"))
}

fn format_address(address: &Address) -> String {
    let address_1 = address.address_1.as_deref().unwrap_or_default();
    let street = match address.address_2.as_deref().filter(|line| !line.is_empty()) {
        Some(address_2) => format!("{address_1} {address_2}"),
        None => address_1.to_string(),
    };
    format!(
        "{street}, {}, {} {}",
        address.city.as_deref().unwrap_or_default(),
        address.region.as_deref().unwrap_or_default(),
        address.postal_code.as_deref().unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraping::base::testing::FixtureFetcher;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ORGANIZATION_ID: &str = "72020528223";
    const ORIGINAL_LOGO: &str = "https://img.evbuc.com/https%3A%2F%2Fcdn.evbuc.com%2Fimages%2F700%2F1%2Foriginal.20240301.png?auto=format";
    const CROPPED_LOGO: &str = "https://img.evbuc.com/images/700/cropped.png";

    const EVENTS_RESPONSE: &str = r#"{
      "pagination": {"object_count": 3, "page_number": 1, "page_size": 50, "page_count": 1, "has_more_items": false},
      "events": [
        {
          "id": "859270829537",
          "name": {"text": "Cybersecurity Mixer", "html": "Cybersecurity Mixer"},
          "description": {"text": "Meet local security folks.", "html": "<p>Meet local security folks.</p>"},
          "url": "https://www.eventbrite.com/e/cybersecurity-mixer-tickets-859270829537",
          "start": {"timezone": "America/Los_Angeles", "local": "2024-04-04T17:00:00", "utc": "2024-04-05T00:00:00Z"},
          "end": {"timezone": "America/Los_Angeles", "local": "2024-04-04T19:00:00", "utc": "2024-04-05T02:00:00Z"},
          "venue_id": "203385563",
          "logo": {"url": "https://img.evbuc.com/images/700/cropped.png", "original": {"url": "https://img.evbuc.com/https%3A%2F%2Fcdn.evbuc.com%2Fimages%2F700%2F1%2Foriginal.20240301.png?auto=format"}}
        },
        {
          "id": "859270829538",
          "name": {"text": "Cybersecurity Mixer (May)", "html": "Cybersecurity Mixer (May)"},
          "description": {"text": "Short May blurb.", "html": "<p>Short May blurb.</p>"},
          "url": "https://www.eventbrite.com/e/cybersecurity-mixer-tickets-859270829538",
          "start": {"timezone": "America/Los_Angeles", "local": "2024-05-02T17:00:00", "utc": "2024-05-03T00:00:00Z"},
          "end": {"timezone": "America/Los_Angeles", "local": "2024-05-02T19:30:00", "utc": "2024-05-03T02:30:00Z"},
          "venue_id": "203385563",
          "logo": {"url": "https://img.evbuc.com/images/700/cropped.png", "original": {"url": "https://img.evbuc.com/missing-original.png"}}
        },
        {
          "id": "859270829539",
          "name": {"text": "Online Briefing", "html": "Online Briefing"},
          "url": "https://www.eventbrite.com/e/online-briefing-tickets-859270829539",
          "start": {"utc": "2024-05-10T16:00:00Z"},
          "end": {"utc": "2024-05-10T17:00:00Z"},
          "venue_id": null,
          "logo": null
        }
      ]
    }"#;

    struct FakeApi {
        venue_calls: Arc<AtomicUsize>,
        fail_status: Option<u16>,
    }

    impl EventbriteApi for FakeApi {
        fn organization_events(
            &self,
            organization_id: &str,
        ) -> Result<Vec<EventbriteEvent>, EventbriteError> {
            assert_eq!(organization_id, ORGANIZATION_ID);
            if let Some(status) = self.fail_status {
                return Err(EventbriteError::Status {
                    status,
                    reason: "Unauthorized".to_string(),
                });
            }
            let page: EventsPage = serde_json::from_str(EVENTS_RESPONSE)
                .map_err(|err| EventbriteError::Decode(err.to_string()))?;
            Ok(page.events)
        }

        fn venue(&self, venue_id: &str) -> Result<Venue, EventbriteError> {
            assert_eq!(venue_id, "203385563");
            self.venue_calls.fetch_add(1, Ordering::SeqCst);
            serde_json::from_str(
                r#"{"address": {"address_1": "421 W Riverside Ave", "address_2": "Suite 100",
                    "city": "Spokane", "region": "WA", "postal_code": "99201"}}"#,
            )
            .map_err(|err| EventbriteError::Decode(err.to_string()))
        }

        fn event_description(&self, event_id: &str) -> Result<String, EventbriteError> {
            match event_id {
                "859270829537" => Ok("<div><p>Meet local security folks over snacks.</p></div>".to_string()),
                _ => Err(EventbriteError::Status {
                    status: 404,
                    reason: "Not Found".to_string(),
                }),
            }
        }
    }

    fn scraper(fail_status: Option<u16>) -> (EventbriteScraper, Arc<AtomicUsize>, Arc<FixtureFetcher>) {
        let venue_calls = Arc::new(AtomicUsize::new(0));
        let fetcher = Arc::new(
            FixtureFetcher::default()
                .with(ORIGINAL_LOGO, b"original".to_vec())
                .with(CROPPED_LOGO, b"cropped".to_vec()),
        );
        let api = FakeApi {
            venue_calls: venue_calls.clone(),
            fail_status,
        };
        (
            EventbriteScraper::new(Box::new(api), fetcher.clone()),
            venue_calls,
            fetcher,
        )
    }

    #[test]
    fn maps_organization_events() {
        let (scraper, venue_calls, _) = scraper(None);
        let results = scraper.scrape(ORGANIZATION_ID).expect("scrape");
        assert_eq!(results.len(), 3);

        let first = &results[0];
        assert_eq!(first.event.name, "Cybersecurity Mixer");
        assert!(first
            .event
            .description
            .as_deref()
            .expect("description")
            .starts_with("<div><p>Meet local security folks"));
        let la = chrono_tz::America::Los_Angeles;
        assert_eq!(
            first.event.date_time,
            la.with_ymd_and_hms(2024, 4, 4, 17, 0, 0).unwrap().with_timezone(&Utc)
        );
        assert_eq!(first.event.duration, Some(chrono::Duration::hours(2)));
        assert_eq!(
            first.event.location.as_deref(),
            Some("421 W Riverside Ave Suite 100, Spokane, WA 99201")
        );
        assert_eq!(
            first.event.url.as_deref(),
            Some("https://www.eventbrite.com/e/cybersecurity-mixer-tickets-859270829537")
        );
        assert_eq!(first.event.external_id, "859270829537");
        assert!(first.tags.is_empty());

        // both events share one venue
        assert_eq!(venue_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn falls_back_to_short_description() {
        let (scraper, _, _) = scraper(None);
        let results = scraper.scrape(ORGANIZATION_ID).expect("scrape");
        assert_eq!(
            results[1].event.description.as_deref(),
            Some("<p>Short May blurb.</p>")
        );
        assert_eq!(results[2].event.description, None);
        assert_eq!(results[2].event.location, None);
    }

    #[test]
    fn logo_prefers_original_then_cropped() {
        let (scraper, _, fetcher) = scraper(None);
        let results = scraper.scrape(ORGANIZATION_ID).expect("scrape");

        let first = results[0].image.as_ref().expect("original logo");
        assert_eq!(first.content, b"original");
        assert_eq!(first.name, "https%3A%2F%2Fcdn.evbuc.com%2Fimages%2F700%2F1%2Foriginal.20240301.png");

        let second = results[1].image.as_ref().expect("cropped logo");
        assert_eq!(second.content, b"cropped");
        assert_eq!(second.name, "cropped.png");
        assert_eq!(fetcher.request_count("https://img.evbuc.com/missing-original.png"), 1);

        assert!(results[2].image.is_none());
    }

    #[test]
    fn non_success_status_is_a_hard_failure() {
        let (scraper, _, _) = scraper(Some(401));
        let err = scraper.scrape(ORGANIZATION_ID).expect_err("should fail");
        let status = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<EventbriteError>())
            .expect("eventbrite error");
        assert!(matches!(status, EventbriteError::Status { status: 401, .. }));
    }

    fn page(json: &str) -> EventsPage {
        serde_json::from_str(json).expect("events page")
    }

    #[test]
    fn follows_continuation_across_pages() {
        let mut seen: Vec<Option<String>> = Vec::new();
        let events = collect_pages(|continuation| {
            seen.push(continuation.map(str::to_string));
            Ok(match continuation {
                None => page(
                    r#"{"pagination": {"has_more_items": true, "continuation": "dGhpcyBpcyBwYWdlIDE"},
                        "events": [{"id": "1", "name": {"text": "First"}, "url": "https://e/1",
                                    "start": {"utc": "2024-04-05T00:00:00Z"}, "end": {"utc": "2024-04-05T02:00:00Z"}}]}"#,
                ),
                Some(_) => page(
                    r#"{"pagination": {"has_more_items": false},
                        "events": [{"id": "2", "name": {"text": "Second"}, "url": "https://e/2",
                                    "start": {"utc": "2024-05-03T00:00:00Z"}, "end": {"utc": "2024-05-03T02:00:00Z"}}]}"#,
                ),
            })
        })
        .expect("pages");

        let ids: Vec<&str> = events.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(seen, vec![None, Some("dGhpcyBpcyBwYWdlIDE".to_string())]);
    }

    #[test]
    fn stops_when_no_more_items_despite_token() {
        let mut calls = 0;
        let events = collect_pages(|_| {
            calls += 1;
            Ok(page(
                r#"{"pagination": {"has_more_items": false, "continuation": "c3RhbGU"}, "events": []}"#,
            ))
        })
        .expect("pages");
        assert!(events.is_empty());
        assert_eq!(calls, 1);
    }

    #[test]
    fn page_errors_abort_collection() {
        let err = collect_pages(|_| {
            Err(EventbriteError::Status {
                status: 429,
                reason: "Too Many Requests".to_string(),
            })
        })
        .expect_err("status error");
        assert!(matches!(err, EventbriteError::Status { status: 429, .. }));
    }

    #[test]
    fn event_requests_ask_for_live_events_with_logo() {
        assert_eq!(events_params(None), vec![("status", "live"), ("expand", "logo")]);
        assert_eq!(
            events_params(Some("abc")),
            vec![("status", "live"), ("expand", "logo"), ("continuation", "abc")]
        );
    }

    #[test]
    fn address_without_second_line() {
        let address = Address {
            address_1: Some("1720 W 4th Ave".to_string()),
            address_2: Some(String::new()),
            city: Some("Spokane".to_string()),
            region: Some("WA".to_string()),
            postal_code: Some("99204".to_string()),
        };
        assert_eq!(format_address(&address), "1720 W 4th Ave, Spokane, WA 99204");
    }
}
