use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TechGroup {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub homepage: Option<String>,
    pub icon: String, // emoji or css icon class(es)
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EventbriteOrganization {
    pub id: i64,
    pub eventbrite_id: String,
    pub tech_group: TechGroup,
}

/// A persisted event row.
///
/// `approved_at == None` marks a pending suggestion that has not been
/// reviewed yet; synced events are approved on write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub date_time: DateTime<Utc>,
    pub duration: Option<Duration>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub external_id: Option<String>,
    pub group_id: Option<i64>,
    pub image: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub struct UpcomingEvent {
    pub event: Event,
    pub group_name: Option<String>,
}

impl UpcomingEvent {
    pub fn absolute_url(&self, site_url: &str) -> String {
        match &self.event.url {
            Some(url) if !url.trim().is_empty() => url.clone(),
            _ => format!("{}/events/{}", site_url.trim_end_matches('/'), self.event.id),
        }
    }
}

/// Event fields as normalized by a scraper, before persistence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScrapedEvent {
    pub name: String,
    pub description: Option<String>,
    pub date_time: DateTime<Utc>,
    pub duration: Option<Duration>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub external_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageResult {
    pub name: String,
    pub content: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct ScrapeResult {
    pub event: ScrapedEvent,
    pub tags: Vec<String>,
    pub image: Option<ImageResult>,
}

/// Suggested event submitted by a user; stored unapproved.
#[derive(Clone, Debug)]
pub struct NewEvent {
    pub name: String,
    pub description: Option<String>,
    pub date_time: DateTime<Utc>,
    pub duration: Option<Duration>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub group_id: Option<i64>,
}
