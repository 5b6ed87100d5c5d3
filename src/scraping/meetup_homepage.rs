use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::apollo::{self, ApolloState};
use super::base::{self, Fetch};
use super::timezones::AbbreviationTable;
use super::Scraper;

const UPCOMING_SECTION_ID: &str = "upcoming-section";
const EVENT_CARD_ID_MARKER: &str = "event-card-";
const CARD_TIME_FORMAT: &str = "%a, %b %d, %Y, %I:%M %p";

static TIME_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("time").expect("card time selector"));
static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("card link selector"));
// One-off events and the next occurrence of a series have numeric ids; later
// occurrences of a series use an alphanumeric slug instead.
static NUMERIC_EVENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"events/\d+(?:/|\?|#|$)").expect("numeric event regex"));

/// Lists future event URLs from a Meetup group homepage, earliest first.
pub struct MeetupHomepageScraper {
    fetcher: Arc<dyn Fetch>,
    local_tz: Tz,
    now: DateTime<Utc>,
    timezones: AbbreviationTable,
}

impl MeetupHomepageScraper {
    pub fn new(fetcher: Arc<dyn Fetch>, local_tz: Tz) -> Self {
        Self::at(fetcher, local_tz, Utc::now())
    }

    /// Scraper whose notion of "now" (and abbreviation table) is pinned to `now`.
    pub fn at(fetcher: Arc<dyn Fetch>, local_tz: Tz, now: DateTime<Utc>) -> Self {
        Self {
            fetcher,
            local_tz,
            now,
            timezones: AbbreviationTable::build(now),
        }
    }

    pub(crate) fn parse_document(&self, document: &Html) -> Result<Vec<String>> {
        let urls = match apollo::parse_apollo_state(document) {
            Some(state) => self.event_urls_from_state(&state),
            None => {
                debug!("homepage has no embedded state, reading event cards");
                self.event_urls_from_cards(document)?
            }
        };
        Ok(urls
            .into_iter()
            .filter(|url| is_next_occurrence(url))
            .collect())
    }

    fn event_urls_from_state(&self, state: &ApolloState) -> Vec<String> {
        let mut upcoming: Vec<(DateTime<Utc>, String)> = apollo::event_entries(state)
            .into_iter()
            .filter_map(|entry| {
                let start = apollo::str_field(entry, "dateTime")
                    .and_then(|text| base::parse_iso_datetime(text, self.local_tz))?;
                let url = apollo::str_field(entry, "eventUrl")?;
                Some((start, url.to_string()))
            })
            .filter(|(start, _)| *start > self.now)
            .collect();
        upcoming.sort_by_key(|(start, _)| *start);
        upcoming.into_iter().map(|(_, url)| url).collect()
    }

    fn event_urls_from_cards(&self, document: &Html) -> Result<Vec<String>> {
        let mut in_upcoming = false;
        let mut cards = Vec::new();
        for node in document.root_element().descendants() {
            let Some(element) = ElementRef::wrap(node) else {
                continue;
            };
            let id = element.value().id().unwrap_or_default();
            if !in_upcoming {
                in_upcoming = id == UPCOMING_SECTION_ID;
                continue;
            }
            if id.contains(EVENT_CARD_ID_MARKER) {
                cards.push(element);
            }
        }
        if !in_upcoming {
            bail!("homepage has neither embedded state nor an upcoming events section");
        }

        let mut upcoming = Vec::new();
        for card in cards {
            let start = self.card_start(card)?;
            if start <= self.now {
                continue;
            }
            let href = card
                .value()
                .attr("href")
                .map(str::to_string)
                .or_else(|| base::first_attr(&card, &LINK_SELECTOR, "href"))
                .ok_or_else(|| anyhow!("event card has no link"))?;
            upcoming.push((start, href));
        }
        upcoming.sort_by_key(|(start, _)| *start);
        Ok(upcoming.into_iter().map(|(_, url)| url).collect())
    }

    fn card_start(&self, card: ElementRef<'_>) -> Result<DateTime<Utc>> {
        let text = card
            .select(&TIME_SELECTOR)
            .next()
            .map(base::inner_text)
            .ok_or_else(|| anyhow!("event card has no time element"))?;
        parse_card_time(&text, &self.timezones)
            .ok_or_else(|| anyhow!("unrecognized event card time: {text:?}"))
    }
}

impl Scraper for MeetupHomepageScraper {
    type Output = Vec<String>;

    fn scrape(&self, url: &str) -> Result<Vec<String>> {
        let document = self
            .fetcher
            .fetch_html(url)
            .with_context(|| format!("unable to load homepage {url}"))?;
        self.parse_document(&document)
            .with_context(|| format!("unable to list events on {url}"))
    }
}

/// Parses `"Tue, Mar 19, 2024, 6:00 PM PDT"`.
fn parse_card_time(text: &str, timezones: &AbbreviationTable) -> Option<DateTime<Utc>> {
    let (stamp, abbreviation) = text.trim().rsplit_once(' ')?;
    let tz = timezones.resolve(abbreviation)?;
    let naive = NaiveDateTime::parse_from_str(stamp.trim(), CARD_TIME_FORMAT).ok()?;
    base::localize(naive, tz)
}

fn is_next_occurrence(url: &str) -> bool {
    NUMERIC_EVENT_RE.is_match(url)
}
