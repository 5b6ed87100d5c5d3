use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use super::apollo::{self, ApolloState, Entry};
use super::base::{self, Fetch};
use super::Scraper;
use crate::models::{ScrapeResult, ScrapedEvent};

static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1").expect("meetup title selector"));
static DETAILS_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("#event-details").expect("meetup details selector"));
static TIME_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("time").expect("meetup time selector"));
static LOCATION_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[data-testid="location-info"]"#).expect("meetup location selector")
});
static TOPIC_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"a[id^="topics-link-"]"#).expect("meetup topic selector"));
static IMAGE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[data-testid="event-description-image"] img"#)
        .expect("meetup image selector")
});
static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(1?\d:\d{2} [AP]M) to (1?\d:\d{2} [AP]M)").expect("meetup duration regex")
});

/// Scrapes one Meetup event page into a normalized event, its topics, and its image.
pub struct MeetupEventScraper {
    fetcher: Arc<dyn Fetch>,
    local_tz: Tz,
}

#[derive(Debug)]
struct Details {
    name: String,
    description: Option<String>,
    date_time: DateTime<Utc>,
    duration: Option<Duration>,
    location: Option<String>,
    external_id: String,
}

impl MeetupEventScraper {
    pub fn new(fetcher: Arc<dyn Fetch>, local_tz: Tz) -> Self {
        Self { fetcher, local_tz }
    }

    /// Event fields plus the featured image URL, if any.
    pub(crate) fn parse_document(
        &self,
        url: &str,
        document: &Html,
    ) -> Result<(ScrapedEvent, Option<String>)> {
        let state = apollo::parse_apollo_state(document);
        let entry = state.as_ref().and_then(|state| select_event(state, url));

        let from_state = match (&state, entry) {
            (Some(state), Some(entry)) => self.details_from_state(state, entry),
            _ => None,
        };
        let details = match from_state {
            Some(details) => details,
            None => {
                debug!(url, "event state incomplete, reading page markup");
                self.details_from_markup(url, document)?
            }
        };

        let image_url = match (&state, entry) {
            (Some(state), Some(entry)) => featured_photo(state, entry),
            _ => None,
        }
        .or_else(|| base::first_attr(&document.root_element(), &IMAGE_SELECTOR, "src"));

        let event = ScrapedEvent {
            name: details.name,
            description: details.description,
            date_time: details.date_time,
            duration: details.duration,
            location: details.location,
            url: Some(url.to_string()),
            external_id: details.external_id,
        };
        Ok((event, image_url))
    }

    fn details_from_state(&self, state: &ApolloState, entry: &Entry) -> Option<Details> {
        let name = apollo::str_field(entry, "title")?.to_string();
        let description = entry.get("description")?.as_str().map(str::to_string);
        let date_time =
            base::parse_iso_datetime(apollo::str_field(entry, "dateTime")?, self.local_tz)?;
        let end_time =
            base::parse_iso_datetime(apollo::str_field(entry, "endTime")?, self.local_tz)?;
        let venue = apollo::resolve_ref(state, entry.get("venue"))?;
        let location = format!(
            "{}, {}, {}",
            apollo::str_field(venue, "address")?,
            apollo::str_field(venue, "city")?,
            apollo::str_field(venue, "state")?
        );
        let external_id = apollo::str_field(entry, "id")?.to_string();

        Some(Details {
            name,
            description,
            date_time,
            duration: Some(end_time - date_time),
            location: Some(location),
            external_id,
        })
    }

    fn details_from_markup(&self, url: &str, document: &Html) -> Result<Details> {
        let name = base::first_text(document, &TITLE_SELECTOR)
            .ok_or_else(|| anyhow!("could not find event title"))?;

        let time = document
            .select(&TIME_SELECTOR)
            .next()
            .ok_or_else(|| anyhow!("could not find event time"))?;
        let date_time = time
            .value()
            .attr("datetime")
            .and_then(|value| base::parse_iso_datetime(value, self.local_tz))
            .ok_or_else(|| anyhow!("could not read event datetime attribute"))?;
        let time_text = base::inner_text(time);
        let duration = parse_duration(&time_text)
            .ok_or_else(|| anyhow!("could not find duration in {time_text:?}"))?;

        let location = document
            .select(&LOCATION_SELECTOR)
            .next()
            .map(|node| normalize_location(&base::raw_text(node)))
            .filter(|location| !location.is_empty())
            .ok_or_else(|| anyhow!("could not find event location"))?;

        let external_id = base::last_path_segment(url)
            .ok_or_else(|| anyhow!("could not derive event id from {url}"))?;

        Ok(Details {
            name,
            description: parse_description(document),
            date_time,
            duration: Some(duration),
            location: Some(location),
            external_id,
        })
    }
}

impl Scraper for MeetupEventScraper {
    type Output = ScrapeResult;

    fn scrape(&self, url: &str) -> Result<ScrapeResult> {
        let document = self
            .fetcher
            .fetch_html(url)
            .with_context(|| format!("unable to load event page {url}"))?;
        let (event, image_url) = self
            .parse_document(url, &document)
            .with_context(|| format!("unable to read event page {url}"))?;
        let tags = parse_tags(&document);

        let image = image_url.and_then(|image_url| {
            match base::fetch_image(self.fetcher.as_ref(), &image_url) {
                Ok(image) => Some(image),
                Err(err) => {
                    warn!(url, image_url = %image_url, "skipping event image: {err:#}");
                    None
                }
            }
        });

        Ok(ScrapeResult { event, tags, image })
    }
}

/// The entry for this page's event: matched by id when possible, else the first one.
fn select_event<'a>(state: &'a ApolloState, url: &str) -> Option<&'a Entry> {
    let entries = apollo::event_entries(state);
    let wanted = base::last_path_segment(url);
    entries
        .iter()
        .find(|entry| apollo::str_field(entry, "id") == wanted.as_deref())
        .or_else(|| entries.first())
        .copied()
}

fn featured_photo(state: &ApolloState, entry: &Entry) -> Option<String> {
    let photo = apollo::resolve_ref(state, entry.get("featuredEventPhoto"))?;
    apollo::str_field(photo, "highResUrl")
        .or_else(|| apollo::str_field(photo, "baseUrl"))
        .map(str::to_string)
}

fn parse_description(document: &Html) -> Option<String> {
    let node = document.select(&DETAILS_SELECTOR).next()?;
    let text = base::raw_text(node);
    let text = text.trim_start();
    let text = text.strip_prefix("Details").unwrap_or(text).trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// `"6:00 PM to 7:30 PM"` inside the time element's text. Spans past midnight wrap.
fn parse_duration(text: &str) -> Option<Duration> {
    let captures = DURATION_RE.captures(text)?;
    let start = NaiveTime::parse_from_str(captures.get(1)?.as_str(), "%I:%M %p").ok()?;
    let end = NaiveTime::parse_from_str(captures.get(2)?.as_str(), "%I:%M %p").ok()?;
    let mut duration = end - start;
    if duration < Duration::zero() {
        duration = duration + Duration::days(1);
    }
    Some(duration)
}

fn normalize_location(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
        .replace(" Â· ", ", ")
        .replace(" · ", ", ")
}

fn parse_tags(document: &Html) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for link in document.select(&TOPIC_SELECTOR) {
        let tag = base::inner_text(link);
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraping::base::testing::FixtureFetcher;
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    const EVENT_URL: &str = "https://www.meetup.com/python-spokane/events/298213205/";
    const PHOTO_URL: &str =
        "https://secure.meetupstatic.com/photos/event/4/1/e/a/highres_519844270.jpeg";
    const LA: Tz = chrono_tz::America::Los_Angeles;

    const TOPICS: &str = r#"
  <div id="topics">
    <a id="topics-link-0" href="/find/?keywords=linux">Linux</a>
    <a id="topics-link-1" href="/find/?keywords=python">Python</a>
    <a id="topics-link-2" href="/find/?keywords=django">Django</a>
    <a id="topics-link-3" href="/find/?keywords=python-web">Python Web
        Development</a>
    <a id="topics-link-4" href="/find/?keywords=agile">Agile and Scrum</a>
  </div>"#;

    fn page_with_json() -> String {
        format!(
            r#"<!DOCTYPE html>
<html><head>
<script id="__NEXT_DATA__" type="application/json">
{{"props": {{"pageProps": {{"__APOLLO_STATE__": {{
  "Event:298213205": {{
    "id": "298213205",
    "title": "Dagger with Spokane Tech 🚀",
    "description": "Join us for our monthly SPUG meetup! This month we are looking at Dagger.",
    "dateTime": "2024-03-19T18:00:00-07:00",
    "endTime": "2024-03-19T19:30:00-07:00",
    "eventUrl": "{EVENT_URL}",
    "venue": {{"__ref": "Venue:27435245"}},
    "featuredEventPhoto": {{"__ref": "PhotoInfo:519844270"}}
  }},
  "Venue:27435245": {{"address": "1720 W 4th Ave Unit B", "city": "Spokane", "state": "WA"}},
  "PhotoInfo:519844270": {{"baseUrl": "https://secure.meetupstatic.com/photos/event/4/1/e/a/",
                           "highResUrl": "{PHOTO_URL}"}}
}}}}}}}}
</script>
</head><body>
  <h1>Dagger with Spokane Tech 🚀</h1>
  {TOPICS}
</body></html>"#
        )
    }

    fn page_without_json() -> String {
        format!(
            r#"<!DOCTYPE html>
<html><body>
  <h1 class="overflow-hidden">
      Dagger with Spokane Tech 🚀
  </h1>
  <div id="event-details">
    <h2>Details</h2>
    <p>Join us for our monthly SPUG meetup! This month we are looking at Dagger.</p>
  </div>
  <div class="event-info">
    <time datetime="2024-03-19T18:00:00-07:00">Tuesday, March 19, 2024 6:00 PM to 7:30 PM PDT</time>
    <div data-testid="location-info">
      1720 W 4th Ave Unit B · Spokane, WA
    </div>
  </div>
  <div data-testid="event-description-image">
    <picture><img src="https://secure.meetupstatic.com/photos/event/4/1/e/a/highres_519844270.webp?w=750"></picture>
  </div>
  {TOPICS}
</body></html>"#
        )
    }

    fn expected_tags() -> BTreeSet<String> {
        ["Linux", "Python", "Django", "Python Web Development", "Agile and Scrum"]
            .iter()
            .map(|tag| tag.to_string())
            .collect()
    }

    fn assert_dagger_event(event: &ScrapedEvent) {
        assert_eq!(event.name, "Dagger with Spokane Tech 🚀");
        assert!(event
            .description
            .as_deref()
            .expect("description")
            .starts_with("Join us for our monthly SPUG meetup!"));
        assert_eq!(
            event.date_time,
            LA.with_ymd_and_hms(2024, 3, 19, 18, 0, 0)
                .unwrap()
                .with_timezone(&Utc)
        );
        assert_eq!(event.duration, Some(Duration::minutes(90)));
        assert_eq!(
            event.location.as_deref(),
            Some("1720 W 4th Ave Unit B, Spokane, WA")
        );
        assert_eq!(event.url.as_deref(), Some(EVENT_URL));
        assert_eq!(event.external_id, "298213205");
    }

    #[test]
    fn scrapes_event_from_embedded_state() {
        let fetcher = FixtureFetcher::default()
            .with(EVENT_URL, page_with_json())
            .with(PHOTO_URL, b"jpeg bytes".to_vec());
        let scraper = MeetupEventScraper::new(Arc::new(fetcher), LA);

        let result = scraper.scrape(EVENT_URL).expect("scrape event");
        assert_dagger_event(&result.event);
        assert_eq!(result.tags.into_iter().collect::<BTreeSet<_>>(), expected_tags());

        let image = result.image.expect("image");
        assert_eq!(image.name, "highres_519844270.jpeg");
        assert_eq!(image.content, b"jpeg bytes");
    }

    #[test]
    fn scrapes_event_from_markup() {
        let fetcher = FixtureFetcher::default().with(EVENT_URL, page_without_json());
        let scraper = MeetupEventScraper::new(Arc::new(fetcher), LA);

        let result = scraper.scrape(EVENT_URL).expect("scrape event");
        assert_dagger_event(&result.event);
        assert_eq!(result.tags.into_iter().collect::<BTreeSet<_>>(), expected_tags());
        // the image URL is not served by the fixture; a failed image fetch is not fatal
        assert!(result.image.is_none());
    }

    #[test]
    fn both_paths_agree() {
        let scraper = MeetupEventScraper::new(Arc::new(FixtureFetcher::default()), LA);
        let (from_state, state_image) = scraper
            .parse_document(EVENT_URL, &Html::parse_document(&page_with_json()))
            .expect("json page");
        let (from_markup, markup_image) = scraper
            .parse_document(EVENT_URL, &Html::parse_document(&page_without_json()))
            .expect("markup page");

        assert_eq!(from_state.name, from_markup.name);
        assert_eq!(from_state.date_time, from_markup.date_time);
        assert_eq!(from_state.duration, from_markup.duration);
        assert_eq!(from_state.location, from_markup.location);
        assert_eq!(from_state.external_id, from_markup.external_id);
        assert_eq!(state_image.as_deref(), Some(PHOTO_URL));
        assert!(markup_image.expect("markup image").ends_with(".webp?w=750"));
    }

    #[test]
    fn incomplete_state_falls_back_to_markup() {
        // online events carry no venue reference in the state blob
        let page = page_without_json().replace(
            "<html><body>",
            r#"<html><head><script id="__NEXT_DATA__">{"props": {"pageProps": {"__APOLLO_STATE__": {
                "Event:298213205": {"id": "298213205", "title": "Dagger", "venue": null}}}}}</script></head><body>"#,
        );
        let scraper = MeetupEventScraper::new(Arc::new(FixtureFetcher::default()), LA);
        let (event, _) = scraper
            .parse_document(EVENT_URL, &Html::parse_document(&page))
            .expect("fallback");
        assert_dagger_event(&event);
    }

    #[test]
    fn page_without_event_data_is_an_error() {
        let fetcher = FixtureFetcher::default().with(EVENT_URL, "<html><body><p>gone</p></body></html>");
        let scraper = MeetupEventScraper::new(Arc::new(fetcher), LA);
        assert!(scraper.scrape(EVENT_URL).is_err());
    }

    #[test]
    fn durations_wrap_past_midnight() {
        assert_eq!(
            parse_duration("Friday 10:00 PM to 1:00 AM"),
            Some(Duration::hours(3))
        );
        assert_eq!(parse_duration("All day"), None);
    }

    #[test]
    fn location_lines_and_middots_become_commas() {
        assert_eq!(
            normalize_location("\n  Spokane Tech Hub\n  1720 W 4th Ave Unit B Â· Spokane, WA\n"),
            "Spokane Tech Hub, 1720 W 4th Ave Unit B, Spokane, WA"
        );
    }
}
