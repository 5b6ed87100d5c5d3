use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};

use crate::models::ImageResult;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

static CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent("SpokaneTechSync/0.1 (+https://spokanetech.org)")
        .build()
        .expect("http client")
});

/// Raw page/blob retrieval. Swapped for fixtures in tests.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;

    fn fetch_html(&self, url: &str) -> Result<Html> {
        let body = self.fetch(url)?;
        Ok(Html::parse_document(&String::from_utf8_lossy(&body)))
    }
}

/// Blocking HTTP fetcher with a short fixed timeout. Non-2xx is an error.
#[derive(Clone, Copy, Default)]
pub struct HttpFetcher;

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = CLIENT
            .get(url)
            .send()
            .with_context(|| format!("request failed for {url}"))?;
        let response = response
            .error_for_status()
            .with_context(|| format!("non-success status for {url}"))?;
        let bytes = response
            .bytes()
            .with_context(|| format!("unable to read response body for {url}"))?;
        Ok(bytes.to_vec())
    }
}

pub fn clean_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn inner_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

/// Text exactly as it appears in the markup, line breaks included.
pub fn raw_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>()
}

pub fn first_text(html: &Html, selector: &Selector) -> Option<String> {
    html.select(selector)
        .next()
        .map(inner_text)
        .filter(|text| !text.is_empty())
}

pub fn first_attr(element: &ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::to_string)
}

/// Last path segment of an image URL with any query string removed.
pub fn image_name(image_url: &str) -> String {
    let last = image_url.rsplit('/').next().unwrap_or(image_url);
    last.split(['?', '#']).next().unwrap_or(last).to_string()
}

pub fn fetch_image(fetcher: &dyn Fetch, image_url: &str) -> Result<ImageResult> {
    let content = fetcher
        .fetch(image_url)
        .with_context(|| format!("unable to fetch image {image_url}"))?;
    Ok(ImageResult {
        name: image_name(image_url),
        content,
    })
}

/// Last non-empty path segment, used as the source-native id when the page has no state blob.
pub fn last_path_segment(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

/// ISO-8601 timestamp with or without an offset; naive values are read in `tz`.
pub fn parse_iso_datetime(text: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M%:z", "%Y-%m-%dT%H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return localize(naive, tz);
        }
    }
    None
}

pub fn localize(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(dt, _) => Some(dt.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}
