//! Extraction of the client-side hydration state Meetup embeds in its pages.
//!
//! Meetup serves either a JSON-hydrated page (a `__NEXT_DATA__` script carrying
//! the Apollo cache) or a server-rendered page without it. Absence of the blob is
//! the normal trigger for DOM parsing, so every lookup here returns `Option`.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use tracing::debug;

use super::base;

/// Apollo cache entries keyed by `"<Type>:<id>"`.
pub type ApolloState = Map<String, Value>;
pub type Entry = Map<String, Value>;

static NEXT_DATA_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script#__NEXT_DATA__").expect("next data selector"));

pub fn parse_apollo_state(document: &Html) -> Option<ApolloState> {
    let script = document.select(&NEXT_DATA_SELECTOR).next()?;
    let raw = base::raw_text(script);
    let mut next_data: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            debug!("embedded state is not valid json: {err}");
            return None;
        }
    };
    match next_data
        .pointer_mut("/props/pageProps/__APOLLO_STATE__")?
        .take()
    {
        Value::Object(state) if !state.is_empty() => Some(state),
        _ => None,
    }
}

/// All entries whose key type-prefix is `Event`.
pub fn event_entries(state: &ApolloState) -> Vec<&Entry> {
    state
        .iter()
        .filter(|(key, _)| key.split(':').next() == Some("Event"))
        .filter_map(|(_, value)| value.as_object())
        .collect()
}

/// Follows a `{"__ref": "<Type>:<id>"}` pointer to the referenced entry.
pub fn resolve_ref<'a>(state: &'a ApolloState, reference: Option<&Value>) -> Option<&'a Entry> {
    let key = reference?.get("__ref")?.as_str()?;
    state.get(key)?.as_object()
}

pub fn str_field<'a>(entry: &'a Entry, key: &str) -> Option<&'a str> {
    entry.get(key).and_then(Value::as_str)
}
