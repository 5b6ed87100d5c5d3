use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::blocking::Client;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::config::AppConfig;
use crate::digest::Sender;

/// Discord rejects message content longer than this many characters.
pub const MESSAGE_LIMIT: usize = 2000;

static CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("discord client")
});

#[derive(Debug, Error)]
pub enum DiscordError {
    #[error("missing discord webhook url")]
    MissingWebhook,
    #[error("http error: {0}")]
    Http(String),
    #[error("discord api error ({status}): {body}")]
    Api { status: u16, body: String },
}

pub struct DiscordWebhook {
    url: String,
}

impl DiscordWebhook {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, DiscordError> {
        let url = config
            .discord_webhook_url
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();
        if url.is_empty() {
            return Err(DiscordError::MissingWebhook);
        }
        Ok(Self::new(url))
    }

    pub fn post(&self, message: &str) -> Result<(), DiscordError> {
        for chunk in split_message(message, MESSAGE_LIMIT) {
            self.post_chunk(&chunk)?;
        }
        Ok(())
    }

    fn post_chunk(&self, content: &str) -> Result<(), DiscordError> {
        let response = CLIENT
            .post(&self.url)
            .json(&json!({ "content": content }))
            .send()
            .map_err(|err| DiscordError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(DiscordError::Api {
                status: status.as_u16(),
                body,
            });
        }
        debug!(chars = content.chars().count(), "discord message posted");
        Ok(())
    }
}

impl Sender for DiscordWebhook {
    fn send(&self, message: &str) -> anyhow::Result<()> {
        Ok(self.post(message)?)
    }
}

/// Splits on blank lines so each event block stays whole; blocks that are
/// themselves too long are cut at character boundaries.
pub fn split_message(message: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for block in message.split_inclusive("\n\n") {
        if current.chars().count() + block.chars().count() > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if block.chars().count() > limit {
            let chars: Vec<char> = block.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(block);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
