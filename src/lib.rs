pub mod config;
pub mod db;
pub mod digest;
pub mod discord;
pub mod media;
pub mod models;
pub mod scheduler;
pub mod scraping;
pub mod sync;
pub mod tasks;
mod utils;

pub use config::AppConfig;
pub use db::Store;
pub use digest::{DigestService, DigestTimestamps, Sender, StdoutSender};
pub use discord::DiscordWebhook;
pub use media::MediaStore;
pub use sync::{EventService, EventbriteSync, MeetupSync, SyncReport};
