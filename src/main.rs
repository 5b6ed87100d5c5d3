use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use spokanetech_sync::{scheduler, tasks, AppConfig, StdoutSender};

#[derive(Parser)]
#[command(name = "spokanetech-sync")]
#[command(about = "Pulls Spokane tech events from Meetup and Eventbrite and posts a weekly digest")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape events into the database
    Sync {
        #[arg(value_enum, default_value = "all")]
        source: SyncSource,
    },

    /// Send this week's events to Discord
    Digest {
        /// Print the message instead of posting it
        #[arg(long)]
        dry_run: bool,
    },

    /// Run the scheduled jobs until interrupted
    Serve,

    /// Tech group management
    #[command(subcommand)]
    Groups(GroupCommand),

    /// Eventbrite organization management
    #[command(subcommand)]
    Orgs(OrgCommand),

    /// Event queries and curation
    #[command(subcommand)]
    Events(EventCommand),
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum SyncSource {
    Meetup,
    Eventbrite,
    All,
}

#[derive(Subcommand)]
enum GroupCommand {
    Add {
        name: String,
        /// Meetup groups are synced from this homepage
        #[arg(long)]
        homepage: Option<String>,
        #[arg(long, default_value = "")]
        icon: String,
        #[arg(long)]
        description: Option<String>,
        /// Tags attached to the group
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    List,
}

#[derive(Subcommand)]
enum OrgCommand {
    Add {
        /// Eventbrite organization id
        eventbrite_id: String,
        /// Name of the owning tech group
        group: String,
    },
}

#[derive(Subcommand)]
enum EventCommand {
    Upcoming {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
    /// Attach a tag by hand; syncs never remove it
    Tag { external_id: String, tag: String },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("spokanetech_sync=info")),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;

    match cli.command {
        Commands::Sync { source } => cmd_sync(&config, source),
        Commands::Digest { dry_run } => {
            let count = if dry_run {
                tasks::send_digest(&config, &StdoutSender)?
            } else {
                tasks::send_events_to_discord(&config)?
            };
            tracing::info!(count, "digest complete");
            Ok(())
        }
        Commands::Serve => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(scheduler::run(config))
        }
        Commands::Groups(cmd) => cmd_groups(&config, cmd),
        Commands::Orgs(cmd) => cmd_orgs(&config, cmd),
        Commands::Events(cmd) => cmd_events(&config, cmd),
    }
}

fn cmd_sync(config: &AppConfig, source: SyncSource) -> Result<()> {
    match source {
        SyncSource::Meetup => {
            tasks::scrape_events_from_meetup(config)?;
        }
        SyncSource::Eventbrite => {
            tasks::scrape_events_from_eventbrite(config)?;
        }
        SyncSource::All => {
            let meetup = tasks::scrape_events_from_meetup(config);
            let eventbrite = tasks::scrape_events_from_eventbrite(config);
            match (meetup, eventbrite) {
                (Err(meetup), Err(eventbrite)) => {
                    return Err(anyhow!("meetup: {meetup:#}; eventbrite: {eventbrite:#}"))
                }
                (Err(err), Ok(_)) | (Ok(_), Err(err)) => tracing::warn!("{err:#}"),
                (Ok(_), Ok(_)) => {}
            }
        }
    }
    Ok(())
}

fn cmd_groups(config: &AppConfig, cmd: GroupCommand) -> Result<()> {
    let store = tasks::open_store(config)?;
    match cmd {
        GroupCommand::Add {
            name,
            homepage,
            icon,
            description,
            tags,
        } => {
            let group = store.create_tech_group(
                &name,
                homepage.as_deref(),
                &icon,
                description.as_deref(),
            )?;
            for value in &tags {
                let tag = store.get_or_create_tag(value)?;
                store.add_tech_group_tag(group.id, tag.id)?;
            }
            println!("{} {}", group.id, group.name);
        }
        GroupCommand::List => {
            for group in store.list_tech_groups()? {
                let tags = store.tech_group_tags(group.id)?;
                println!(
                    "{}\t{} {}\t{}\t{}",
                    group.id,
                    group.icon,
                    group.name,
                    group.homepage.as_deref().unwrap_or("-"),
                    tags.join(", ")
                );
            }
        }
    }
    Ok(())
}

fn cmd_orgs(config: &AppConfig, cmd: OrgCommand) -> Result<()> {
    let store = tasks::open_store(config)?;
    match cmd {
        OrgCommand::Add {
            eventbrite_id,
            group,
        } => {
            let tech_group = store
                .tech_group_by_name(&group)?
                .ok_or_else(|| anyhow!("unknown tech group: {group}"))?;
            let org = store.create_eventbrite_organization(&eventbrite_id, &tech_group)?;
            println!("{} {} -> {}", org.id, org.eventbrite_id, org.tech_group.name);
        }
    }
    Ok(())
}

fn cmd_events(config: &AppConfig, cmd: EventCommand) -> Result<()> {
    let store = tasks::open_store(config)?;
    match cmd {
        EventCommand::Upcoming { days } => {
            let tz = config.tz()?;
            let now = Utc::now();
            let until = window_end(now, days)?;
            for upcoming in store.upcoming_events(now, until)? {
                println!(
                    "{}\t{}\t{}\t{}",
                    upcoming.event.date_time.with_timezone(&tz).format("%a %b %-d %-I:%M %p"),
                    upcoming.group_name.as_deref().unwrap_or("-"),
                    upcoming.event.name,
                    upcoming.absolute_url(&config.site_url)
                );
            }
        }
        EventCommand::Tag { external_id, tag } => {
            let event = store
                .event_by_external_id(&external_id)?
                .with_context(|| format!("no event with external id {external_id}"))?;
            let tag = store.get_or_create_tag(&tag)?;
            store.add_event_tag(event.id, tag.id)?;
            println!("{}: {}", event.name, store.event_tags(event.id)?.join(", "));
        }
    }
    Ok(())
}

fn window_end(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    TimeDelta::try_days(days)
        .and_then(|span| now.checked_add_signed(span))
        .ok_or_else(|| anyhow!("--days {days} is out of range"))
}
