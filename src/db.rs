use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{
    Event, EventbriteOrganization, NewEvent, ScrapedEvent, Tag, TechGroup, UpcomingEvent,
};
use crate::utils;

const EVENT_COLUMNS: &str = "e.id, e.name, e.description, e.date_time, e.duration_seconds, \
     e.location, e.url, e.external_id, e.group_id, e.image, e.approved_at";

const GROUP_COLUMNS: &str = "g.id, g.name, g.description, g.enabled, g.homepage, g.icon";

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open_default() -> rusqlite::Result<Self> {
        Self::open(&utils::database_path())
    }

    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        utils::ensure_parent(path);
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Runs `f` inside a transaction; any error rolls back every write made through this store.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<rusqlite::Error>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS tech_groups(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                homepage TEXT,
                icon TEXT NOT NULL DEFAULT ''
            );
            CREATE TABLE IF NOT EXISTS tags(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                value TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS tech_group_tags(
                tech_group_id INTEGER NOT NULL REFERENCES tech_groups(id) ON DELETE CASCADE,
                tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (tech_group_id, tag_id)
            );
            CREATE TABLE IF NOT EXISTS events(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT,
                date_time TEXT NOT NULL,
                duration_seconds INTEGER,
                location TEXT,
                url TEXT,
                external_id TEXT UNIQUE,
                group_id INTEGER REFERENCES tech_groups(id) ON DELETE SET NULL,
                image TEXT,
                approved_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS events_date_time ON events(date_time);
            CREATE TABLE IF NOT EXISTS event_tags(
                event_id INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (event_id, tag_id)
            );
            CREATE TABLE IF NOT EXISTS eventbrite_organizations(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                eventbrite_id TEXT NOT NULL UNIQUE,
                tech_group_id INTEGER NOT NULL REFERENCES tech_groups(id) ON DELETE CASCADE
            );",
        )?;
        Ok(())
    }

    pub fn create_tech_group(
        &self,
        name: &str,
        homepage: Option<&str>,
        icon: &str,
        description: Option<&str>,
    ) -> rusqlite::Result<TechGroup> {
        self.conn.execute(
            "INSERT INTO tech_groups (name, description, enabled, homepage, icon)
             VALUES (?1, ?2, 1, ?3, ?4)",
            params![name, description, homepage, icon],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(TechGroup {
            id,
            name: name.to_string(),
            description: description.map(str::to_string),
            enabled: true,
            homepage: homepage.map(str::to_string),
            icon: icon.to_string(),
        })
    }

    pub fn tech_group_by_name(&self, name: &str) -> rusqlite::Result<Option<TechGroup>> {
        self.conn
            .query_row(
                &format!("SELECT {GROUP_COLUMNS} FROM tech_groups g WHERE g.name = ?1"),
                params![name],
                |row| group_from_row(row, 0),
            )
            .optional()
    }

    pub fn list_tech_groups(&self) -> rusqlite::Result<Vec<TechGroup>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {GROUP_COLUMNS} FROM tech_groups g ORDER BY g.name"))?;
        let rows = stmt.query_map([], |row| group_from_row(row, 0))?;
        rows.collect()
    }

    /// Groups whose homepage points at Meetup, the sync key for Meetup scraping.
    pub fn meetup_groups(&self) -> rusqlite::Result<Vec<TechGroup>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {GROUP_COLUMNS} FROM tech_groups g
             WHERE lower(g.homepage) LIKE '%meetup.com%'
             ORDER BY g.name"
        ))?;
        let rows = stmt.query_map([], |row| group_from_row(row, 0))?;
        rows.collect()
    }

    pub fn add_tech_group_tag(&self, tech_group_id: i64, tag_id: i64) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO tech_group_tags (tech_group_id, tag_id) VALUES (?1, ?2)",
            params![tech_group_id, tag_id],
        )?;
        Ok(())
    }

    pub fn tech_group_tags(&self, tech_group_id: i64) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.value FROM tags t
             JOIN tech_group_tags gt ON gt.tag_id = t.id
             WHERE gt.tech_group_id = ?1
             ORDER BY t.value",
        )?;
        let rows = stmt.query_map(params![tech_group_id], |row| row.get(0))?;
        rows.collect()
    }

    pub fn create_eventbrite_organization(
        &self,
        eventbrite_id: &str,
        tech_group: &TechGroup,
    ) -> rusqlite::Result<EventbriteOrganization> {
        self.conn.execute(
            "INSERT INTO eventbrite_organizations (eventbrite_id, tech_group_id) VALUES (?1, ?2)",
            params![eventbrite_id, tech_group.id],
        )?;
        Ok(EventbriteOrganization {
            id: self.conn.last_insert_rowid(),
            eventbrite_id: eventbrite_id.to_string(),
            tech_group: tech_group.clone(),
        })
    }

    /// Every organization with its owning group loaded in the same query.
    pub fn eventbrite_organizations(&self) -> rusqlite::Result<Vec<EventbriteOrganization>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT o.id, o.eventbrite_id, {GROUP_COLUMNS}
             FROM eventbrite_organizations o
             JOIN tech_groups g ON g.id = o.tech_group_id
             ORDER BY o.id"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(EventbriteOrganization {
                id: row.get(0)?,
                eventbrite_id: row.get(1)?,
                tech_group: group_from_row(row, 2)?,
            })
        })?;
        rows.collect()
    }

    pub fn insert_event(&self, event: &NewEvent) -> rusqlite::Result<i64> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO events (name, description, date_time, duration_seconds, location, url,
                                 external_id, group_id, approved_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, NULL, ?8, ?8)",
            params![
                event.name,
                event.description,
                event.date_time,
                event.duration.map(|d| d.num_seconds()),
                event.location,
                event.url,
                event.group_id,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn approve_event(&self, event_id: i64, approved_at: DateTime<Utc>) -> rusqlite::Result<()> {
        self.conn.execute(
            "UPDATE events SET approved_at = ?2, updated_at = ?2 WHERE id = ?1",
            params![event_id, approved_at],
        )?;
        Ok(())
    }

    /// Update-or-create keyed by external id. Tags and image are left alone.
    pub fn upsert_scraped_event(
        &self,
        event: &ScrapedEvent,
        group_id: Option<i64>,
        approved_at: DateTime<Utc>,
    ) -> rusqlite::Result<i64> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO events (name, description, date_time, duration_seconds, location, url,
                                 external_id, group_id, approved_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
             ON CONFLICT(external_id) DO UPDATE SET
               name = excluded.name,
               description = excluded.description,
               date_time = excluded.date_time,
               duration_seconds = excluded.duration_seconds,
               location = excluded.location,
               url = excluded.url,
               group_id = excluded.group_id,
               approved_at = excluded.approved_at,
               updated_at = excluded.updated_at",
            params![
                event.name,
                event.description,
                event.date_time,
                event.duration.map(|d| d.num_seconds()),
                event.location,
                event.url,
                event.external_id,
                group_id,
                approved_at,
                now
            ],
        )?;
        self.conn.query_row(
            "SELECT id FROM events WHERE external_id = ?1",
            params![event.external_id],
            |row| row.get(0),
        )
    }

    pub fn event(&self, event_id: i64) -> rusqlite::Result<Event> {
        self.conn.query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM events e WHERE e.id = ?1"),
            params![event_id],
            event_from_row,
        )
    }

    pub fn event_by_external_id(&self, external_id: &str) -> rusqlite::Result<Option<Event>> {
        self.conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events e WHERE e.external_id = ?1"),
                params![external_id],
                event_from_row,
            )
            .optional()
    }

    pub fn count_events(&self) -> rusqlite::Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
    }

    pub fn set_event_image(&self, event_id: i64, image: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            "UPDATE events SET image = ?2 WHERE id = ?1",
            params![event_id, image],
        )?;
        Ok(())
    }

    pub fn get_or_create_tag(&self, value: &str) -> rusqlite::Result<Tag> {
        self.conn.execute(
            "INSERT OR IGNORE INTO tags (value) VALUES (?1)",
            params![value],
        )?;
        self.conn.query_row(
            "SELECT id, value FROM tags WHERE value = ?1",
            params![value],
            |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    value: row.get(1)?,
                })
            },
        )
    }

    /// Associates a tag with an event. Never removes existing associations.
    pub fn add_event_tag(&self, event_id: i64, tag_id: i64) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO event_tags (event_id, tag_id) VALUES (?1, ?2)",
            params![event_id, tag_id],
        )?;
        Ok(())
    }

    pub fn event_tags(&self, event_id: i64) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.value FROM tags t
             JOIN event_tags et ON et.tag_id = t.id
             WHERE et.event_id = ?1
             ORDER BY t.value",
        )?;
        let rows = stmt.query_map(params![event_id], |row| row.get(0))?;
        rows.collect()
    }

    /// Events starting in `[from, until)`, earliest first.
    pub fn upcoming_events(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> rusqlite::Result<Vec<UpcomingEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS}, g.name
             FROM events e
             LEFT JOIN tech_groups g ON g.id = e.group_id
             WHERE e.date_time >= ?1 AND e.date_time < ?2
             ORDER BY e.date_time, e.id"
        ))?;
        let rows = stmt.query_map(params![from, until], |row| {
            Ok(UpcomingEvent {
                event: event_from_row(row)?,
                group_name: row.get(11)?,
            })
        })?;
        rows.collect()
    }
}

fn group_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<TechGroup> {
    Ok(TechGroup {
        id: row.get(offset)?,
        name: row.get(offset + 1)?,
        description: row.get(offset + 2)?,
        enabled: row.get(offset + 3)?,
        homepage: row.get(offset + 4)?,
        icon: row.get(offset + 5)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    let duration: Option<i64> = row.get(4)?;
    Ok(Event {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        date_time: row.get(3)?,
        duration: duration.map(Duration::seconds),
        location: row.get(5)?,
        url: row.get(6)?,
        external_id: row.get(7)?,
        group_id: row.get(8)?,
        image: row.get(9)?,
        approved_at: row.get(10)?,
    })
}
