use std::collections::HashMap;
use std::path::Path;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use thiserror::Error;
use tracing::debug;

use crate::models::{Launch, LaunchStatus, StoredLaunch};
use crate::utils;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("corrupt row in launches.{column}: {detail}")]
    CorruptRow {
        column: &'static str,
        detail: String,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS launches(
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    provider_name TEXT NOT NULL,
    location_name TEXT NOT NULL,
    image_url TEXT NOT NULL,
    scheduled_time TEXT NOT NULL,
    upstream_last_modified TEXT NOT NULL,
    status TEXT NOT NULL,
    local_changed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_launches_local_changed_at ON launches(local_changed_at);
";

const SELECT_COLUMNS: &str = "SELECT id, name, provider_name, location_name, image_url,
        scheduled_time, upstream_last_modified, status, local_changed_at
 FROM launches";

/// Fixed-width UTC text so that SQL string comparison is chronological.
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Rounds up to the stored precision. Stored times are whole milliseconds, so
/// `stored < now` holds exactly when `stored < ceil_millis(now)`.
fn ceil_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = time.trunc_subsecs(3);
    if truncated == time {
        time
    } else {
        truncated + Duration::milliseconds(1)
    }
}

fn parse_time(raw: &str, column: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::CorruptRow {
            column,
            detail: format!("{raw:?}: {err}"),
        })
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        utils::ensure_parent(path)?;
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(StdDuration::from_secs(5))?;
        let store = Self { conn };
        store.initialize()?;
        debug!(path = %path.display(), "launch store opened");
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates the table and the change-marker index. Safe to call repeatedly.
    pub fn initialize(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn prune(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        prune(&self.conn, now)
    }

    pub fn load_key_set(&self) -> Result<HashMap<String, DateTime<Utc>>, StoreError> {
        load_key_set(&self.conn)
    }

    pub fn get(&self, id: &str) -> Result<Option<StoredLaunch>, StoreError> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], RawRow::from_row)?;
        match rows.next() {
            Some(raw) => Ok(Some(raw?.into_stored()?)),
            None => Ok(None),
        }
    }

    pub fn list_all(&self) -> Result<Vec<StoredLaunch>, StoreError> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY rowid");
        self.query_launches(&sql, params![])
    }

    /// Rows whose change marker falls on `today` (UTC), in insertion order.
    pub fn todays_changes(&self, today: NaiveDate) -> Result<Vec<StoredLaunch>, StoreError> {
        let start = today.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
        let end = start + Duration::days(1);
        let sql = format!(
            "{SELECT_COLUMNS}
             WHERE local_changed_at >= ?1 AND local_changed_at < ?2
             ORDER BY rowid"
        );
        self.query_launches(&sql, params![format_time(&start), format_time(&end)])
    }

    /// Opens an immediate transaction. Dropping it without `commit` rolls back.
    pub fn transaction(&mut self) -> Result<Transaction<'_>, StoreError> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    fn query_launches(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<StoredLaunch>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawRow::from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_stored()?);
        }
        Ok(out)
    }
}

/// Deletes past and cancelled rows.
pub fn prune(conn: &Connection, now: DateTime<Utc>) -> Result<usize, StoreError> {
    let removed = conn.execute(
        "DELETE FROM launches WHERE scheduled_time < ?1 OR status = ?2",
        params![format_time(&ceil_millis(now)), LaunchStatus::Cancelled.as_str()],
    )?;
    Ok(removed)
}

pub fn load_key_set(conn: &Connection) -> Result<HashMap<String, DateTime<Utc>>, StoreError> {
    let mut stmt = conn.prepare("SELECT id, scheduled_time FROM launches")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut keys = HashMap::new();
    for row in rows {
        let (id, raw) = row?;
        keys.insert(id, parse_time(&raw, "scheduled_time")?);
    }
    Ok(keys)
}

/// Flags a row as cancelled. Descriptive fields keep their last known values.
pub fn mark_cancelled(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE launches SET status = ?2, local_changed_at = ?3 WHERE id = ?1",
        params![id, LaunchStatus::Cancelled.as_str(), format_time(&now)],
    )?;
    Ok(())
}

/// Inserts a new upcoming row. A repeated id within one batch overwrites the
/// earlier row instead of failing the cycle.
pub fn insert_launch(conn: &Connection, launch: &Launch, now: DateTime<Utc>) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO launches (id, name, provider_name, location_name, image_url,
                               scheduled_time, upstream_last_modified, status, local_changed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           provider_name = excluded.provider_name,
           location_name = excluded.location_name,
           image_url = excluded.image_url,
           scheduled_time = excluded.scheduled_time,
           upstream_last_modified = excluded.upstream_last_modified,
           status = excluded.status,
           local_changed_at = excluded.local_changed_at",
        params![
            launch.id,
            launch.name,
            launch.provider_name,
            launch.location_name,
            launch.image_url,
            format_time(&launch.scheduled_time),
            format_time(&launch.upstream_last_modified),
            LaunchStatus::Upcoming.as_str(),
            format_time(&now),
        ],
    )?;
    Ok(())
}

/// Overwrites every field of a rescheduled row and returns it to upcoming.
pub fn update_launch(conn: &Connection, launch: &Launch, now: DateTime<Utc>) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE launches SET
            name = ?2,
            provider_name = ?3,
            location_name = ?4,
            image_url = ?5,
            scheduled_time = ?6,
            upstream_last_modified = ?7,
            status = ?8,
            local_changed_at = ?9
         WHERE id = ?1",
        params![
            launch.id,
            launch.name,
            launch.provider_name,
            launch.location_name,
            launch.image_url,
            format_time(&launch.scheduled_time),
            format_time(&launch.upstream_last_modified),
            LaunchStatus::Upcoming.as_str(),
            format_time(&now),
        ],
    )?;
    Ok(())
}

struct RawRow {
    id: String,
    name: String,
    provider_name: String,
    location_name: String,
    image_url: String,
    scheduled_time: String,
    upstream_last_modified: String,
    status: String,
    local_changed_at: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            provider_name: row.get(2)?,
            location_name: row.get(3)?,
            image_url: row.get(4)?,
            scheduled_time: row.get(5)?,
            upstream_last_modified: row.get(6)?,
            status: row.get(7)?,
            local_changed_at: row.get(8)?,
        })
    }

    fn into_stored(self) -> Result<StoredLaunch, StoreError> {
        let status = self
            .status
            .parse::<LaunchStatus>()
            .map_err(|detail| StoreError::CorruptRow {
                column: "status",
                detail,
            })?;
        Ok(StoredLaunch {
            launch: Launch {
                scheduled_time: parse_time(&self.scheduled_time, "scheduled_time")?,
                upstream_last_modified: parse_time(
                    &self.upstream_last_modified,
                    "upstream_last_modified",
                )?,
                id: self.id,
                name: self.name,
                provider_name: self.provider_name,
                location_name: self.location_name,
                image_url: self.image_url,
            },
            status,
            local_changed_at: parse_time(&self.local_changed_at, "local_changed_at")?,
        })
    }
}
