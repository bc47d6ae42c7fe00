//! SQLite persistence for the prediction pool.
//!
//! Single-file database in WAL mode behind a `parking_lot` mutex. All SQL
//! lives here (row mapping included) except the lock-field updates, which
//! belong to the lock state machine. Batch operations run inside immediate
//! transactions obtained from [`PoolStore::with_tx`]; dropping the
//! transaction without commit rolls every write back.

use crate::models::{
    Achievement, AchievementKind, CatalogOption, Choice, Event, HotnessRecord, KudosGrant,
    LockStatus, Outcome, Score, Season, Selection, Tip, User,
};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT UNIQUE NOT NULL,
    registered_at TEXT NOT NULL,
    is_privileged INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS seasons (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    points INTEGER NOT NULL DEFAULT 1,
    deadline TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT 'manual',
    external_ref TEXT,
    is_active INTEGER NOT NULL DEFAULT 1
);

-- Stable per-source identifier so repeated syncs upsert instead of duplicate.
CREATE UNIQUE INDEX IF NOT EXISTS idx_events_external_ref
    ON events(external_ref) WHERE external_ref IS NOT NULL;

CREATE TABLE IF NOT EXISTS options (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    slug TEXT UNIQUE NOT NULL,
    label TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS choices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id INTEGER NOT NULL REFERENCES events(id),
    label TEXT NOT NULL,
    option_id INTEGER REFERENCES options(id),
    sort_order INTEGER NOT NULL DEFAULT 0,
    UNIQUE(event_id, label)
);

CREATE TABLE IF NOT EXISTS tips (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    event_id INTEGER NOT NULL REFERENCES events(id),
    choice_id INTEGER REFERENCES choices(id),
    option_id INTEGER REFERENCES options(id),
    lock_status TEXT NOT NULL DEFAULT 'none',
    lock_committed_at TEXT,
    lock_released_at TEXT,
    lock_forfeited_at TEXT,
    lock_releases_at TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(user_id, event_id)
);

CREATE INDEX IF NOT EXISTS idx_tips_event ON tips(event_id);
CREATE INDEX IF NOT EXISTS idx_tips_user_status ON tips(user_id, lock_status);

CREATE TABLE IF NOT EXISTS outcomes (
    event_id INTEGER PRIMARY KEY REFERENCES events(id),
    winning_choice_id INTEGER REFERENCES choices(id),
    winning_option_id INTEGER REFERENCES options(id),
    is_forfeit INTEGER NOT NULL DEFAULT 0,
    resolved_at TEXT NOT NULL,
    scored_at TEXT,
    score_note TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_outcomes_resolved ON outcomes(resolved_at DESC);

CREATE TABLE IF NOT EXISTS scores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    event_id INTEGER NOT NULL REFERENCES events(id),
    base_points INTEGER NOT NULL,
    lock_multiplier INTEGER NOT NULL,
    points_awarded INTEGER NOT NULL,
    is_lock_bonus INTEGER NOT NULL DEFAULT 0,
    awarded_at TEXT NOT NULL,
    UNIQUE(user_id, event_id)
);

CREATE INDEX IF NOT EXISTS idx_scores_awarded ON scores(awarded_at);

CREATE TABLE IF NOT EXISTS hotness (
    user_id INTEGER NOT NULL REFERENCES users(id),
    season_id INTEGER REFERENCES seasons(id),
    score REAL NOT NULL DEFAULT 0,
    last_decay_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_hotness_user_season
    ON hotness(user_id, IFNULL(season_id, 0));

CREATE TABLE IF NOT EXISTS kudos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    giver_id INTEGER NOT NULL REFERENCES users(id),
    receiver_id INTEGER NOT NULL REFERENCES users(id),
    season_id INTEGER REFERENCES seasons(id),
    granted_on TEXT,
    granted_at TEXT NOT NULL
);

-- Daily rate limit. Privileged grants store a NULL day, and NULLs compare
-- distinct, so the constraint only ever fires for regular users.
CREATE UNIQUE INDEX IF NOT EXISTS idx_kudos_daily
    ON kudos(giver_id, receiver_id, granted_on);

CREATE TABLE IF NOT EXISTS achievements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    season_id INTEGER REFERENCES seasons(id),
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    emoji TEXT NOT NULL,
    awarded_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_achievements_unique
    ON achievements(user_id, IFNULL(season_id, 0), kind);
"#;

/// Shared handle to the pool database.
pub struct PoolStore {
    conn: Arc<Mutex<Connection>>,
}

impl PoolStore {
    /// Open (creating if necessary) a file-backed store.
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;
        Self::init(conn, db_path)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn, ":memory:")
    }

    fn init(conn: Connection, label: &str) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;
        info!("📊 Pool database ready at: {}", label);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run read-only (or standalone-write) work against the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside a single immediate transaction. Everything the closure
    /// writes either commits together or rolls back together.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin transaction")?;
        let out = f(&tx)?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Timestamp helpers. Timestamps are fixed-width RFC3339 UTC ("...Z") so that
// string comparison in SQL is chronological; dates are plain "YYYY-MM-DD".
// ---------------------------------------------------------------------------

pub fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp: {}", s))
}

pub fn format_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("Invalid date: {}", s))
}

pub fn day_start(d: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).expect("midnight is a valid time"))
}

/// Inclusive end-of-day boundary, so same-day awards stay in the window.
pub fn day_end(d: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&d.and_hms_opt(23, 59, 59).expect("end of day is a valid time"))
}

fn ts_col(idx: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_ts_col(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| ts_col(idx, s)).transpose()
}

fn date_col(idx: usize, s: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn lock_status_col(idx: usize, s: String) -> rusqlite::Result<LockStatus> {
    LockStatus::from_str(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown lock status: {}", s).into(),
        )
    })
}

/// True when an insert failed on a UNIQUE constraint.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Insert or refresh a mirrored user record, keyed by username.
pub fn ensure_user(
    conn: &Connection,
    username: &str,
    registered_at: DateTime<Utc>,
    is_privileged: bool,
) -> Result<User> {
    conn.execute(
        "INSERT INTO users (username, registered_at, is_privileged)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(username) DO UPDATE SET is_privileged = excluded.is_privileged",
        params![username, format_ts(registered_at), is_privileged as i64],
    )?;
    get_user_by_username(conn, username)?
        .with_context(|| format!("User {} missing after upsert", username))
}

pub fn get_user(conn: &Connection, id: i64) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, username, registered_at, is_privileged FROM users WHERE id = ?1",
            params![id],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

pub fn get_user_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, username, registered_at, is_privileged FROM users WHERE username = ?1",
            params![username],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

pub fn users_registered_before(conn: &Connection, cutoff: DateTime<Utc>) -> Result<Vec<User>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, username, registered_at, is_privileged FROM users
         WHERE registered_at < ?1 ORDER BY id",
    )?;
    let users = stmt
        .query_map(params![format_ts(cutoff)], row_to_user)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(users)
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        registered_at: ts_col(2, row.get(2)?)?,
        is_privileged: row.get::<_, i64>(3)? != 0,
    })
}

// ---------------------------------------------------------------------------
// Seasons
// ---------------------------------------------------------------------------

pub fn create_season(
    conn: &Connection,
    name: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Season> {
    conn.execute(
        "INSERT INTO seasons (name, start_date, end_date) VALUES (?1, ?2, ?3)",
        params![name, format_date(start_date), format_date(end_date)],
    )?;
    Ok(Season {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        start_date,
        end_date,
    })
}

/// The season whose date range covers `today`, preferring the most recently
/// started one when ranges overlap.
pub fn active_season(conn: &Connection, today: NaiveDate) -> Result<Option<Season>> {
    let day = format_date(today);
    let season = conn
        .query_row(
            "SELECT id, name, start_date, end_date FROM seasons
             WHERE start_date <= ?1 AND end_date >= ?1
             ORDER BY start_date DESC LIMIT 1",
            params![day],
            row_to_season,
        )
        .optional()?;
    Ok(season)
}

pub fn closed_seasons(conn: &Connection, today: NaiveDate) -> Result<Vec<Season>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, start_date, end_date FROM seasons
         WHERE end_date < ?1 ORDER BY end_date DESC",
    )?;
    let seasons = stmt
        .query_map(params![format_date(today)], row_to_season)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(seasons)
}

pub fn get_season_by_name(conn: &Connection, name: &str) -> Result<Option<Season>> {
    let season = conn
        .query_row(
            "SELECT id, name, start_date, end_date FROM seasons WHERE name = ?1",
            params![name],
            row_to_season,
        )
        .optional()?;
    Ok(season)
}

fn row_to_season(row: &rusqlite::Row) -> rusqlite::Result<Season> {
    Ok(Season {
        id: row.get(0)?,
        name: row.get(1)?,
        start_date: date_col(2, row.get(2)?)?,
        end_date: date_col(3, row.get(3)?)?,
    })
}

// ---------------------------------------------------------------------------
// Events, catalogue options, choices
// ---------------------------------------------------------------------------

pub fn create_event(
    conn: &Connection,
    name: &str,
    points: i64,
    deadline: DateTime<Utc>,
    source: &str,
) -> Result<Event> {
    conn.execute(
        "INSERT INTO events (name, points, deadline, source) VALUES (?1, ?2, ?3, ?4)",
        params![name, points, format_ts(deadline), source],
    )?;
    let id = conn.last_insert_rowid();
    get_event(conn, id)?.context("Event missing after insert")
}

/// Upsert an event by its source-stable reference. Returns the event and
/// whether a new row was created.
pub fn upsert_event_by_ref(
    conn: &Connection,
    external_ref: &str,
    name: &str,
    points: i64,
    deadline: DateTime<Utc>,
    source: &str,
) -> Result<(Event, bool)> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM events WHERE external_ref = ?1",
            params![external_ref],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE events SET name = ?1, deadline = ?2, source = ?3 WHERE id = ?4",
                params![name, format_ts(deadline), source, id],
            )?;
            Ok((get_event(conn, id)?.context("Event missing after update")?, false))
        }
        None => {
            conn.execute(
                "INSERT INTO events (name, points, deadline, source, external_ref)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![name, points, format_ts(deadline), source, external_ref],
            )?;
            let id = conn.last_insert_rowid();
            Ok((get_event(conn, id)?.context("Event missing after insert")?, true))
        }
    }
}

pub fn get_event(conn: &Connection, id: i64) -> Result<Option<Event>> {
    let event = conn
        .query_row(
            "SELECT id, name, points, deadline, source, external_ref, is_active
             FROM events WHERE id = ?1",
            params![id],
            row_to_event,
        )
        .optional()?;
    Ok(event)
}

pub fn set_event_points(conn: &Connection, id: i64, points: i64) -> Result<()> {
    let changed = conn.execute("UPDATE events SET points = ?1 WHERE id = ?2", params![points, id])?;
    if changed == 0 {
        anyhow::bail!("Event {} not found", id);
    }
    Ok(())
}

pub fn active_events(conn: &Connection) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, points, deadline, source, external_ref, is_active
         FROM events WHERE is_active = 1 ORDER BY deadline, id",
    )?;
    let events = stmt
        .query_map([], row_to_event)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(events)
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        name: row.get(1)?,
        points: row.get(2)?,
        deadline: ts_col(3, row.get(3)?)?,
        source: row.get(4)?,
        external_ref: row.get(5)?,
        is_active: row.get::<_, i64>(6)? != 0,
    })
}

/// Upsert a catalogue option by slug. Returns the option and whether it was
/// newly created.
pub fn upsert_catalog_option(
    conn: &Connection,
    slug: &str,
    label: &str,
) -> Result<(CatalogOption, bool)> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM options WHERE slug = ?1",
            params![slug],
            |row| row.get(0),
        )
        .optional()?;

    let (id, created) = match existing {
        Some(id) => {
            conn.execute("UPDATE options SET label = ?1 WHERE id = ?2", params![label, id])?;
            (id, false)
        }
        None => {
            conn.execute(
                "INSERT INTO options (slug, label) VALUES (?1, ?2)",
                params![slug, label],
            )?;
            (conn.last_insert_rowid(), true)
        }
    };

    Ok((
        CatalogOption {
            id,
            slug: slug.to_string(),
            label: label.to_string(),
        },
        created,
    ))
}

pub fn get_catalog_option_by_slug(conn: &Connection, slug: &str) -> Result<Option<CatalogOption>> {
    let option = conn
        .query_row(
            "SELECT id, slug, label FROM options WHERE slug = ?1",
            params![slug],
            |row| {
                Ok(CatalogOption {
                    id: row.get(0)?,
                    slug: row.get(1)?,
                    label: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(option)
}

/// Upsert a curated choice by (event, label).
pub fn upsert_choice(
    conn: &Connection,
    event_id: i64,
    label: &str,
    option_id: Option<i64>,
    sort_order: i64,
) -> Result<Choice> {
    conn.execute(
        "INSERT INTO choices (event_id, label, option_id, sort_order)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(event_id, label) DO UPDATE SET
            option_id = excluded.option_id,
            sort_order = excluded.sort_order",
        params![event_id, label, option_id, sort_order],
    )?;
    conn.query_row(
        "SELECT id, event_id, label, option_id, sort_order FROM choices
         WHERE event_id = ?1 AND label = ?2",
        params![event_id, label],
        row_to_choice,
    )
    .map_err(Into::into)
}

pub fn choices_for_event(conn: &Connection, event_id: i64) -> Result<Vec<Choice>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, event_id, label, option_id, sort_order FROM choices
         WHERE event_id = ?1 ORDER BY sort_order, label",
    )?;
    let choices = stmt
        .query_map(params![event_id], row_to_choice)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(choices)
}

/// Curated choice id → parent catalogue option id, for every choice of the
/// event that has a parent.
pub fn choice_parents_for_event(conn: &Connection, event_id: i64) -> Result<HashMap<i64, i64>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, option_id FROM choices WHERE event_id = ?1 AND option_id IS NOT NULL",
    )?;
    let mut map = HashMap::new();
    let mut rows = stmt.query(params![event_id])?;
    while let Some(row) = rows.next()? {
        map.insert(row.get::<_, i64>(0)?, row.get::<_, i64>(1)?);
    }
    Ok(map)
}

fn row_to_choice(row: &rusqlite::Row) -> rusqlite::Result<Choice> {
    Ok(Choice {
        id: row.get(0)?,
        event_id: row.get(1)?,
        label: row.get(2)?,
        option_id: row.get(3)?,
        sort_order: row.get(4)?,
    })
}

// ---------------------------------------------------------------------------
// Tips
// ---------------------------------------------------------------------------

pub fn create_tip(
    conn: &Connection,
    user_id: i64,
    event_id: i64,
    selection: Selection,
    now: DateTime<Utc>,
) -> Result<Tip> {
    conn.execute(
        "INSERT INTO tips (user_id, event_id, choice_id, option_id, lock_status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user_id,
            event_id,
            selection.choice_id(),
            selection.option_id(),
            LockStatus::None.as_str(),
            format_ts(now),
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_tip(conn, id)?.context("Tip missing after insert")
}

pub fn get_tip(conn: &Connection, id: i64) -> Result<Option<Tip>> {
    let tip = conn
        .query_row(
            "SELECT id, user_id, event_id, choice_id, option_id, lock_status,
                    lock_committed_at, lock_released_at, lock_forfeited_at,
                    lock_releases_at, created_at
             FROM tips WHERE id = ?1",
            params![id],
            row_to_tip,
        )
        .optional()?;
    Ok(tip)
}

pub fn tips_for_event(conn: &Connection, event_id: i64) -> Result<Vec<Tip>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, user_id, event_id, choice_id, option_id, lock_status,
                lock_committed_at, lock_released_at, lock_forfeited_at,
                lock_releases_at, created_at
         FROM tips WHERE event_id = ?1 ORDER BY id",
    )?;
    let tips = stmt
        .query_map(params![event_id], row_to_tip)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tips)
}

fn row_to_tip(row: &rusqlite::Row) -> rusqlite::Result<Tip> {
    Ok(Tip {
        id: row.get(0)?,
        user_id: row.get(1)?,
        event_id: row.get(2)?,
        choice_id: row.get(3)?,
        option_id: row.get(4)?,
        lock_status: lock_status_col(5, row.get(5)?)?,
        lock_committed_at: opt_ts_col(6, row.get(6)?)?,
        lock_released_at: opt_ts_col(7, row.get(7)?)?,
        lock_forfeited_at: opt_ts_col(8, row.get(8)?)?,
        lock_releases_at: opt_ts_col(9, row.get(9)?)?,
        created_at: ts_col(10, row.get(10)?)?,
    })
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Attach (or replace) the resolved result of an event. Re-recording keeps
/// the idempotency marker; a changed winner needs a forced re-score.
pub fn record_outcome(
    conn: &Connection,
    event_id: i64,
    winning: Option<Selection>,
    is_forfeit: bool,
    resolved_at: DateTime<Utc>,
) -> Result<Outcome> {
    let (choice_id, option_id) = match winning {
        Some(sel) => (sel.choice_id(), sel.option_id()),
        None => (None, None),
    };
    conn.execute(
        "INSERT INTO outcomes (event_id, winning_choice_id, winning_option_id, is_forfeit, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(event_id) DO UPDATE SET
            winning_choice_id = excluded.winning_choice_id,
            winning_option_id = excluded.winning_option_id,
            is_forfeit = excluded.is_forfeit,
            resolved_at = excluded.resolved_at",
        params![event_id, choice_id, option_id, is_forfeit as i64, format_ts(resolved_at)],
    )?;
    get_outcome(conn, event_id)?.context("Outcome missing after upsert")
}

pub fn get_outcome(conn: &Connection, event_id: i64) -> Result<Option<Outcome>> {
    let outcome = conn
        .query_row(
            "SELECT event_id, winning_choice_id, winning_option_id, is_forfeit,
                    resolved_at, scored_at, score_note
             FROM outcomes WHERE event_id = ?1",
            params![event_id],
            row_to_outcome,
        )
        .optional()?;
    Ok(outcome)
}

pub fn mark_outcome_scored(
    conn: &Connection,
    event_id: i64,
    scored_at: DateTime<Utc>,
    note: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE outcomes SET scored_at = ?1, score_note = ?2 WHERE event_id = ?3",
        params![format_ts(scored_at), note, event_id],
    )?;
    Ok(())
}

/// Record an event-level scoring failure without touching the idempotency
/// marker, so the next batch run retries it.
pub fn set_outcome_error(conn: &Connection, event_id: i64, message: &str) -> Result<()> {
    conn.execute(
        "UPDATE outcomes SET score_note = ?1 WHERE event_id = ?2",
        params![message, event_id],
    )?;
    Ok(())
}

/// Outcomes awaiting scoring, oldest resolution first. `include_scored`
/// widens the sweep to every outcome; `since` bounds it to recently
/// resolved ones.
pub fn outcomes_to_score(
    conn: &Connection,
    include_scored: bool,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<Outcome>> {
    let since_str = since.map(format_ts);
    let mut stmt = conn.prepare_cached(
        "SELECT event_id, winning_choice_id, winning_option_id, is_forfeit,
                resolved_at, scored_at, score_note
         FROM outcomes
         WHERE (?1 OR scored_at IS NULL) AND (?2 IS NULL OR resolved_at >= ?2)
         ORDER BY resolved_at, event_id",
    )?;
    let outcomes = stmt
        .query_map(params![include_scored as i64, since_str], row_to_outcome)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(outcomes)
}

fn row_to_outcome(row: &rusqlite::Row) -> rusqlite::Result<Outcome> {
    Ok(Outcome {
        event_id: row.get(0)?,
        winning_choice_id: row.get(1)?,
        winning_option_id: row.get(2)?,
        is_forfeit: row.get::<_, i64>(3)? != 0,
        resolved_at: ts_col(4, row.get(4)?)?,
        scored_at: opt_ts_col(5, row.get(5)?)?,
        score_note: row.get(6)?,
    })
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

/// Insert or update the single score row for (user, event). An update keeps
/// the original `awarded_at`. Returns the row and whether it was created.
pub fn upsert_score(
    conn: &Connection,
    user_id: i64,
    event_id: i64,
    base_points: i64,
    lock_multiplier: i64,
    is_lock_bonus: bool,
    now: DateTime<Utc>,
) -> Result<(Score, bool)> {
    let existed: Option<i64> = conn
        .query_row(
            "SELECT id FROM scores WHERE user_id = ?1 AND event_id = ?2",
            params![user_id, event_id],
            |row| row.get(0),
        )
        .optional()?;

    conn.execute(
        "INSERT INTO scores
             (user_id, event_id, base_points, lock_multiplier, points_awarded, is_lock_bonus, awarded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(user_id, event_id) DO UPDATE SET
            base_points = excluded.base_points,
            lock_multiplier = excluded.lock_multiplier,
            points_awarded = excluded.points_awarded,
            is_lock_bonus = excluded.is_lock_bonus",
        params![
            user_id,
            event_id,
            base_points,
            lock_multiplier,
            base_points * lock_multiplier,
            is_lock_bonus as i64,
            format_ts(now),
        ],
    )?;

    let score = conn.query_row(
        "SELECT id, user_id, event_id, base_points, lock_multiplier, points_awarded,
                is_lock_bonus, awarded_at
         FROM scores WHERE user_id = ?1 AND event_id = ?2",
        params![user_id, event_id],
        row_to_score,
    )?;
    Ok((score, existed.is_none()))
}

pub fn scores_for_event(conn: &Connection, event_id: i64) -> Result<Vec<Score>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, user_id, event_id, base_points, lock_multiplier, points_awarded,
                is_lock_bonus, awarded_at
         FROM scores WHERE event_id = ?1 ORDER BY user_id",
    )?;
    let scores = stmt
        .query_map(params![event_id], row_to_score)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(scores)
}

pub fn score_for_user_event(
    conn: &Connection,
    user_id: i64,
    event_id: i64,
) -> Result<Option<Score>> {
    let score = conn
        .query_row(
            "SELECT id, user_id, event_id, base_points, lock_multiplier, points_awarded,
                    is_lock_bonus, awarded_at
             FROM scores WHERE user_id = ?1 AND event_id = ?2",
            params![user_id, event_id],
            row_to_score,
        )
        .optional()?;
    Ok(score)
}

pub fn delete_scores_for_event(conn: &Connection, event_id: i64) -> Result<usize> {
    let deleted = conn.execute("DELETE FROM scores WHERE event_id = ?1", params![event_id])?;
    if deleted > 0 {
        warn!("🗑️  Deleted {} existing scores for event {}", deleted, event_id);
    }
    Ok(deleted)
}

fn row_to_score(row: &rusqlite::Row) -> rusqlite::Result<Score> {
    Ok(Score {
        id: row.get(0)?,
        user_id: row.get(1)?,
        event_id: row.get(2)?,
        base_points: row.get(3)?,
        lock_multiplier: row.get(4)?,
        points_awarded: row.get(5)?,
        is_lock_bonus: row.get::<_, i64>(6)? != 0,
        awarded_at: ts_col(7, row.get(7)?)?,
    })
}

// ---------------------------------------------------------------------------
// Streak window
// ---------------------------------------------------------------------------

/// The most recently resolved events the user tipped on, newest first. One
/// outcome per event, so the result is naturally deduplicated; the id is a
/// deterministic tie-breaker for equal resolution times.
pub fn recent_resolved_event_ids(
    conn: &Connection,
    user_id: i64,
    limit: usize,
) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare_cached(
        "SELECT o.event_id FROM outcomes o
         JOIN tips t ON t.event_id = o.event_id
         WHERE t.user_id = ?1
         ORDER BY o.resolved_at DESC, o.event_id DESC
         LIMIT ?2",
    )?;
    let ids = stmt
        .query_map(params![user_id, limit as i64], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

/// How many of the given events the user holds a score for.
pub fn count_scores_for_events(conn: &Connection, user_id: i64, event_ids: &[i64]) -> Result<usize> {
    if event_ids.is_empty() {
        return Ok(0);
    }
    let placeholders = (2..=event_ids.len() + 1)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT COUNT(*) FROM scores WHERE user_id = ?1 AND event_id IN ({})",
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut values: Vec<&dyn rusqlite::ToSql> = vec![&user_id];
    for id in event_ids {
        values.push(id);
    }
    let count: i64 = stmt.query_row(values.as_slice(), |row| row.get(0))?;
    Ok(count as usize)
}

// ---------------------------------------------------------------------------
// Hotness & kudos
// ---------------------------------------------------------------------------

pub fn get_hotness(
    conn: &Connection,
    user_id: i64,
    season_id: Option<i64>,
) -> Result<Option<HotnessRecord>> {
    let record = conn
        .query_row(
            "SELECT user_id, season_id, score, last_decay_at FROM hotness
             WHERE user_id = ?1 AND IFNULL(season_id, 0) = IFNULL(?2, 0)",
            params![user_id, season_id],
            |row| {
                Ok(HotnessRecord {
                    user_id: row.get(0)?,
                    season_id: row.get(1)?,
                    score: row.get(2)?,
                    last_decay_at: ts_col(3, row.get(3)?)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

pub fn insert_hotness(conn: &Connection, record: &HotnessRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO hotness (user_id, season_id, score, last_decay_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            record.user_id,
            record.season_id,
            record.score,
            format_ts(record.last_decay_at),
        ],
    )?;
    Ok(())
}

pub fn save_hotness(conn: &Connection, record: &HotnessRecord) -> Result<()> {
    conn.execute(
        "UPDATE hotness SET score = ?1, last_decay_at = ?2
         WHERE user_id = ?3 AND IFNULL(season_id, 0) = IFNULL(?4, 0)",
        params![
            record.score,
            format_ts(record.last_decay_at),
            record.user_id,
            record.season_id,
        ],
    )?;
    Ok(())
}

/// Insert a kudos grant. `granted_on` must be NULL for privileged givers so
/// the daily unique index never applies to them. Surfaces the raw rusqlite
/// error so the caller can distinguish a constraint hit.
pub fn insert_kudos(
    conn: &Connection,
    giver_id: i64,
    receiver_id: i64,
    season_id: Option<i64>,
    granted_on: Option<NaiveDate>,
    granted_at: DateTime<Utc>,
) -> std::result::Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO kudos (giver_id, receiver_id, season_id, granted_on, granted_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            giver_id,
            receiver_id,
            season_id,
            granted_on.map(format_date),
            format_ts(granted_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn kudos_received_on(conn: &Connection, receiver_id: i64, day: NaiveDate) -> Result<usize> {
    let start = format_ts(day_start(day));
    let end = format_ts(day_end(day));
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM kudos WHERE receiver_id = ?1 AND granted_at BETWEEN ?2 AND ?3",
        params![receiver_id, start, end],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

pub fn get_kudos(conn: &Connection, id: i64) -> Result<Option<KudosGrant>> {
    let grant = conn
        .query_row(
            "SELECT id, giver_id, receiver_id, season_id, granted_on, granted_at
             FROM kudos WHERE id = ?1",
            params![id],
            |row| {
                let granted_on: Option<String> = row.get(4)?;
                Ok(KudosGrant {
                    id: row.get(0)?,
                    giver_id: row.get(1)?,
                    receiver_id: row.get(2)?,
                    season_id: row.get(3)?,
                    granted_on: granted_on.map(|s| date_col(4, s)).transpose()?,
                    granted_at: ts_col(5, row.get(5)?)?,
                })
            },
        )
        .optional()?;
    Ok(grant)
}

// ---------------------------------------------------------------------------
// Achievements
// ---------------------------------------------------------------------------

pub fn get_achievement(
    conn: &Connection,
    user_id: i64,
    season_id: Option<i64>,
    kind: AchievementKind,
) -> Result<Option<Achievement>> {
    let achievement = conn
        .query_row(
            "SELECT id, user_id, season_id, kind, name, description, emoji, awarded_at
             FROM achievements
             WHERE user_id = ?1 AND IFNULL(season_id, 0) = IFNULL(?2, 0) AND kind = ?3",
            params![user_id, season_id, kind.as_str()],
            row_to_achievement,
        )
        .optional()?;
    Ok(achievement)
}

/// Create or refresh an achievement. Returns true when a new row was created.
pub fn upsert_achievement(
    conn: &Connection,
    user_id: i64,
    season_id: Option<i64>,
    kind: AchievementKind,
    name: &str,
    description: &str,
    emoji: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let existing = get_achievement(conn, user_id, season_id, kind)?;
    match existing {
        Some(a) => {
            conn.execute(
                "UPDATE achievements SET name = ?1, description = ?2, emoji = ?3 WHERE id = ?4",
                params![name, description, emoji, a.id],
            )?;
            Ok(false)
        }
        None => {
            conn.execute(
                "INSERT INTO achievements
                     (user_id, season_id, kind, name, description, emoji, awarded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user_id,
                    season_id,
                    kind.as_str(),
                    name,
                    description,
                    emoji,
                    format_ts(now),
                ],
            )?;
            Ok(true)
        }
    }
}

pub fn achievements_for_user(conn: &Connection, user_id: i64) -> Result<Vec<Achievement>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, user_id, season_id, kind, name, description, emoji, awarded_at
         FROM achievements WHERE user_id = ?1 ORDER BY awarded_at, id",
    )?;
    let achievements = stmt
        .query_map(params![user_id], row_to_achievement)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(achievements)
}

fn row_to_achievement(row: &rusqlite::Row) -> rusqlite::Result<Achievement> {
    let kind_str: String = row.get(3)?;
    let kind = AchievementKind::from_str(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown achievement kind: {}", kind_str).into(),
        )
    })?;
    Ok(Achievement {
        id: row.get(0)?,
        user_id: row.get(1)?,
        season_id: row.get(2)?,
        kind,
        name: row.get(4)?,
        description: row.get(5)?,
        emoji: row.get(6)?,
        awarded_at: ts_col(7, row.get(7)?)?,
    })
}

// ---------------------------------------------------------------------------
// Standings
// ---------------------------------------------------------------------------

/// Per-user aggregate for one season window, ordered by the deterministic
/// ranking key: points desc, distinct events desc, username asc.
#[derive(Debug, Clone)]
pub struct SeasonStanding {
    pub user_id: i64,
    pub username: String,
    pub total_points: i64,
    pub event_count: i64,
}

pub fn season_standings(conn: &Connection, season: &Season) -> Result<Vec<SeasonStanding>> {
    let start = format_ts(day_start(season.start_date));
    let end = format_ts(day_end(season.end_date));
    let mut stmt = conn.prepare_cached(
        "SELECT s.user_id, u.username,
                COALESCE(SUM(s.points_awarded), 0) AS total_points,
                COUNT(DISTINCT s.event_id) AS event_count
         FROM scores s
         JOIN users u ON u.id = s.user_id
         WHERE s.awarded_at >= ?1 AND s.awarded_at <= ?2
         GROUP BY s.user_id
         ORDER BY total_points DESC, event_count DESC, u.username ASC",
    )?;
    let standings = stmt
        .query_map(params![start, end], |row| {
            Ok(SeasonStanding {
                user_id: row.get(0)?,
                username: row.get(1)?,
                total_points: row.get(2)?,
                event_count: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(standings)
}
