//! Lock lifecycle state machine.
//!
//! A lock is a scarce commitment a user attaches to one tip: correct tips
//! score double, wrong tips lose the lock for a 30-day cooldown. Transitions
//! out of `Active` are owned entirely by this module; the scorer only ever
//! calls the three transition functions below.
//!
//! ```text
//! None ──commit──▶ Active ──release_after_scoring──▶ WasLocked
//!                    │ ├──schedule_forfeit──▶ Forfeited ──sweep──▶ Returned
//!                    │ └──refund_for_forfeited_event──▶ None
//! ```

use crate::models::{LockStatus, Tip};
use crate::store::format_ts;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

/// Concurrent commitments a user may hold; forfeited locks count against
/// this until they are returned.
pub const LOCK_LIMIT: i64 = 3;

/// Cooldown before a forfeited lock is handed back.
pub const LOCK_RETURN_DELAY_DAYS: i64 = 30;

/// Lock allocation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The user has no lock capacity left.
    LimitReached,
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LimitReached => write!(f, "No locks available"),
        }
    }
}

impl std::error::Error for LockError {}

/// Snapshot of a user's lock state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSummary {
    pub total: i64,
    pub available: i64,
    pub active: i64,
    pub pending: i64,
    pub next_return_at: Option<DateTime<Utc>>,
}

/// `Active → WasLocked` once the tip has been scored correct. The commitment
/// goes back to the user while the multiplier stays earned, so a re-score
/// keeps awarding the bonus. No-op on any other state.
pub fn release_after_scoring(conn: &Connection, tip: &Tip, now: DateTime<Utc>) -> Result<bool> {
    if tip.lock_status != LockStatus::Active {
        return Ok(false);
    }
    let changed = conn.execute(
        "UPDATE tips SET lock_status = ?1, lock_released_at = ?2, lock_releases_at = NULL
         WHERE id = ?3 AND lock_status = ?4",
        params![
            LockStatus::WasLocked.as_str(),
            format_ts(now),
            tip.id,
            LockStatus::Active.as_str(),
        ],
    )?;
    if changed > 0 {
        debug!(tip = tip.id, user = tip.user_id, "lock released after scoring");
    }
    Ok(changed > 0)
}

/// `Active → Forfeited` for a wrong locked tip. Schedules the automatic
/// return at `resolved_at` plus the cooldown; `lock_released_at` stays empty
/// until the sweep fires.
pub fn schedule_forfeit(conn: &Connection, tip: &Tip, resolved_at: DateTime<Utc>) -> Result<bool> {
    if tip.lock_status != LockStatus::Active {
        return Ok(false);
    }
    let releases_at = resolved_at + Duration::days(LOCK_RETURN_DELAY_DAYS);
    let changed = conn.execute(
        "UPDATE tips SET lock_status = ?1, lock_forfeited_at = ?2,
                lock_releases_at = ?3, lock_released_at = NULL
         WHERE id = ?4 AND lock_status = ?5",
        params![
            LockStatus::Forfeited.as_str(),
            format_ts(resolved_at),
            format_ts(releases_at),
            tip.id,
            LockStatus::Active.as_str(),
        ],
    )?;
    if changed > 0 {
        debug!(
            tip = tip.id,
            user = tip.user_id,
            releases_at = %releases_at,
            "lock forfeited"
        );
    }
    Ok(changed > 0)
}

/// `Active → None` when the event itself was voided. The commitment is
/// refunded unconditionally with neither bonus nor penalty.
pub fn refund_for_forfeited_event(conn: &Connection, tip: &Tip, now: DateTime<Utc>) -> Result<bool> {
    if tip.lock_status != LockStatus::Active {
        return Ok(false);
    }
    let changed = conn.execute(
        "UPDATE tips SET lock_status = ?1, lock_released_at = ?2, lock_releases_at = NULL
         WHERE id = ?3 AND lock_status = ?4",
        params![
            LockStatus::None.as_str(),
            format_ts(now),
            tip.id,
            LockStatus::Active.as_str(),
        ],
    )?;
    if changed > 0 {
        debug!(tip = tip.id, user = tip.user_id, "lock refunded for voided event");
    }
    Ok(changed > 0)
}

/// `Forfeited → Returned` for every lock whose cooldown has expired.
/// Returns the number of locks handed back.
pub fn release_due_locks(conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE tips SET lock_status = ?1, lock_released_at = ?2, lock_releases_at = NULL
         WHERE lock_status = ?3 AND lock_releases_at IS NOT NULL AND lock_releases_at <= ?2",
        params![
            LockStatus::Returned.as_str(),
            format_ts(now),
            LockStatus::Forfeited.as_str(),
        ],
    )?;
    if changed > 0 {
        info!("🔓 Returned {} expired forfeited locks", changed);
    }
    Ok(changed)
}

fn sweep_user(conn: &Connection, user_id: i64, now: DateTime<Utc>) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE tips SET lock_status = ?1, lock_released_at = ?2, lock_releases_at = NULL
         WHERE user_id = ?3 AND lock_status = ?4
           AND lock_releases_at IS NOT NULL AND lock_releases_at <= ?2",
        params![
            LockStatus::Returned.as_str(),
            format_ts(now),
            user_id,
            LockStatus::Forfeited.as_str(),
        ],
    )?;
    Ok(changed)
}

/// Spend a lock on `tip` if the user has capacity.
///
/// Expired forfeits are returned first so stale pending locks never block an
/// allocation. A tip that is already `Active` is a no-op returning `false`;
/// a pending-forfeited tip cannot be re-locked.
pub fn commit_lock(conn: &Connection, tip: &Tip, now: DateTime<Utc>) -> Result<bool> {
    match tip.lock_status {
        LockStatus::Active | LockStatus::Forfeited => return Ok(false),
        LockStatus::None | LockStatus::WasLocked | LockStatus::Returned => {}
    }

    sweep_user(conn, tip.user_id, now)?;
    let summary = summary_counts(conn, tip.user_id)?;
    if summary.available <= 0 {
        return Err(LockError::LimitReached.into());
    }

    conn.execute(
        "UPDATE tips SET lock_status = ?1, lock_committed_at = ?2,
                lock_released_at = NULL, lock_releases_at = NULL, lock_forfeited_at = NULL
         WHERE id = ?3",
        params![LockStatus::Active.as_str(), format_ts(now), tip.id],
    )?;
    debug!(tip = tip.id, user = tip.user_id, "lock committed");
    Ok(true)
}

/// Current lock state for a user, after returning any expired forfeits.
pub fn summary_for_user(conn: &Connection, user_id: i64, now: DateTime<Utc>) -> Result<LockSummary> {
    sweep_user(conn, user_id, now)?;
    summary_counts(conn, user_id)
}

fn summary_counts(conn: &Connection, user_id: i64) -> Result<LockSummary> {
    let active: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tips WHERE user_id = ?1 AND lock_status = ?2",
        params![user_id, LockStatus::Active.as_str()],
        |row| row.get(0),
    )?;
    let pending: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tips WHERE user_id = ?1 AND lock_status = ?2",
        params![user_id, LockStatus::Forfeited.as_str()],
        |row| row.get(0),
    )?;
    let next_return: Option<String> = conn
        .query_row(
            "SELECT MIN(lock_releases_at) FROM tips
             WHERE user_id = ?1 AND lock_status = ?2 AND lock_releases_at IS NOT NULL",
            params![user_id, LockStatus::Forfeited.as_str()],
            |row| row.get(0),
        )
        .optional()?
        .flatten();

    let next_return_at = match next_return {
        Some(s) => Some(crate::store::parse_ts(&s)?),
        None => None,
    };

    Ok(LockSummary {
        total: LOCK_LIMIT,
        available: (LOCK_LIMIT - active - pending).max(0),
        active,
        pending,
        next_return_at,
    })
}
