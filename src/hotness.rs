//! Hotness scoring: a decaying per-season reputation number.
//!
//! Correct picks, lock wins, streaks and peer kudos push the score up; time
//! pushes it back down at a configurable hourly rate. The raw score is the
//! stored truth; the level mapping is a read-only view for presentation.

use crate::models::{Config, HotnessRecord};
use crate::store::{self, PoolStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

pub const HOTNESS_CORRECT_PREDICTION: f64 = 10.0;
pub const HOTNESS_LOCK_WIN: f64 = 20.0;
pub const HOTNESS_STREAK_BONUS: f64 = 50.0;
pub const HOTNESS_KUDOS: f64 = 2.0;

/// Trailing window of resolved picks that must all be correct for the
/// streak bonus.
pub const STREAK_LENGTH: usize = 3;

/// Score thresholds for levels 1..=4; below the first is level 0.
const LEVEL_THRESHOLDS: [f64; 4] = [10.0, 25.0, 50.0, 100.0];

/// Kudos failures surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KudosError {
    SelfKudos,
    AlreadyGrantedToday,
}

impl std::fmt::Display for KudosError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SelfKudos => write!(f, "Cannot give kudos to yourself"),
            Self::AlreadyGrantedToday => {
                write!(f, "Already gave kudos to this user today")
            }
        }
    }
}

impl std::error::Error for KudosError {}

/// Outcome of a successful kudos grant.
#[derive(Debug, Clone)]
pub struct KudosReceipt {
    pub new_score: f64,
    pub new_level: u8,
}

/// Map a raw score to its ordinal level.
pub fn level_for_score(score: f64) -> u8 {
    LEVEL_THRESHOLDS
        .iter()
        .take_while(|threshold| score >= **threshold)
        .count() as u8
}

/// Fetch the per-(user, season) record, creating it lazily, and apply decay
/// up to `now` before anyone reads or bumps the score.
pub fn get_or_create_hotness(
    conn: &Connection,
    cfg: &Config,
    user_id: i64,
    season_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<HotnessRecord> {
    let mut record = match store::get_hotness(conn, user_id, season_id)? {
        Some(record) => record,
        None => {
            let record = HotnessRecord {
                user_id,
                season_id,
                score: 0.0,
                last_decay_at: now,
            };
            store::insert_hotness(conn, &record)?;
            record
        }
    };
    record.decay(cfg.hotness_decay_per_hour, now);
    store::save_hotness(conn, &record)?;
    Ok(record)
}

/// Award hotness for a correct pick. Runs inside the scoring transaction so
/// the score row and the hotness bump land or roll back together.
///
/// The streak check looks at the user's most recently resolved events (one
/// outcome per event, newest first). If at least [`STREAK_LENGTH`] exist and
/// the user holds a score for every one of them, the streak bonus is added —
/// again on every qualifying award while the window stays fully correct.
pub fn award_for_correct_prediction(
    conn: &Connection,
    cfg: &Config,
    user_id: i64,
    was_locked: bool,
    season_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<f64> {
    let mut record = get_or_create_hotness(conn, cfg, user_id, season_id, now)?;

    record.score += HOTNESS_CORRECT_PREDICTION;
    if was_locked {
        record.score += HOTNESS_LOCK_WIN;
    }

    let recent = store::recent_resolved_event_ids(conn, user_id, STREAK_LENGTH)?;
    if recent.len() >= STREAK_LENGTH {
        let correct = store::count_scores_for_events(conn, user_id, &recent)?;
        if correct >= STREAK_LENGTH {
            record.score += HOTNESS_STREAK_BONUS;
            debug!(user = user_id, "streak bonus awarded");
        }
    }

    store::save_hotness(conn, &record)?;
    Ok(record.score)
}

/// Give kudos from one user to another.
///
/// Self-kudos is rejected outright. Non-privileged givers are limited to one
/// grant per receiver per calendar day, enforced by the unique index on the
/// grant day; privileged givers store no grant day and bypass the limit.
pub fn give_kudos(store: &PoolStore, cfg: &Config, giver_id: i64, receiver_id: i64) -> Result<KudosReceipt> {
    if giver_id == receiver_id {
        return Err(KudosError::SelfKudos.into());
    }

    let now = Utc::now();
    let today = now.date_naive();

    store.with_tx(|tx| {
        let giver = store::get_user(tx, giver_id)?
            .with_context(|| format!("Giver {} not found", giver_id))?;
        store::get_user(tx, receiver_id)?
            .with_context(|| format!("Receiver {} not found", receiver_id))?;

        let season = store::active_season(tx, today)?;
        let season_id = season.as_ref().map(|s| s.id);
        let granted_on = if giver.is_privileged { None } else { Some(today) };

        if let Err(e) = store::insert_kudos(tx, giver_id, receiver_id, season_id, granted_on, now) {
            if store::is_unique_violation(&e) {
                return Err(KudosError::AlreadyGrantedToday.into());
            }
            return Err(e.into());
        }

        let mut record = get_or_create_hotness(tx, cfg, receiver_id, season_id, now)?;
        record.score += HOTNESS_KUDOS;
        store::save_hotness(tx, &record)?;

        debug!(giver = giver_id, receiver = receiver_id, "kudos granted");
        Ok(KudosReceipt {
            new_score: record.score,
            new_level: level_for_score(record.score),
        })
    })
}
