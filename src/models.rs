//! Core domain types for the prediction pool.
//!
//! Events carry a slate of mutually exclusive options; users submit one tip
//! per event and may spend a lock to double a correct tip's points. Resolved
//! outcomes are scored exactly once, hotness tracks a decaying reputation
//! score, and season rankings hand out medal achievements.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the lock commitment attached to a single tip.
///
/// `Active` and `WasLocked` are the two states that grant the ×2 multiplier:
/// `WasLocked` is the terminal-success state a lock enters once a correct tip
/// has been scored, so re-running the scorer keeps awarding the bonus.
/// `Returned` is reached only when a forfeited lock comes back after its
/// cooldown and never grants a bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    None,
    Active,
    WasLocked,
    Forfeited,
    Returned,
}

impl LockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockStatus::None => "none",
            LockStatus::Active => "active",
            LockStatus::WasLocked => "was_locked",
            LockStatus::Forfeited => "forfeited",
            LockStatus::Returned => "returned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "none" => Some(LockStatus::None),
            "active" => Some(LockStatus::Active),
            "was_locked" => Some(LockStatus::WasLocked),
            "forfeited" => Some(LockStatus::Forfeited),
            "returned" => Some(LockStatus::Returned),
            _ => None,
        }
    }

    /// Whether a tip in this state contributes the ×2 multiplier at scoring
    /// time.
    pub fn grants_bonus(&self) -> bool {
        matches!(self, LockStatus::Active | LockStatus::WasLocked)
    }
}

/// A user's pick, either a curated per-event choice or a generic catalogue
/// option. Replaces attribute probing with a tagged union: one comparison
/// function decides matching for every combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Id of a curated `Choice` row attached to the event.
    Curated(i64),
    /// Id of a generic catalogue `CatalogOption`.
    Generic(i64),
}

impl Selection {
    /// Build from the two nullable storage columns. Curated wins when both
    /// are present.
    pub fn from_parts(choice_id: Option<i64>, option_id: Option<i64>) -> Option<Self> {
        match (choice_id, option_id) {
            (Some(c), _) => Some(Selection::Curated(c)),
            (None, Some(o)) => Some(Selection::Generic(o)),
            (None, None) => None,
        }
    }

    pub fn choice_id(&self) -> Option<i64> {
        match self {
            Selection::Curated(id) => Some(*id),
            Selection::Generic(_) => None,
        }
    }

    pub fn option_id(&self) -> Option<i64> {
        match self {
            Selection::Curated(_) => None,
            Selection::Generic(id) => Some(*id),
        }
    }
}

/// A participant. Mirrored from the account system upstream; only the fields
/// the resolution engine reads are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub registered_at: DateTime<Utc>,
    /// Privileged users bypass the daily kudos limit.
    pub is_privileged: bool,
}

/// An immutable date range used to window scoring and rankings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Season {
    pub id: i64,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Season {
    /// A season is closed once its end date is strictly in the past.
    pub fn is_closed(&self, today: NaiveDate) -> bool {
        self.end_date < today
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start_date <= day && day <= self.end_date
    }
}

/// A predictable event with a point value and a resolution deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub name: String,
    /// Scoring reads the current value, so edits before a forced re-score
    /// change past awards.
    pub points: i64,
    pub deadline: DateTime<Utc>,
    /// Slug of the event source that created this event.
    pub source: String,
    /// Stable identifier within the source, used for idempotent syncs.
    pub external_ref: Option<String>,
    pub is_active: bool,
}

/// A generic catalogue option (team, player, ...) shared across events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogOption {
    pub id: i64,
    pub slug: String,
    pub label: String,
}

/// A curated option attached to one event, optionally backed by a generic
/// catalogue option (its parent for matching purposes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub id: i64,
    pub event_id: i64,
    pub label: String,
    pub option_id: Option<i64>,
    pub sort_order: i64,
}

/// One user's pick for one event. The engine never mutates a tip except for
/// its lock fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tip {
    pub id: i64,
    pub user_id: i64,
    pub event_id: i64,
    pub choice_id: Option<i64>,
    pub option_id: Option<i64>,
    pub lock_status: LockStatus,
    pub lock_committed_at: Option<DateTime<Utc>>,
    pub lock_released_at: Option<DateTime<Utc>>,
    pub lock_forfeited_at: Option<DateTime<Utc>>,
    pub lock_releases_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Tip {
    pub fn selection(&self) -> Option<Selection> {
        Selection::from_parts(self.choice_id, self.option_id)
    }
}

/// The resolved result of an event. `scored_at` is the idempotency marker:
/// once set, re-processing without force is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub event_id: i64,
    pub winning_choice_id: Option<i64>,
    pub winning_option_id: Option<i64>,
    /// Voided event: every active lock is refunded and no scores are created.
    pub is_forfeit: bool,
    pub resolved_at: DateTime<Utc>,
    pub scored_at: Option<DateTime<Utc>>,
    /// Last event-level scoring error, or the void note; empty on success.
    pub score_note: String,
}

impl Outcome {
    pub fn winning_selection(&self) -> Option<Selection> {
        Selection::from_parts(self.winning_choice_id, self.winning_option_id)
    }

    pub fn is_scored(&self) -> bool {
        self.scored_at.is_some()
    }
}

/// At most one per (user, event); the existence of this row is the source of
/// truth for "this user was scored for this event".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub id: i64,
    pub user_id: i64,
    pub event_id: i64,
    pub base_points: i64,
    pub lock_multiplier: i64,
    pub points_awarded: i64,
    pub is_lock_bonus: bool,
    pub awarded_at: DateTime<Utc>,
}

/// Per-(user, season) decaying reputation score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotnessRecord {
    pub user_id: i64,
    pub season_id: Option<i64>,
    pub score: f64,
    pub last_decay_at: DateTime<Utc>,
}

impl HotnessRecord {
    /// Apply linear decay for the elapsed time since the last decay. The
    /// score never goes below zero.
    pub fn decay(&mut self, rate_per_hour: f64, now: DateTime<Utc>) {
        let elapsed_hours = (now - self.last_decay_at).num_seconds() as f64 / 3600.0;
        if elapsed_hours > 0.0 {
            self.score = (self.score - elapsed_hours * rate_per_hour).max(0.0);
        }
        self.last_decay_at = now;
    }
}

/// A single peer-to-peer hotness grant. `granted_on` is the calendar day the
/// daily-uniqueness constraint keys on; privileged grants store no day and
/// are therefore unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KudosGrant {
    pub id: i64,
    pub giver_id: i64,
    pub receiver_id: i64,
    pub season_id: Option<i64>,
    pub granted_on: Option<NaiveDate>,
    pub granted_at: DateTime<Utc>,
}

/// Badge kinds handed out by the ranking calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementKind {
    SeasonGold,
    SeasonSilver,
    SeasonBronze,
    BetaTester,
}

impl AchievementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AchievementKind::SeasonGold => "season_gold",
            AchievementKind::SeasonSilver => "season_silver",
            AchievementKind::SeasonBronze => "season_bronze",
            AchievementKind::BetaTester => "beta_tester",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "season_gold" => Some(AchievementKind::SeasonGold),
            "season_silver" => Some(AchievementKind::SeasonSilver),
            "season_bronze" => Some(AchievementKind::SeasonBronze),
            "beta_tester" => Some(AchievementKind::BetaTester),
            _ => None,
        }
    }
}

/// An idempotently awarded badge, unique per (user, season-or-none, kind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Achievement {
    pub id: i64,
    pub user_id: i64,
    pub season_id: Option<i64>,
    pub kind: AchievementKind,
    pub name: String,
    pub description: String,
    pub emoji: String,
    pub awarded_at: DateTime<Utc>,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    /// Hotness points shed per hour since the last decay.
    pub hotness_decay_per_hour: f64,
    /// Gate for scheduled score processing; `score-all` honours it unless
    /// overridden.
    pub auto_process_scores: bool,
    /// Default lookback window for the pending-outcome sweep.
    pub score_hours_back: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./tipoff.db".to_string());

        let hotness_decay_per_hour = std::env::var("HOTNESS_DECAY_PER_HOUR")
            .unwrap_or_else(|_| "0.1".to_string())
            .parse()
            .unwrap_or(0.1);

        let auto_process_scores = std::env::var("AUTO_PROCESS_SCORES")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(true);

        let score_hours_back = std::env::var("SCORE_PROCESSING_HOURS_BACK")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .unwrap_or(24);

        Ok(Self {
            database_path,
            hotness_decay_per_hour,
            auto_process_scores,
            score_hours_back,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "./tipoff.db".to_string(),
            hotness_decay_per_hour: 0.1,
            auto_process_scores: true,
            score_hours_back: 24,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_lock_status_round_trip() {
        for status in [
            LockStatus::None,
            LockStatus::Active,
            LockStatus::WasLocked,
            LockStatus::Forfeited,
            LockStatus::Returned,
        ] {
            assert_eq!(LockStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(LockStatus::from_str("bogus"), None);
    }

    #[test]
    fn test_bonus_statuses() {
        assert!(LockStatus::Active.grants_bonus());
        assert!(LockStatus::WasLocked.grants_bonus());
        assert!(!LockStatus::None.grants_bonus());
        assert!(!LockStatus::Forfeited.grants_bonus());
        assert!(!LockStatus::Returned.grants_bonus());
    }

    #[test]
    fn test_selection_prefers_curated() {
        assert_eq!(
            Selection::from_parts(Some(7), Some(3)),
            Some(Selection::Curated(7))
        );
        assert_eq!(
            Selection::from_parts(None, Some(3)),
            Some(Selection::Generic(3))
        );
        assert_eq!(Selection::from_parts(None, None), None);
    }

    #[test]
    fn test_season_boundaries() {
        let season = Season {
            id: 1,
            name: "2025/26".to_string(),
            start_date: NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 4, 30).unwrap(),
        };

        assert!(season.contains(NaiveDate::from_ymd_opt(2025, 10, 1).unwrap()));
        assert!(season.contains(NaiveDate::from_ymd_opt(2026, 4, 30).unwrap()));
        assert!(!season.contains(NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()));

        assert!(!season.is_closed(NaiveDate::from_ymd_opt(2026, 4, 30).unwrap()));
        assert!(season.is_closed(NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()));
    }

    #[test]
    fn test_decay_is_linear_and_floored() {
        let now = Utc::now();
        let mut record = HotnessRecord {
            user_id: 1,
            season_id: None,
            score: 50.0,
            last_decay_at: now - Duration::hours(10),
        };

        record.decay(0.1, now);
        assert!((record.score - 49.0).abs() < 1e-6);
        assert_eq!(record.last_decay_at, now);

        // A long idle stretch cannot push the score below zero.
        record.score = 1.0;
        record.last_decay_at = now - Duration::hours(100);
        record.decay(0.1, now);
        assert_eq!(record.score, 0.0);
    }

    #[test]
    fn test_achievement_kind_round_trip() {
        for kind in [
            AchievementKind::SeasonGold,
            AchievementKind::SeasonSilver,
            AchievementKind::SeasonBronze,
            AchievementKind::BetaTester,
        ] {
            assert_eq!(AchievementKind::from_str(kind.as_str()), Some(kind));
        }
    }
}
