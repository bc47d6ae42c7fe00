//! Scoring engine: resolves outcomes into score rows, exactly once.
//!
//! One outcome is scored inside one immediate transaction; either every
//! write of the pass lands (scores, lock transitions, hotness, the
//! `scored_at` marker) or none do. Re-running without `force` is a no-op
//! that returns the existing rows, so the batch sweep can be retried
//! freely.

use crate::hotness;
use crate::locks;
use crate::models::{Config, Score, Selection};
use crate::store::{self, PoolStore};
use anyhow::Result;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tracing::{info, warn};

/// Note stamped on a voided outcome the first time it is processed.
const FORFEIT_NOTE: &str = "Forfeited match: no scores awarded";

/// Event-level scoring failures. These abort the single outcome, are
/// recorded on it, and leave `scored_at` unset so the next run retries.
#[derive(Debug, Clone)]
pub enum ScoringError {
    /// The outcome names no winning selection and is not a forfeit.
    NoSelection { event: String },
    /// Malformed input (missing event, dangling outcome, ...).
    Validation(String),
}

impl std::fmt::Display for ScoringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSelection { event } => {
                write!(f, "Outcome for {} names no winning selection", event)
            }
            Self::Validation(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ScoringError {}

/// One user's scoring result within an outcome pass.
#[derive(Debug, Clone)]
pub struct AwardedScore {
    pub score: Score,
    pub created: bool,
}

/// Summary returned when an outcome is scored.
#[derive(Debug, Clone, Default)]
pub struct ScoreOutcomeResult {
    pub event_id: i64,
    pub event_name: String,
    pub awarded: Vec<AwardedScore>,
    pub skipped_tips: usize,
    pub locks_released: usize,
    pub locks_forfeited: usize,
    /// Locks refunded because the match itself was voided.
    pub locks_refunded: usize,
    pub was_forfeit: bool,
    /// True when the idempotent fast path returned existing rows unchanged.
    pub already_scored: bool,
}

impl ScoreOutcomeResult {
    pub fn total_awarded_points(&self) -> i64 {
        self.awarded.iter().map(|a| a.score.points_awarded).sum()
    }

    pub fn created_count(&self) -> usize {
        self.awarded.iter().filter(|a| a.created).count()
    }

    pub fn updated_count(&self) -> usize {
        self.awarded.len() - self.created_count()
    }
}

/// Whether a tip's pick agrees with the winning selection.
///
/// `parents` maps curated choice id → parent catalogue option id for the
/// event. A pick matches directly, or through a shared parent when either
/// side is curated.
pub fn selection_matches(
    tip: Selection,
    winning: Selection,
    parents: &HashMap<i64, i64>,
) -> bool {
    match (tip, winning) {
        (Selection::Curated(t), Selection::Curated(w)) => {
            t == w
                || matches!(
                    (parents.get(&t), parents.get(&w)),
                    (Some(a), Some(b)) if a == b
                )
        }
        (Selection::Curated(t), Selection::Generic(g)) => parents.get(&t) == Some(&g),
        (Selection::Generic(g), Selection::Curated(w)) => parents.get(&w) == Some(&g),
        (Selection::Generic(a), Selection::Generic(b)) => a == b,
    }
}

/// Score every tip on the event against its resolved outcome.
///
/// With `force`, existing score rows for the event are deleted and
/// recomputed against the event's current point value. Without it, an
/// already-processed outcome returns its existing rows unchanged.
pub fn score_outcome(
    store: &PoolStore,
    cfg: &Config,
    event_id: i64,
    force: bool,
) -> Result<ScoreOutcomeResult> {
    let result = store.with_tx(|tx| score_outcome_in_tx(tx, cfg, event_id, force));

    // Event-level failures are remembered on the outcome so operators see
    // them; the idempotency marker stays unset and the next run retries.
    if let Err(ref err) = result {
        if let Some(scoring_err) = err.downcast_ref::<ScoringError>() {
            let message = scoring_err.to_string();
            let _ = store.with_conn(|conn| store::set_outcome_error(conn, event_id, &message));
        }
    }

    result
}

fn score_outcome_in_tx(
    conn: &rusqlite::Connection,
    cfg: &Config,
    event_id: i64,
    force: bool,
) -> Result<ScoreOutcomeResult> {
    let event = store::get_event(conn, event_id)?.ok_or_else(|| {
        ScoringError::Validation(format!("Event {} not found", event_id))
    })?;
    let outcome = store::get_outcome(conn, event_id)?.ok_or_else(|| {
        ScoringError::Validation(format!("Event {} has no recorded outcome", event.name))
    })?;

    let now = Utc::now();
    let mut result = ScoreOutcomeResult {
        event_id: event.id,
        event_name: event.name.clone(),
        ..Default::default()
    };

    // A voided match refunds every active lock and never creates scores,
    // regardless of which pick would have won.
    if outcome.is_forfeit {
        result.was_forfeit = true;
        for tip in store::tips_for_event(conn, event_id)? {
            if locks::refund_for_forfeited_event(conn, &tip, now)? {
                result.locks_refunded += 1;
            }
        }
        if outcome.scored_at.is_none() {
            store::mark_outcome_scored(conn, event_id, now, FORFEIT_NOTE)?;
        } else {
            result.already_scored = true;
        }
        info!(
            event = %event.name,
            refunded = result.locks_refunded,
            "voided match processed"
        );
        return Ok(result);
    }

    let winning = outcome.winning_selection().ok_or_else(|| ScoringError::NoSelection {
        event: event.name.clone(),
    })?;

    if !force && outcome.is_scored() {
        result.already_scored = true;
        result.awarded = store::scores_for_event(conn, event_id)?
            .into_iter()
            .map(|score| AwardedScore {
                score,
                created: false,
            })
            .collect();
        return Ok(result);
    }

    if force {
        store::delete_scores_for_event(conn, event_id)?;
    }

    let parents = store::choice_parents_for_event(conn, event_id)?;
    let season = store::active_season(conn, now.date_naive())?;
    let season_id = season.as_ref().map(|s| s.id);

    for tip in store::tips_for_event(conn, event_id)? {
        let matched = tip
            .selection()
            .map(|sel| selection_matches(sel, winning, &parents))
            .unwrap_or(false);

        if !matched {
            if locks::schedule_forfeit(conn, &tip, outcome.resolved_at)? {
                result.locks_forfeited += 1;
            }
            result.skipped_tips += 1;
            continue;
        }

        let multiplier = if tip.lock_status.grants_bonus() { 2 } else { 1 };
        let (score, created) = store::upsert_score(
            conn,
            tip.user_id,
            event.id,
            event.points,
            multiplier,
            multiplier > 1,
            now,
        )?;
        result.awarded.push(AwardedScore { score, created });

        if locks::release_after_scoring(conn, &tip, now)? {
            result.locks_released += 1;
        }

        hotness::award_for_correct_prediction(
            conn,
            cfg,
            tip.user_id,
            multiplier > 1,
            season_id,
            now,
        )?;
    }

    store::mark_outcome_scored(conn, event_id, now, "")?;

    info!(
        event = %event.name,
        created = result.created_count(),
        updated = result.updated_count(),
        skipped = result.skipped_tips,
        "outcome scored"
    );
    Ok(result)
}

/// Options for the batch sweep.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Re-score already-processed outcomes from scratch.
    pub force: bool,
    /// Report what would be processed without writing.
    pub dry_run: bool,
    /// Only consider outcomes resolved within the last N hours.
    pub hours_back: Option<i64>,
    /// Run even when `AUTO_PROCESS_SCORES` disables the scheduled sweep.
    pub force_automation: bool,
}

/// Summary of one batch sweep.
#[derive(Debug, Clone, Default)]
pub struct BatchScoreResult {
    /// True when the automation gate stopped the run before it started.
    pub automation_disabled: bool,
    /// Event names that a dry run would have processed, with tip counts.
    pub planned: Vec<(String, usize)>,
    pub events_processed: usize,
    pub scores_created: usize,
    pub scores_updated: usize,
    pub tips_skipped: usize,
    pub locks_released: usize,
    pub locks_forfeited: usize,
    pub locks_refunded: usize,
    /// Per-event failures as "<event>: <message>"; never aborts the batch.
    pub errors: Vec<String>,
}

/// Score every pending outcome, each in its own transaction.
///
/// One event's failure is recorded and the sweep moves on; partial progress
/// on other events is kept.
pub fn score_all_pending(
    store: &PoolStore,
    cfg: &Config,
    opts: &BatchOptions,
) -> Result<BatchScoreResult> {
    let mut result = BatchScoreResult::default();

    if !opts.force_automation && !cfg.auto_process_scores {
        warn!("Score processing is disabled via AUTO_PROCESS_SCORES");
        result.automation_disabled = true;
        return Ok(result);
    }

    let since = opts.hours_back.map(|hours| Utc::now() - Duration::hours(hours));
    let outcomes = store.with_conn(|conn| store::outcomes_to_score(conn, opts.force, since))?;

    if opts.dry_run {
        for outcome in &outcomes {
            let (name, tips) = store.with_conn(|conn| {
                let name = store::get_event(conn, outcome.event_id)?
                    .map(|e| e.name)
                    .unwrap_or_else(|| format!("event {}", outcome.event_id));
                let tips = store::tips_for_event(conn, outcome.event_id)?.len();
                Ok((name, tips))
            })?;
            result.planned.push((name, tips));
        }
        return Ok(result);
    }

    for outcome in outcomes {
        let event_name = store
            .with_conn(|conn| {
                Ok(store::get_event(conn, outcome.event_id)?.map(|e| e.name))
            })?
            .unwrap_or_else(|| format!("event {}", outcome.event_id));

        match score_outcome(store, cfg, outcome.event_id, opts.force) {
            Ok(one) => {
                result.events_processed += 1;
                result.scores_created += one.created_count();
                result.scores_updated += if one.already_scored { 0 } else { one.updated_count() };
                result.tips_skipped += one.skipped_tips;
                result.locks_released += one.locks_released;
                result.locks_forfeited += one.locks_forfeited;
                result.locks_refunded += one.locks_refunded;
            }
            Err(e) => {
                warn!(event = %event_name, error = %e, "scoring failed");
                result.errors.push(format!("{}: {}", event_name, e));
            }
        }
    }

    info!(
        processed = result.events_processed,
        created = result.scores_created,
        errors = result.errors.len(),
        "batch scoring complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LockStatus, Tip};
    use chrono::{DateTime, Duration, Utc};

    struct Fixture {
        store: PoolStore,
        cfg: Config,
    }

    fn fixture() -> Fixture {
        Fixture {
            store: PoolStore::in_memory().expect("in-memory store"),
            cfg: Config::default(),
        }
    }

    impl Fixture {
        fn user(&self, name: &str) -> i64 {
            self.store
                .with_conn(|conn| Ok(store::ensure_user(conn, name, Utc::now(), false)?.id))
                .unwrap()
        }

        fn event(&self, name: &str, points: i64) -> i64 {
            self.store
                .with_conn(|conn| {
                    Ok(store::create_event(conn, name, points, Utc::now(), "manual")?.id)
                })
                .unwrap()
        }

        fn option(&self, slug: &str) -> i64 {
            self.store
                .with_conn(|conn| Ok(store::upsert_catalog_option(conn, slug, slug)?.0.id))
                .unwrap()
        }

        fn choice(&self, event_id: i64, label: &str, option_id: Option<i64>) -> i64 {
            self.store
                .with_conn(|conn| Ok(store::upsert_choice(conn, event_id, label, option_id, 0)?.id))
                .unwrap()
        }

        fn tip(&self, user_id: i64, event_id: i64, selection: Selection, locked: bool) -> i64 {
            self.store
                .with_conn(|conn| {
                    let now = Utc::now();
                    let tip = store::create_tip(conn, user_id, event_id, selection, now)?;
                    if locked {
                        locks::commit_lock(conn, &tip, now)?;
                    }
                    Ok(tip.id)
                })
                .unwrap()
        }

        fn resolve(&self, event_id: i64, winning: Option<Selection>, resolved_at: DateTime<Utc>) {
            self.store
                .with_conn(|conn| {
                    store::record_outcome(conn, event_id, winning, false, resolved_at)?;
                    Ok(())
                })
                .unwrap()
        }

        fn void(&self, event_id: i64, resolved_at: DateTime<Utc>) {
            self.store
                .with_conn(|conn| {
                    store::record_outcome(conn, event_id, None, true, resolved_at)?;
                    Ok(())
                })
                .unwrap()
        }

        fn tip_row(&self, tip_id: i64) -> Tip {
            self.store
                .with_conn(|conn| Ok(store::get_tip(conn, tip_id)?.expect("tip exists")))
                .unwrap()
        }

        fn scores(&self, event_id: i64) -> Vec<Score> {
            self.store
                .with_conn(|conn| store::scores_for_event(conn, event_id))
                .unwrap()
        }
    }

    #[test]
    fn test_selection_matching_rules() {
        let mut parents = HashMap::new();
        parents.insert(10, 1); // choice 10 → option 1
        parents.insert(11, 2); // choice 11 → option 2
        parents.insert(12, 1); // second choice backed by option 1

        // Direct hits.
        assert!(selection_matches(
            Selection::Curated(10),
            Selection::Curated(10),
            &parents
        ));
        assert!(selection_matches(
            Selection::Generic(1),
            Selection::Generic(1),
            &parents
        ));

        // Through the shared parent.
        assert!(selection_matches(
            Selection::Generic(1),
            Selection::Curated(10),
            &parents
        ));
        assert!(selection_matches(
            Selection::Curated(10),
            Selection::Generic(1),
            &parents
        ));
        assert!(selection_matches(
            Selection::Curated(10),
            Selection::Curated(12),
            &parents
        ));

        // Mismatches.
        assert!(!selection_matches(
            Selection::Curated(10),
            Selection::Curated(11),
            &parents
        ));
        assert!(!selection_matches(
            Selection::Generic(2),
            Selection::Curated(10),
            &parents
        ));
        assert!(!selection_matches(
            Selection::Generic(1),
            Selection::Generic(2),
            &parents
        ));
        // A curated pick with no parent only matches itself.
        assert!(!selection_matches(
            Selection::Curated(99),
            Selection::Generic(1),
            &parents
        ));
    }

    #[test]
    fn test_scores_matching_tips_and_skips_wrong_ones() {
        let f = fixture();
        let alice = f.user("alice");
        let bob = f.user("bob");
        let event = f.event("Game 1", 3);
        let hawks = f.option("hawks");
        let lions = f.option("lions");
        f.tip(alice, event, Selection::Generic(hawks), false);
        f.tip(bob, event, Selection::Generic(lions), false);
        f.resolve(event, Some(Selection::Generic(hawks)), Utc::now());

        let result = score_outcome(&f.store, &f.cfg, event, false).unwrap();
        assert_eq!(result.awarded.len(), 1);
        assert_eq!(result.created_count(), 1);
        assert_eq!(result.skipped_tips, 1);
        assert_eq!(result.total_awarded_points(), 3);

        let scores = f.scores(event);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].user_id, alice);
        assert_eq!(scores[0].base_points, 3);
        assert_eq!(scores[0].lock_multiplier, 1);
        assert_eq!(scores[0].points_awarded, 3);
        assert!(!scores[0].is_lock_bonus);
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let f = fixture();
        let alice = f.user("alice");
        let event = f.event("Game 1", 2);
        let hawks = f.option("hawks");
        f.tip(alice, event, Selection::Generic(hawks), false);
        f.resolve(event, Some(Selection::Generic(hawks)), Utc::now());

        let first = score_outcome(&f.store, &f.cfg, event, false).unwrap();
        assert!(!first.already_scored);
        let before = f.scores(event);

        let second = score_outcome(&f.store, &f.cfg, event, false).unwrap();
        assert!(second.already_scored);
        assert_eq!(second.created_count(), 0);
        assert_eq!(second.awarded.len(), 1);

        let after = f.scores(event);
        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].awarded_at, after[0].awarded_at);
        assert_eq!(before[0].points_awarded, after[0].points_awarded);

        // The no-op also skips hotness: still a single correct-pick award.
        f.store
            .with_conn(|conn| {
                let record = store::get_hotness(conn, alice, None)?.expect("hotness exists");
                assert!((record.score - hotness::HOTNESS_CORRECT_PREDICTION).abs() < 1e-6);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_forced_rescore_uses_current_points() {
        let f = fixture();
        let alice = f.user("alice");
        let event = f.event("Game 1", 2);
        let hawks = f.option("hawks");
        f.tip(alice, event, Selection::Generic(hawks), false);
        f.resolve(event, Some(Selection::Generic(hawks)), Utc::now());

        score_outcome(&f.store, &f.cfg, event, false).unwrap();
        f.store
            .with_conn(|conn| store::set_event_points(conn, event, 5))
            .unwrap();

        let result = score_outcome(&f.store, &f.cfg, event, true).unwrap();
        assert_eq!(result.created_count(), 1);
        let scores = f.scores(event);
        assert_eq!(scores[0].base_points, 5);
        assert_eq!(scores[0].points_awarded, 5);
    }

    #[test]
    fn test_locked_correct_tip_doubles_and_releases() {
        let f = fixture();
        let alice = f.user("alice");
        let event = f.event("Game 1", 3);
        let hawks = f.option("hawks");
        let tip_id = f.tip(alice, event, Selection::Generic(hawks), true);
        f.resolve(event, Some(Selection::Generic(hawks)), Utc::now());

        let result = score_outcome(&f.store, &f.cfg, event, false).unwrap();
        assert_eq!(result.locks_released, 1);

        let scores = f.scores(event);
        assert_eq!(scores[0].points_awarded, 6);
        assert_eq!(scores[0].lock_multiplier, 2);
        assert!(scores[0].is_lock_bonus);

        let tip = f.tip_row(tip_id);
        assert_eq!(tip.lock_status, LockStatus::WasLocked);
        assert!(tip.lock_released_at.is_some());
    }

    #[test]
    fn test_locked_wrong_tip_forfeits() {
        let f = fixture();
        let alice = f.user("alice");
        let event = f.event("Game 1", 3);
        let hawks = f.option("hawks");
        let lions = f.option("lions");
        let tip_id = f.tip(alice, event, Selection::Generic(lions), true);
        let resolved_at = Utc::now() - Duration::hours(1);
        f.resolve(event, Some(Selection::Generic(hawks)), resolved_at);

        let result = score_outcome(&f.store, &f.cfg, event, false).unwrap();
        assert_eq!(result.locks_forfeited, 1);
        assert_eq!(result.skipped_tips, 1);
        assert!(f.scores(event).is_empty());

        let tip = f.tip_row(tip_id);
        assert_eq!(tip.lock_status, LockStatus::Forfeited);
        assert!(tip.lock_released_at.is_none());
        let releases_at = tip.lock_releases_at.expect("cooldown scheduled");
        let expected = resolved_at + Duration::days(locks::LOCK_RETURN_DELAY_DAYS);
        assert!((releases_at - expected).num_seconds().abs() <= 1);
    }

    #[test]
    fn test_voided_match_refunds_and_never_scores() {
        let f = fixture();
        let alice = f.user("alice");
        let bob = f.user("bob");
        let event = f.event("Game 1", 3);
        let hawks = f.option("hawks");
        let lions = f.option("lions");
        // Alice's pick would have won, Bob's lost; neither matters.
        let locked_tip = f.tip(alice, event, Selection::Generic(hawks), true);
        let plain_tip = f.tip(bob, event, Selection::Generic(lions), false);
        f.void(event, Utc::now());

        let result = score_outcome(&f.store, &f.cfg, event, false).unwrap();
        assert!(result.was_forfeit);
        assert!(result.awarded.is_empty());
        assert_eq!(result.locks_refunded, 1);
        assert!(f.scores(event).is_empty());

        let tip = f.tip_row(locked_tip);
        assert_eq!(tip.lock_status, LockStatus::None);
        assert!(tip.lock_released_at.is_some());

        // An unlocked tip is untouched.
        let tip = f.tip_row(plain_tip);
        assert_eq!(tip.lock_status, LockStatus::None);
        assert!(tip.lock_released_at.is_none());

        f.store
            .with_conn(|conn| {
                let outcome = store::get_outcome(conn, event)?.expect("outcome exists");
                assert!(outcome.is_scored());
                assert_eq!(outcome.score_note, FORFEIT_NOTE);
                Ok(())
            })
            .unwrap();

        // Second pass keeps the empty result.
        let again = score_outcome(&f.store, &f.cfg, event, false).unwrap();
        assert!(again.already_scored);
        assert_eq!(again.locks_refunded, 0);
    }

    #[test]
    fn test_was_locked_keeps_bonus_on_forced_rescore() {
        let f = fixture();
        let alice = f.user("alice");
        let event = f.event("Game 1", 3);
        let hawks = f.option("hawks");
        let tip_id = f.tip(alice, event, Selection::Generic(hawks), true);
        f.resolve(event, Some(Selection::Generic(hawks)), Utc::now());

        score_outcome(&f.store, &f.cfg, event, false).unwrap();
        assert_eq!(f.tip_row(tip_id).lock_status, LockStatus::WasLocked);

        let result = score_outcome(&f.store, &f.cfg, event, true).unwrap();
        assert_eq!(result.created_count(), 1);
        let scores = f.scores(event);
        assert_eq!(scores[0].points_awarded, 6);
        assert!(scores[0].is_lock_bonus);
        assert_eq!(f.tip_row(tip_id).lock_status, LockStatus::WasLocked);
    }

    #[test]
    fn test_outcome_without_selection_fails_and_retries() {
        let f = fixture();
        let alice = f.user("alice");
        let event = f.event("Game 1", 3);
        let hawks = f.option("hawks");
        f.tip(alice, event, Selection::Generic(hawks), false);
        f.resolve(event, None, Utc::now());

        let err = score_outcome(&f.store, &f.cfg, event, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ScoringError>(),
            Some(ScoringError::NoSelection { .. })
        ));

        f.store
            .with_conn(|conn| {
                let outcome = store::get_outcome(conn, event)?.expect("outcome exists");
                assert!(!outcome.is_scored());
                assert!(outcome.score_note.contains("no winning selection"));
                Ok(())
            })
            .unwrap();

        // Fixing the outcome lets the next run succeed and clear the note.
        f.resolve(event, Some(Selection::Generic(hawks)), Utc::now());
        score_outcome(&f.store, &f.cfg, event, false).unwrap();
        f.store
            .with_conn(|conn| {
                let outcome = store::get_outcome(conn, event)?.expect("outcome exists");
                assert!(outcome.is_scored());
                assert!(outcome.score_note.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_curated_choice_matches_through_parent() {
        let f = fixture();
        let alice = f.user("alice");
        let bob = f.user("bob");
        let event = f.event("Finals MVP", 4);
        let star = f.option("star-guard");
        let rival = f.option("rival-center");
        let star_choice = f.choice(event, "Star Guard", Some(star));
        f.choice(event, "Rival Center", Some(rival));

        // Alice picked the curated entry, Bob the generic catalogue option.
        f.tip(alice, event, Selection::Curated(star_choice), false);
        f.tip(bob, event, Selection::Generic(star), false);
        f.resolve(event, Some(Selection::Curated(star_choice)), Utc::now());

        let result = score_outcome(&f.store, &f.cfg, event, false).unwrap();
        assert_eq!(result.created_count(), 2);
        assert_eq!(result.skipped_tips, 0);
    }

    #[test]
    fn test_batch_isolates_per_event_failures() {
        let f = fixture();
        let alice = f.user("alice");
        let good = f.event("Good", 2);
        let bad = f.event("Bad", 2);
        let hawks = f.option("hawks");
        f.tip(alice, good, Selection::Generic(hawks), false);
        f.tip(alice, bad, Selection::Generic(hawks), false);
        f.resolve(good, Some(Selection::Generic(hawks)), Utc::now());
        f.resolve(bad, None, Utc::now());

        let result =
            score_all_pending(&f.store, &f.cfg, &BatchOptions::default()).unwrap();
        assert_eq!(result.events_processed, 1);
        assert_eq!(result.scores_created, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("Bad:"));

        // The good event is durably scored.
        assert_eq!(f.scores(good).len(), 1);
    }

    #[test]
    fn test_batch_automation_gate() {
        let f = fixture();
        let mut cfg = f.cfg.clone();
        cfg.auto_process_scores = false;

        let gated = score_all_pending(&f.store, &cfg, &BatchOptions::default()).unwrap();
        assert!(gated.automation_disabled);

        let opts = BatchOptions {
            force_automation: true,
            ..Default::default()
        };
        let forced = score_all_pending(&f.store, &cfg, &opts).unwrap();
        assert!(!forced.automation_disabled);
    }

    #[test]
    fn test_batch_dry_run_writes_nothing() {
        let f = fixture();
        let alice = f.user("alice");
        let event = f.event("Game 1", 2);
        let hawks = f.option("hawks");
        f.tip(alice, event, Selection::Generic(hawks), false);
        f.resolve(event, Some(Selection::Generic(hawks)), Utc::now());

        let opts = BatchOptions {
            dry_run: true,
            ..Default::default()
        };
        let result = score_all_pending(&f.store, &f.cfg, &opts).unwrap();
        assert_eq!(result.planned, vec![("Game 1".to_string(), 1)]);
        assert_eq!(result.events_processed, 0);

        assert!(f.scores(event).is_empty());
        f.store
            .with_conn(|conn| {
                let outcome = store::get_outcome(conn, event)?.expect("outcome exists");
                assert!(!outcome.is_scored());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_batch_hours_back_filter() {
        let f = fixture();
        let alice = f.user("alice");
        let old = f.event("Old", 2);
        let fresh = f.event("Fresh", 2);
        let hawks = f.option("hawks");
        f.tip(alice, old, Selection::Generic(hawks), false);
        f.tip(alice, fresh, Selection::Generic(hawks), false);
        f.resolve(old, Some(Selection::Generic(hawks)), Utc::now() - Duration::days(3));
        f.resolve(fresh, Some(Selection::Generic(hawks)), Utc::now());

        let opts = BatchOptions {
            hours_back: Some(24),
            ..Default::default()
        };
        let result = score_all_pending(&f.store, &f.cfg, &opts).unwrap();
        assert_eq!(result.events_processed, 1);
        assert!(f.scores(fresh).len() == 1);
        assert!(f.scores(old).is_empty());
    }
}
