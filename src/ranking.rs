//! Season ranking and achievement awards.
//!
//! Once a season has closed, per-user totals are aggregated over the scores
//! awarded inside the season window, ranked with deterministic tie-breaking,
//! and the top three ranks receive medal achievements. A second,
//! season-independent pass grants a one-time badge to early registrants.
//! Every pass is idempotent: existing badges are skipped unless forced.

use crate::models::AchievementKind;
use crate::store::{self, PoolStore, SeasonStanding};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Registration cutoff for the one-time early-participant badge.
pub fn beta_cutoff() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, 20, 0, 0, 0)
        .single()
        .expect("valid cutoff timestamp")
}

struct MedalSpec {
    kind: AchievementKind,
    rank: usize,
    name: &'static str,
    description: &'static str,
    emoji: &'static str,
}

const MEDALS: [MedalSpec; 3] = [
    MedalSpec {
        kind: AchievementKind::SeasonGold,
        rank: 1,
        name: "Season Champion",
        description: "Finished in 1st place",
        emoji: "🥇",
    },
    MedalSpec {
        kind: AchievementKind::SeasonSilver,
        rank: 2,
        name: "Season Runner-Up",
        description: "Finished in 2nd place",
        emoji: "🥈",
    },
    MedalSpec {
        kind: AchievementKind::SeasonBronze,
        rank: 3,
        name: "Season Third Place",
        description: "Finished in 3rd place",
        emoji: "🥉",
    },
];

/// A user with their computed season rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedUser {
    pub user_id: i64,
    pub username: String,
    pub total_points: i64,
    pub event_count: i64,
    pub rank: usize,
}

/// Assign ranks over standings already sorted by the deterministic key
/// (points desc, event count desc, username asc).
///
/// Only a true tie — identical points and identical event count — shares a
/// rank; the next distinct row takes its 1-based position, so two users tied
/// at rank 1 push the next user to rank 3.
pub fn assign_ranks(standings: &[SeasonStanding]) -> Vec<RankedUser> {
    let mut ranked: Vec<RankedUser> = Vec::with_capacity(standings.len());
    for (position, entry) in standings.iter().enumerate() {
        let rank = match ranked.last() {
            Some(prev)
                if prev.total_points == entry.total_points
                    && prev.event_count == entry.event_count =>
            {
                prev.rank
            }
            _ => position + 1,
        };
        ranked.push(RankedUser {
            user_id: entry.user_id,
            username: entry.username.clone(),
            total_points: entry.total_points,
            event_count: entry.event_count,
            rank,
        });
    }
    ranked
}

/// Ranked standings for one season (read-only; backs the leaderboard view).
pub fn season_rankings(store: &PoolStore, season_name: &str) -> Result<Vec<RankedUser>> {
    store.with_conn(|conn| {
        let season = store::get_season_by_name(conn, season_name)?
            .ok_or_else(|| anyhow::anyhow!("Season {} not found", season_name))?;
        let standings = store::season_standings(conn, &season)?;
        Ok(assign_ranks(&standings))
    })
}

/// Result of one achievement pass.
#[derive(Debug, Clone, Default)]
pub struct PassResult {
    pub name: &'static str,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Options for the achievement processor.
#[derive(Debug, Clone, Default)]
pub struct RankingOptions {
    /// Restrict the medal pass to one season by name.
    pub season: Option<String>,
    /// Run only the named pass ("season_achievements" or "beta_tester").
    pub pass: Option<String>,
    /// Refresh descriptive fields of existing achievements.
    pub force: bool,
    /// Compute and report without writing.
    pub dry_run: bool,
}

/// Combined result of an achievement processing run.
#[derive(Debug, Clone, Default)]
pub struct RankingResult {
    pub passes: Vec<PassResult>,
}

impl RankingResult {
    pub fn total_created(&self) -> usize {
        self.passes.iter().map(|p| p.created).sum()
    }

    pub fn total_updated(&self) -> usize {
        self.passes.iter().map(|p| p.updated).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.passes.iter().map(|p| p.skipped).sum()
    }

    pub fn all_errors(&self) -> Vec<&str> {
        self.passes
            .iter()
            .flat_map(|p| p.errors.iter().map(String::as_str))
            .collect()
    }
}

/// Run the achievement passes: season medals over every closed season, then
/// the early-participant badge sweep.
pub fn process_achievements(store: &PoolStore, opts: &RankingOptions) -> Result<RankingResult> {
    let mut result = RankingResult::default();

    let run_pass = |name: &str| match &opts.pass {
        Some(filter) => filter == name,
        None => true,
    };

    if run_pass("season_achievements") {
        result.passes.push(process_season_medals(store, opts));
    }
    if run_pass("beta_tester") {
        result.passes.push(process_beta_testers(store, opts));
    }

    if result.passes.is_empty() {
        anyhow::bail!(
            "No achievement pass named {:?}",
            opts.pass.as_deref().unwrap_or("")
        );
    }

    info!(
        created = result.total_created(),
        updated = result.total_updated(),
        skipped = result.total_skipped(),
        errors = result.all_errors().len(),
        "achievement processing complete"
    );
    Ok(result)
}

fn process_season_medals(store: &PoolStore, opts: &RankingOptions) -> PassResult {
    let mut pass = PassResult {
        name: "season_achievements",
        ..Default::default()
    };

    let today = Utc::now().date_naive();
    let seasons = match collect_seasons(store, opts, today) {
        Ok(seasons) => seasons,
        Err(e) => {
            pass.errors.push(e.to_string());
            return pass;
        }
    };

    if seasons.is_empty() {
        pass.skipped += 1;
        return pass;
    }

    for season in seasons {
        // Every season settles (or fails) on its own; one bad season never
        // blocks the rest.
        let outcome = if opts.dry_run {
            store.with_conn(|conn| award_medals(conn, &season, opts, &mut pass))
        } else {
            store.with_tx(|tx| award_medals(tx, &season, opts, &mut pass))
        };
        if let Err(e) = outcome {
            warn!(season = %season.name, error = %e, "medal pass failed");
            pass.errors.push(format!("{}: {}", season.name, e));
        }
    }

    pass
}

fn collect_seasons(
    store: &PoolStore,
    opts: &RankingOptions,
    today: NaiveDate,
) -> Result<Vec<crate::models::Season>> {
    store.with_conn(|conn| match &opts.season {
        Some(name) => {
            let season = store::get_season_by_name(conn, name)?
                .ok_or_else(|| anyhow::anyhow!("Season {} not found", name))?;
            if !season.is_closed(today) {
                anyhow::bail!("Season {} has not ended yet", name);
            }
            Ok(vec![season])
        }
        None => store::closed_seasons(conn, today),
    })
}

fn award_medals(
    conn: &rusqlite::Connection,
    season: &crate::models::Season,
    opts: &RankingOptions,
    pass: &mut PassResult,
) -> Result<()> {
    let standings = store::season_standings(conn, season)?;
    let rankings = assign_ranks(&standings);
    if rankings.is_empty() {
        return Ok(());
    }

    let now = Utc::now();
    for medal in &MEDALS {
        // Ties mean several users can hold the same medal; a tie at rank 1
        // can equally leave a medal with no holder at all.
        for entry in rankings.iter().filter(|r| r.rank == medal.rank) {
            let existing =
                store::get_achievement(conn, entry.user_id, Some(season.id), medal.kind)?;

            if existing.is_some() && !opts.force {
                pass.skipped += 1;
                continue;
            }
            if opts.dry_run {
                pass.created += 1;
                continue;
            }

            let description = format!("{} in {}", medal.description, season.name);
            let created = store::upsert_achievement(
                conn,
                entry.user_id,
                Some(season.id),
                medal.kind,
                medal.name,
                &description,
                medal.emoji,
                now,
            )?;
            if created {
                pass.created += 1;
            } else {
                pass.updated += 1;
            }
        }
    }
    Ok(())
}

fn process_beta_testers(store: &PoolStore, opts: &RankingOptions) -> PassResult {
    let mut pass = PassResult {
        name: "beta_tester",
        ..Default::default()
    };

    let outcome = if opts.dry_run {
        store.with_conn(|conn| award_beta_testers(conn, opts, &mut pass))
    } else {
        store.with_tx(|tx| award_beta_testers(tx, opts, &mut pass))
    };
    if let Err(e) = outcome {
        warn!(error = %e, "beta-tester pass failed");
        pass.errors.push(e.to_string());
    }

    pass
}

fn award_beta_testers(
    conn: &rusqlite::Connection,
    opts: &RankingOptions,
    pass: &mut PassResult,
) -> Result<()> {
    let users = store::users_registered_before(conn, beta_cutoff())?;
    if users.is_empty() {
        pass.skipped += 1;
        return Ok(());
    }

    let now = Utc::now();
    for user in users {
        let existing = store::get_achievement(conn, user.id, None, AchievementKind::BetaTester)?;
        if existing.is_some() && !opts.force {
            pass.skipped += 1;
            continue;
        }
        if opts.dry_run {
            pass.created += 1;
            continue;
        }

        let created = store::upsert_achievement(
            conn,
            user.id,
            None,
            AchievementKind::BetaTester,
            "Beta Tester",
            "Joined during the public beta",
            "🏅",
            now,
        )?;
        if created {
            pass.created += 1;
        } else {
            pass.updated += 1;
        }
    }
    Ok(())
}
