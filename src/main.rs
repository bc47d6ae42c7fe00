//! Tipoff CLI
//!
//! Batch tooling for the prediction pool: event-source syncs, outcome
//! scoring, lock maintenance, kudos, and season achievement processing.
//! Per-item failures are printed with the offending entity's name; the
//! process only exits non-zero for systemic problems.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tipoff_backend::cards::CardRegistry;
use tipoff_backend::hotness::{self, KudosError};
use tipoff_backend::locks;
use tipoff_backend::models::Config;
use tipoff_backend::ranking::{self, RankingOptions};
use tipoff_backend::scoring::{self, BatchOptions};
use tipoff_backend::sources::{EventSource, SourceRegistry};
use tipoff_backend::store::{self, PoolStore};

#[derive(Parser, Debug)]
#[command(name = "tipoff")]
#[command(about = "Batch tooling for the prediction pool resolution engine")]
struct Cli {
    /// Path to the SQLite database (overrides DATABASE_PATH)
    #[arg(long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an event source sync (options first, then events)
    Sync {
        /// Source slug; defaults to the first registered source
        #[arg(short, long)]
        source: Option<String>,

        /// Upper bound on events to import
        #[arg(short, long, default_value = "7")]
        limit: usize,
    },

    /// List active events as rendered cards
    Events {
        /// Emit the raw event records as JSON instead of cards
        #[arg(long)]
        json: bool,
    },

    /// Score one resolved outcome
    ScoreOutcome {
        /// Event id to score
        #[arg(short, long)]
        event: i64,

        /// Delete existing scores and recalculate from scratch
        #[arg(long)]
        force: bool,
    },

    /// Score every pending outcome
    ScoreAll {
        /// Re-score already-processed outcomes as well
        #[arg(long)]
        force: bool,

        /// Show what would be processed without making changes
        #[arg(long)]
        dry_run: bool,

        /// Only consider outcomes resolved in the last N hours
        #[arg(long)]
        hours_back: Option<i64>,

        /// Run even if automation is disabled via environment variable
        #[arg(long)]
        force_automation: bool,
    },

    /// Process season medals and one-time badges
    Achievements {
        /// Restrict the medal pass to one season by name
        #[arg(long)]
        season: Option<String>,

        /// Process only one pass (e.g. "season_achievements")
        #[arg(long)]
        pass: Option<String>,

        /// Refresh descriptive fields of existing achievements
        #[arg(long)]
        force: bool,

        /// Show what would be processed without making changes
        #[arg(long)]
        dry_run: bool,
    },

    /// Return forfeited locks whose cooldown has expired
    ReleaseLocks,

    /// Give kudos from one user to another
    Kudos {
        /// Giver's username
        #[arg(long)]
        from: String,

        /// Receiver's username
        #[arg(long)]
        to: String,
    },

    /// Show ranked standings for a season
    Leaderboard {
        /// Season name
        #[arg(short, long)]
        season: String,

        /// Emit the standings as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = Config::from_env()?;
    if let Some(db) = cli.db {
        cfg.database_path = db;
    }
    let store = PoolStore::open(&cfg.database_path)?;

    match cli.command {
        Commands::Sync { source, limit } => run_sync(&store, source.as_deref(), limit),
        Commands::Events { json } => list_events(&store, json),
        Commands::ScoreOutcome { event, force } => run_score_outcome(&store, &cfg, event, force),
        Commands::ScoreAll {
            force,
            dry_run,
            hours_back,
            force_automation,
        } => run_score_all(
            &store,
            &cfg,
            BatchOptions {
                force,
                dry_run,
                hours_back,
                force_automation,
            },
        ),
        Commands::Achievements {
            season,
            pass,
            force,
            dry_run,
        } => run_achievements(
            &store,
            RankingOptions {
                season,
                pass,
                force,
                dry_run,
            },
        ),
        Commands::ReleaseLocks => run_release_locks(&store),
        Commands::Kudos { from, to } => run_kudos(&store, &cfg, &from, &to),
        Commands::Leaderboard { season, json } => show_leaderboard(&store, &season, json),
    }
}

fn run_sync(store: &PoolStore, slug: Option<&str>, limit: usize) -> Result<()> {
    let registry = SourceRegistry::with_defaults();
    let source = match slug {
        Some(slug) => registry
            .get(slug)
            .with_context(|| format!("No event source registered as '{}'", slug))?,
        None => registry
            .default_source()
            .context("No event sources registered")?,
    };

    if !source.is_configured() {
        println!("✗ Source {} is not configured", source.slug());
        return Ok(());
    }

    println!("Syncing via {} ({})...", source.name(), source.slug());
    let options = source.sync_options(store)?;
    let events = source.sync_events(store, limit)?;

    for error in options.errors.iter().chain(events.errors.iter()) {
        println!("  ⚠ {}", error);
    }
    println!(
        "✓ Options: {} created, {} updated. Events: {} created, {} updated.",
        options.options_created,
        options.options_updated,
        events.events_created,
        events.events_updated,
    );
    Ok(())
}

fn list_events(store: &PoolStore, json: bool) -> Result<()> {
    if json {
        let events = store.with_conn(|conn| store::active_events(conn))?;
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    let registry = CardRegistry::with_defaults();
    let cards = store.with_conn(|conn| {
        let mut cards = Vec::new();
        for event in store::active_events(conn)? {
            let choices = store::choices_for_event(conn, event.id)?;
            cards.push((event.id, registry.render(&event, &choices)));
        }
        Ok(cards)
    })?;

    if cards.is_empty() {
        println!("No active events.");
        return Ok(());
    }

    for (id, card) in cards {
        println!("[{}] {}", id, card.title);
        println!("    {}", card.subtitle);
        for line in &card.lines {
            println!("    {}", line);
        }
        println!();
    }
    Ok(())
}

fn run_score_outcome(store: &PoolStore, cfg: &Config, event_id: i64, force: bool) -> Result<()> {
    let result = scoring::score_outcome(store, cfg, event_id, force)?;

    if result.was_forfeit {
        println!(
            "✓ {} was a forfeited match: no scores awarded, {} locks refunded.",
            result.event_name, result.locks_refunded
        );
    } else if result.already_scored {
        println!(
            "{} was already scored. {} existing scores returned, no changes made.",
            result.event_name,
            result.awarded.len()
        );
    } else {
        println!(
            "✓ Scored {}. Awarded {} total points across {} tips \
             ({} created, {} updated). {} tips skipped, {} locks released, {} forfeited.",
            result.event_name,
            result.total_awarded_points(),
            result.awarded.len(),
            result.created_count(),
            result.updated_count(),
            result.skipped_tips,
            result.locks_released,
            result.locks_forfeited,
        );
    }
    Ok(())
}

fn run_score_all(store: &PoolStore, cfg: &Config, opts: BatchOptions) -> Result<()> {
    let dry_run = opts.dry_run;
    let result = scoring::score_all_pending(store, cfg, &opts)?;

    if result.automation_disabled {
        println!("Score processing is disabled via AUTO_PROCESS_SCORES");
        return Ok(());
    }

    if dry_run {
        println!("DRY RUN - No changes will be made");
        for (name, tips) in &result.planned {
            println!("  {} - {} tips", name, tips);
        }
        println!("Would process {} outcomes", result.planned.len());
        return Ok(());
    }

    if !result.errors.is_empty() {
        println!("Outcomes with errors:");
        for error in &result.errors {
            println!("  ⚠ {}", error);
        }
    }
    println!(
        "✓ Processed {} outcomes. Created {} scores, updated {}. \
         Skipped {} tips, released {} locks, forfeited {}, refunded {}.",
        result.events_processed,
        result.scores_created,
        result.scores_updated,
        result.tips_skipped,
        result.locks_released,
        result.locks_forfeited,
        result.locks_refunded,
    );
    Ok(())
}

fn run_achievements(store: &PoolStore, opts: RankingOptions) -> Result<()> {
    let dry_run = opts.dry_run;
    let result = ranking::process_achievements(store, &opts)?;

    for pass in &result.passes {
        println!("Processing {} achievements...", pass.name);
        for error in &pass.errors {
            println!("  ⚠ {}", error);
        }
        if dry_run {
            println!(
                "  Would create: {}, update: {}, skip: {}",
                pass.created, pass.updated, pass.skipped
            );
        } else {
            println!(
                "  Created: {}, updated: {}, skipped: {}",
                pass.created, pass.updated, pass.skipped
            );
        }
    }

    let errors = result.all_errors();
    if errors.is_empty() {
        println!(
            "✓ Complete. Created: {}, updated: {}, skipped: {}",
            result.total_created(),
            result.total_updated(),
            result.total_skipped()
        );
    } else {
        println!("Completed with {} error(s)", errors.len());
    }
    Ok(())
}

fn run_release_locks(store: &PoolStore) -> Result<()> {
    let returned = store.with_conn(|conn| locks::release_due_locks(conn, Utc::now()))?;
    println!("✓ Returned {} expired forfeited locks", returned);
    Ok(())
}

fn run_kudos(store: &PoolStore, cfg: &Config, from: &str, to: &str) -> Result<()> {
    let (giver, receiver) = store.with_conn(|conn| {
        let giver = store::get_user_by_username(conn, from)?
            .with_context(|| format!("Unknown user: {}", from))?;
        let receiver = store::get_user_by_username(conn, to)?
            .with_context(|| format!("Unknown user: {}", to))?;
        Ok((giver, receiver))
    })?;

    match hotness::give_kudos(store, cfg, giver.id, receiver.id) {
        Ok(receipt) => {
            println!(
                "✓ Kudos given to {}. New hotness: {:.1} (level {})",
                receiver.username, receipt.new_score, receipt.new_level
            );
            Ok(())
        }
        // Expected rejections are reported, not raised.
        Err(e) if e.downcast_ref::<KudosError>().is_some() => {
            println!("✗ {}", e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn show_leaderboard(store: &PoolStore, season: &str, json: bool) -> Result<()> {
    let rankings = ranking::season_rankings(store, season)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rankings)?);
        return Ok(());
    }
    if rankings.is_empty() {
        println!("No scores recorded for {}", season);
        return Ok(());
    }

    println!("=== {} ===", season);
    for entry in rankings {
        println!(
            "{:>3}. {:<20} {:>5} pts  ({} events)",
            entry.rank, entry.username, entry.total_points, entry.event_count
        );
    }
    Ok(())
}
