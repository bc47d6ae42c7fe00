//! Event-source plugins.
//!
//! A source knows how to import catalogue options and prediction events from
//! somewhere (a feed, a file, a fixture slate). Sources are held in one
//! registration table built at startup; the first registered source is the
//! default and duplicate slugs are rejected.

use crate::store::{self, PoolStore};
use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::{info, warn};

/// Counters for one sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub events_created: usize,
    pub events_updated: usize,
    pub options_created: usize,
    pub options_updated: usize,
    pub errors: Vec<String>,
}

impl SyncStats {
    /// True when the sync modified the database.
    pub fn changed(&self) -> bool {
        self.events_created > 0
            || self.events_updated > 0
            || self.options_created > 0
            || self.options_updated > 0
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// An importer of catalogue options and prediction events.
pub trait EventSource {
    /// Stable identifier used for registry lookup and `events.source`.
    fn slug(&self) -> &'static str;

    /// Human-readable name for listings.
    fn name(&self) -> &'static str;

    /// Whether the source has everything it needs (credentials, files, ...).
    fn is_configured(&self) -> bool {
        true
    }

    /// Import or refresh catalogue options.
    fn sync_options(&self, store: &PoolStore) -> Result<SyncStats>;

    /// Import or refresh events, bounded to roughly `limit` upcoming ones.
    fn sync_events(&self, store: &PoolStore, limit: usize) -> Result<SyncStats>;
}

/// Registration table for event sources. Registration order is priority
/// order; the first source is the default.
pub struct SourceRegistry {
    sources: Vec<Box<dyn EventSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// The registry used by the CLI.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(DemoSource));
        registry
    }

    pub fn register(&mut self, source: Box<dyn EventSource>) {
        if self.sources.iter().any(|s| s.slug() == source.slug()) {
            warn!(slug = source.slug(), "event source already registered, skipping duplicate");
            return;
        }
        info!(slug = source.slug(), name = source.name(), "registered event source");
        self.sources.push(source);
    }

    pub fn get(&self, slug: &str) -> Option<&dyn EventSource> {
        self.sources
            .iter()
            .find(|s| s.slug() == slug)
            .map(|s| s.as_ref())
    }

    pub fn default_source(&self) -> Option<&dyn EventSource> {
        self.sources.first().map(|s| s.as_ref())
    }

    pub fn all(&self) -> impl Iterator<Item = &dyn EventSource> {
        self.sources.iter().map(|s| s.as_ref())
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Built-in fixture source: a small slate of teams and matchups so a fresh
/// install can exercise tipping, scoring and rankings end to end.
pub struct DemoSource;

const DEMO_TEAMS: [(&str, &str); 6] = [
    ("midtown-hawks", "Midtown Hawks"),
    ("harbor-lions", "Harbor Lions"),
    ("ridgeline-comets", "Ridgeline Comets"),
    ("dockside-kings", "Dockside Kings"),
    ("summit-foxes", "Summit Foxes"),
    ("old-town-bears", "Old Town Bears"),
];

/// (external ref, away slug, home slug, points, days until tip-off)
const DEMO_MATCHUPS: [(&str, &str, &str, i64, i64); 4] = [
    ("demo-0001", "harbor-lions", "midtown-hawks", 1, 1),
    ("demo-0002", "dockside-kings", "ridgeline-comets", 1, 2),
    ("demo-0003", "old-town-bears", "summit-foxes", 1, 3),
    ("demo-0004", "midtown-hawks", "dockside-kings", 2, 5),
];

impl EventSource for DemoSource {
    fn slug(&self) -> &'static str {
        "demo"
    }

    fn name(&self) -> &'static str {
        "Demo slate"
    }

    fn sync_options(&self, store: &PoolStore) -> Result<SyncStats> {
        store.with_tx(|tx| {
            let mut stats = SyncStats::default();
            for (slug, label) in DEMO_TEAMS {
                let (_, created) = store::upsert_catalog_option(tx, slug, label)?;
                if created {
                    stats.options_created += 1;
                } else {
                    stats.options_updated += 1;
                }
            }
            Ok(stats)
        })
    }

    fn sync_events(&self, store: &PoolStore, limit: usize) -> Result<SyncStats> {
        let now = Utc::now();
        store.with_tx(|tx| {
            let mut stats = SyncStats::default();
            for (external_ref, away, home, points, days_out) in
                DEMO_MATCHUPS.iter().take(limit)
            {
                let away_option = store::get_catalog_option_by_slug(tx, away)?;
                let home_option = store::get_catalog_option_by_slug(tx, home)?;
                let (Some(away_option), Some(home_option)) = (away_option, home_option) else {
                    stats
                        .errors
                        .push(format!("{}: teams not synced yet", external_ref));
                    continue;
                };

                let name = format!("{} @ {}", away_option.label, home_option.label);
                let deadline = now + Duration::days(*days_out);
                let (event, created) = store::upsert_event_by_ref(
                    tx,
                    external_ref,
                    &name,
                    *points,
                    deadline,
                    self.slug(),
                )?;
                if created {
                    stats.events_created += 1;
                } else {
                    stats.events_updated += 1;
                }

                store::upsert_choice(tx, event.id, &away_option.label, Some(away_option.id), 0)?;
                store::upsert_choice(tx, event.id, &home_option.label, Some(home_option.id), 1)?;
            }
            Ok(stats)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_rejects_duplicates_and_keeps_first() {
        let mut registry = SourceRegistry::new();
        registry.register(Box::new(DemoSource));
        registry.register(Box::new(DemoSource));
        assert_eq!(registry.all().count(), 1);
        assert_eq!(registry.default_source().map(|s| s.slug()), Some("demo"));
        assert!(registry.get("demo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_demo_sync_is_idempotent() {
        let store = PoolStore::in_memory().expect("in-memory store");
        let source = DemoSource;

        let options = source.sync_options(&store).unwrap();
        assert_eq!(options.options_created, DEMO_TEAMS.len());

        let events = source.sync_events(&store, 10).unwrap();
        assert_eq!(events.events_created, DEMO_MATCHUPS.len());
        assert!(!events.has_errors());

        // Second run updates in place instead of duplicating.
        let again = source.sync_events(&store, 10).unwrap();
        assert_eq!(again.events_created, 0);
        assert_eq!(again.events_updated, DEMO_MATCHUPS.len());

        store
            .with_conn(|conn| {
                let events = store::active_events(conn)?;
                assert_eq!(events.len(), DEMO_MATCHUPS.len());
                let choices = store::choices_for_event(conn, events[0].id)?;
                assert_eq!(choices.len(), 2);
                assert!(choices.iter().all(|c| c.option_id.is_some()));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_events_without_options_report_errors() {
        let store = PoolStore::in_memory().expect("in-memory store");
        let stats = DemoSource.sync_events(&store, 10).unwrap();
        assert_eq!(stats.events_created, 0);
        assert!(stats.has_errors());
    }

    #[test]
    fn test_event_limit_is_honoured() {
        let store = PoolStore::in_memory().expect("in-memory store");
        DemoSource.sync_options(&store).unwrap();
        let stats = DemoSource.sync_events(&store, 2).unwrap();
        assert_eq!(stats.events_created, 2);
    }
}
