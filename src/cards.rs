//! Card renderers: how an event is presented as a card.
//!
//! Renderers are plain data producers — which title, which subtitle, which
//! body lines — so callers (CLI today, web views upstream) stay free of
//! per-source presentation logic. The registry walks renderers in priority
//! order and always falls back to the default renderer.

use crate::models::{Choice, Event};
use tracing::warn;

/// Plain-data representation of a rendered event card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCard {
    pub title: String,
    pub subtitle: String,
    pub lines: Vec<String>,
}

/// Decides whether and how to render an event.
pub trait CardRenderer {
    /// Stable identifier for listings and duplicate detection.
    fn slug(&self) -> &'static str;

    /// Higher priority renderers are consulted first.
    fn priority(&self) -> i32 {
        0
    }

    fn can_render(&self, event: &Event) -> bool;

    fn render(&self, event: &Event, choices: &[Choice]) -> EventCard;
}

/// Fallback renderer that handles any event.
pub struct DefaultCardRenderer;

impl CardRenderer for DefaultCardRenderer {
    fn slug(&self) -> &'static str {
        "default"
    }

    fn can_render(&self, _event: &Event) -> bool {
        true
    }

    fn render(&self, event: &Event, choices: &[Choice]) -> EventCard {
        EventCard {
            title: event.name.clone(),
            subtitle: format!(
                "{} pts · closes {}",
                event.points,
                event.deadline.format("%Y-%m-%d %H:%M UTC")
            ),
            lines: choices.iter().map(|c| c.label.clone()).collect(),
        }
    }
}

/// Renderer for "Away @ Home" matchup events.
pub struct MatchupCardRenderer;

impl CardRenderer for MatchupCardRenderer {
    fn slug(&self) -> &'static str {
        "matchup"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn can_render(&self, event: &Event) -> bool {
        event.name.contains(" @ ")
    }

    fn render(&self, event: &Event, choices: &[Choice]) -> EventCard {
        let (away, home) = event
            .name
            .split_once(" @ ")
            .unwrap_or((event.name.as_str(), ""));
        EventCard {
            title: format!("{} at {}", away, home),
            subtitle: format!(
                "{} pts · tip-off {}",
                event.points,
                event.deadline.format("%Y-%m-%d %H:%M UTC")
            ),
            lines: choices.iter().map(|c| format!("▸ {}", c.label)).collect(),
        }
    }
}

/// Priority-ordered renderer table with a guaranteed fallback.
pub struct CardRegistry {
    renderers: Vec<Box<dyn CardRenderer>>,
    fallback: DefaultCardRenderer,
}

impl CardRegistry {
    pub fn new() -> Self {
        Self {
            renderers: Vec::new(),
            fallback: DefaultCardRenderer,
        }
    }

    /// The registry used by the CLI.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(MatchupCardRenderer));
        registry
    }

    pub fn register(&mut self, renderer: Box<dyn CardRenderer>) {
        if self.renderers.iter().any(|r| r.slug() == renderer.slug()) {
            warn!(slug = renderer.slug(), "card renderer already registered, skipping duplicate");
            return;
        }
        self.renderers.push(renderer);
        // Highest priority first; stable sort keeps registration order for
        // equal priorities.
        self.renderers.sort_by_key(|r| std::cmp::Reverse(r.priority()));
    }

    /// The first renderer claiming the event, or the fallback.
    pub fn renderer_for(&self, event: &Event) -> &dyn CardRenderer {
        self.renderers
            .iter()
            .find(|r| r.can_render(event))
            .map(|r| r.as_ref())
            .unwrap_or(&self.fallback)
    }

    pub fn render(&self, event: &Event, choices: &[Choice]) -> EventCard {
        self.renderer_for(event).render(event, choices)
    }
}

impl Default for CardRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
