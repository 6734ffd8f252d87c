/// Query intent: which knowledge bases a query should consult.
use serde::Serialize;

use crate::config::RoutingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouteDecision {
    pub use_static: bool,
    pub use_dynamic: bool,
}

pub trait RoutingPolicy: Send + Sync {
    fn route(&self, query: &str) -> RouteDecision;
}

/// Trigger-term routing.
///
/// Queries consult the static base by default. A query containing any
/// trigger term also consults the dynamic base, and a short one (fewer than
/// `short_query_chars` chars) consults only the dynamic base.
#[derive(Debug, Clone)]
pub struct KeywordRouting {
    trigger_terms: Vec<String>,
    short_query_chars: usize,
}

impl KeywordRouting {
    pub fn new(trigger_terms: Vec<String>, short_query_chars: usize) -> Self {
        Self {
            trigger_terms,
            short_query_chars,
        }
    }

    pub fn from_config(config: &RoutingConfig) -> Self {
        Self::new(config.trigger_terms.clone(), config.short_query_chars)
    }
}

impl Default for KeywordRouting {
    fn default() -> Self {
        Self::from_config(&RoutingConfig::default())
    }
}

impl RoutingPolicy for KeywordRouting {
    fn route(&self, query: &str) -> RouteDecision {
        let triggered = self
            .trigger_terms
            .iter()
            .any(|t| !t.is_empty() && query.contains(t.as_str()));

        RouteDecision {
            use_static: !(triggered && query.chars().count() < self.short_query_chars),
            use_dynamic: triggered,
        }
    }
}
