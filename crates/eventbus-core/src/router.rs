//! Topic router (§ Topic Router).

use eventbus_types::RoutingRule;

use crate::matcher;

/// Resolves a topic to an engine name using an ordered list of routing
/// rules, falling back to the last configured engine as an implicit
/// catch-all.
#[derive(Debug, Clone)]
pub struct Router {
    rules: Vec<RoutingRule>,
    engine_order: Vec<String>,
}

impl Router {
    /// Build a router from declared `rules` and the ordered set of
    /// registered engine names (`engine_order`'s last entry is the
    /// catch-all).
    pub fn new(rules: Vec<RoutingRule>, engine_order: Vec<String>) -> Self {
        Self { rules, engine_order }
    }

    /// Resolve the engine name `topic` routes to: the first rule with a
    /// matching pattern, or the last configured engine if none match.
    pub fn route_for(&self, topic: &str) -> Option<&str> {
        for rule in &self.rules {
            if rule.topics.iter().any(|pattern| matcher::matches(topic, pattern)) {
                return Some(rule.engine.as_str());
            }
        }
        self.engine_order.last().map(String::as_str)
    }

    /// Ordered set of registered engine names.
    pub fn engine_names(&self) -> &[String] {
        &self.engine_order
    }
}
