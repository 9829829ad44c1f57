//! Topic wildcard matching (§ Topic Matcher).

/// Returns `true` iff `event_topic` matches `pattern`.
///
/// - exact-string equality matches;
/// - `"*"` matches any topic;
/// - `"prefix.*"` matches iff `event_topic == "prefix"` or `event_topic`
///   begins with `"prefix."`.
///
/// No other wildcard forms are recognized. Matching is case-sensitive.
pub fn matches(event_topic: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return event_topic == prefix || event_topic.starts_with(&format!("{prefix}."));
    }
    event_topic == pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(matches("orders.created", "orders.created"));
        assert!(!matches("orders.created", "orders.updated"));
    }

    #[test]
    fn star_matches_everything() {
        assert!(matches("anything.at.all", "*"));
        assert!(matches("", "*"));
    }

    #[test]
    fn prefix_star_matches_prefix_and_children() {
        assert!(matches("orders", "orders.*"));
        assert!(matches("orders.created", "orders.*"));
        assert!(matches("orders.created.v2", "orders.*"));
        assert!(!matches("ordersx", "orders.*"));
        assert!(!matches("other", "orders.*"));
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert!(!matches("Orders.created", "orders.*"));
    }
}
