//! Mapping-rule evaluation
//!
//! Turns an HTTP method and path into the billable usage the request consumes.

use crate::model::{ProxyConfig, Usage};

/// Evaluate every mapping rule in order and accumulate deltas per metric
///
/// Rules matching the same metric add up rather than overwrite. An empty
/// result means no rule applies to the request.
pub fn match_usage(method: &str, path: &str, config: &ProxyConfig) -> Usage {
    let mut usage = Usage::new();

    for rule in config.rules.iter().filter(|r| r.matches(method, path)) {
        let delta = usage.entry(rule.metric.clone()).or_insert(0);
        *delta = delta.saturating_add(rule.delta);
    }

    usage
}
