use crate::config::types::{ProxyRule, Target};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Cursor key: the route the lookup actually resolved, not the request's
/// literal host/path. Two requests landing on the same `(port, host-key,
/// path-key)` share one cursor even when their literal hosts differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub port: u16,
    pub host_key: Arc<str>,
    pub path_key: Arc<str>,
}

/// Round-robin state for multi-target proxy rules.
///
/// Cursors are created lazily on first dispatch and live for the process.
/// Each slot is an atomic counter, so concurrent `next()` calls on one
/// route hand out distinct successive indices. Rules stay immutable and
/// sharable; all mutable selection state lives here.
#[derive(Debug, Default)]
pub struct UpstreamSelector {
    cursors: DashMap<RouteKey, AtomicUsize>,
}

impl UpstreamSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the next target for `rule` under `key`. A single-target rule
    /// short-circuits without touching cursor state.
    pub fn next<'a>(&self, rule: &'a ProxyRule, key: RouteKey) -> &'a Target {
        let n = rule.targets.len();
        if n == 1 {
            return &rule.targets[0];
        }
        let cursor = self.cursors.entry(key).or_default();
        let i = cursor.fetch_add(1, Ordering::Relaxed) % n;
        &rule.targets[i]
    }

    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }
}
