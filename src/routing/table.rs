use crate::config::types::Rule;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Sentinel key matching any host or any path. Within a level it is a
/// fallback, not a pattern: consulted only when no exact key matches.
pub const WILDCARD: &str = "*";

type PathMap = BTreeMap<Arc<str>, Arc<Rule>>;
type HostMap = BTreeMap<Arc<str>, PathMap>;

/// The three-level routing table: `port → host-key → path-key → Rule`.
///
/// Built once by the loader, read-only afterwards. Rules are stored behind
/// `Arc` so a match is a reference-count bump, not a clone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingTable {
    ports: BTreeMap<u16, HostMap>,
}

/// A resolved route. Carries the keys the lookup actually landed on
/// (possibly `"*"`): the round-robin cursor and the rewrite re-dispatch
/// contract key on resolved keys, not on the request's literal host/path.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub rule: Arc<Rule>,
    pub host_key: Arc<str>,
    pub path_key: Arc<str>,
    /// `false` when the path level fell back to the wildcard.
    pub exact_path: bool,
}

impl RoutingTable {
    pub fn insert(&mut self, port: u16, host: &str, path: &str, rule: Rule) {
        self.ports
            .entry(port)
            .or_default()
            .entry(Arc::from(host))
            .or_default()
            .insert(Arc::from(path), Arc::new(rule));
    }

    /// `(port, host, path) → Rule`, exact key beating the wildcard at both
    /// the host and the path level. The wildcard host is consulted only
    /// when the exact host has no entry at all; once a host-map is chosen
    /// the lookup does not back out of it.
    pub fn resolve(&self, port: u16, host: &str, path: &str) -> Option<RouteMatch> {
        let hosts = self.ports.get(&port)?;

        let (host_key, paths) = match hosts.get_key_value(host) {
            Some((k, v)) => (k, v),
            None => hosts.get_key_value(WILDCARD)?,
        };

        let (path_key, rule, exact_path) = match paths.get_key_value(path) {
            Some((k, v)) => (k, v, true),
            None => {
                let (k, v) = paths.get_key_value(WILDCARD)?;
                (k, v, false)
            }
        };

        Some(RouteMatch {
            rule: rule.clone(),
            host_key: host_key.clone(),
            path_key: path_key.clone(),
            exact_path,
        })
    }

    /// The path-map the given host resolves to on this port (exact host,
    /// else wildcard). Used by the rewrite fallback scan.
    pub fn host_paths(&self, port: u16, host: &str) -> Option<&BTreeMap<Arc<str>, Arc<Rule>>> {
        let hosts = self.ports.get(&port)?;
        hosts.get(host).or_else(|| hosts.get(WILDCARD))
    }

    /// Union of all path-keys across every host-map on the port.
    pub fn paths(&self, port: u16) -> BTreeSet<Arc<str>> {
        self.ports
            .get(&port)
            .map(|hosts| hosts.values().flat_map(|p| p.keys().cloned()).collect())
            .unwrap_or_default()
    }

    /// True when any host-map on the port has the exact path or a wildcard.
    pub fn has_path(&self, port: u16, path: &str) -> bool {
        self.ports.get(&port).is_some_and(|hosts| {
            hosts
                .values()
                .any(|p| p.contains_key(path) || p.contains_key(WILDCARD))
        })
    }

    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.keys().copied()
    }

    pub fn contains_port(&self, port: u16) -> bool {
        self.ports.contains_key(&port)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u16, &HostMap)> {
        self.ports.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub fn rule_count(&self) -> usize {
        self.ports
            .values()
            .flat_map(|hosts| hosts.values())
            .map(|paths| paths.len())
            .sum()
    }
}
