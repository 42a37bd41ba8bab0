use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::routing::RoutingTable;

/// Process-global policy captured from the reserved `__defaults` key.
///
/// `timeout_ms` and `retries` are carried through normalization and
/// re-serialization but the dispatch path does not act on them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub headers: HeaderDefaults,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<RetriesConfig>,
}

/// Header-rewriting policy applied to every forwarded request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderDefaults {
    /// Inject/append the `X-Forwarded-For` / `X-Forwarded-Host` /
    /// `X-Forwarded-Proto` triplet on forwarded requests.
    #[serde(default)]
    pub x_forwarded: bool,

    /// Preserve the client's `Host` header on the forwarded request.
    /// When `false` the header is removed so the transport sets the
    /// upstream's canonical host.
    #[serde(default)]
    pub pass_host: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetriesConfig {
    #[serde(default)]
    pub attempts: u32,

    #[serde(default)]
    pub backoff_ms: u64,
}

/// TLS material for one listening port, lifted from the reserved `tls` key.
/// Paths point at PEM files read once at listener creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert: String,
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
}

/// Scheme of an origin URL. Only these two are accepted by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// One origin addressed by a proxy rule: a validated `http`/`https` URL
/// reduced to the parts the dispatcher needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Target {
    /// `host:port`, the authority the upstream connection is opened to.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Stable key for the connection pool / concurrency limiter.
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

/// A routing rule, fully normalized. The polymorphic JSON shapes (bare URL
/// string, string sequence, tagged object) never survive past the loader.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Proxy(ProxyRule),
    Redirect(RedirectRule),
    Rewrite(RewriteRule),
}

impl Rule {
    pub fn variant(&self) -> &'static str {
        match self {
            Rule::Proxy(_) => "proxy",
            Rule::Redirect(_) => "redirect",
            Rule::Rewrite(_) => "rewrite",
        }
    }

    pub fn as_proxy(&self) -> Option<&ProxyRule> {
        match self {
            Rule::Proxy(p) => Some(p),
            _ => None,
        }
    }
}

/// Forward to one of `targets`, round-robin. Always at least one target,
/// even when authored as a single bare string. Order defines the cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRule {
    pub targets: Vec<Target>,

    /// Accepted and preserved verbatim; not acted on by the dispatch path.
    pub health_check: Option<serde_json::Value>,
}

/// Respond with an HTTP redirect; the upstream network is never touched.
#[derive(Debug, Clone, PartialEq)]
pub struct RedirectRule {
    pub to: String,
    pub strip_prefix: Option<String>,
    /// 302 unless the source says otherwise. Values outside
    /// {301, 302, 307, 308} load with a validator warning.
    pub status: u16,
}

/// Prepend `to` to the request path and re-dispatch through the router.
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteRule {
    pub to: String,
}

pub const DEFAULT_REDIRECT_STATUS: u16 = 302;

/// The normalized configuration: everything the gateway needs at runtime.
/// Built once at startup, immutable thereafter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyConfig {
    pub table: RoutingTable,
    pub tls: BTreeMap<u16, TlsConfig>,
    pub defaults: DefaultsConfig,
}

impl ProxyConfig {
    /// Serialize back to the canonical JSON document shape. Loading the
    /// result yields a config equal to `self` (normalization is idempotent).
    pub fn to_document(&self) -> serde_json::Value {
        let mut doc = serde_json::Map::new();

        if self.defaults != DefaultsConfig::default() {
            doc.insert(
                "__defaults".to_string(),
                serde_json::to_value(&self.defaults).unwrap_or(serde_json::Value::Null),
            );
        }

        for (port, hosts) in self.table.iter() {
            let mut hosts_obj = serde_json::Map::new();
            // Wildcard keys go last so the canonical form never re-validates
            // with shadowing warnings.
            for (host, paths) in wildcard_last(hosts) {
                let mut paths_obj = serde_json::Map::new();
                for (path, rule) in wildcard_last(paths) {
                    paths_obj.insert(path.to_string(), rule_to_value(rule.as_ref()));
                }
                hosts_obj.insert(host.to_string(), serde_json::Value::Object(paths_obj));
            }

            let mut port_obj = serde_json::Map::new();
            port_obj.insert("hosts".to_string(), serde_json::Value::Object(hosts_obj));
            if let Some(tls) = self.tls.get(port) {
                port_obj.insert(
                    "tls".to_string(),
                    serde_json::to_value(tls).unwrap_or(serde_json::Value::Null),
                );
            }
            doc.insert(port.to_string(), serde_json::Value::Object(port_obj));
        }

        serde_json::Value::Object(doc)
    }
}

fn wildcard_last<'a, V>(
    map: &'a BTreeMap<std::sync::Arc<str>, V>,
) -> impl Iterator<Item = (&'a std::sync::Arc<str>, &'a V)> {
    map.iter()
        .filter(|(k, _)| k.as_ref() != "*")
        .chain(map.iter().filter(|(k, _)| k.as_ref() == "*"))
}

fn rule_to_value(rule: &Rule) -> serde_json::Value {
    match rule {
        Rule::Proxy(p) => {
            let mut obj = serde_json::Map::new();
            obj.insert("type".to_string(), "proxy".into());
            obj.insert(
                "to".to_string(),
                serde_json::Value::Array(
                    p.targets.iter().map(|t| t.to_string().into()).collect(),
                ),
            );
            if let Some(hc) = &p.health_check {
                obj.insert("health_check".to_string(), hc.clone());
            }
            serde_json::Value::Object(obj)
        }
        Rule::Redirect(r) => {
            let mut obj = serde_json::Map::new();
            obj.insert("type".to_string(), "redirect".into());
            obj.insert("to".to_string(), r.to.clone().into());
            if let Some(sp) = &r.strip_prefix {
                obj.insert("strip_prefix".to_string(), sp.clone().into());
            }
            obj.insert("status".to_string(), r.status.into());
            serde_json::Value::Object(obj)
        }
        Rule::Rewrite(r) => {
            let mut obj = serde_json::Map::new();
            obj.insert("type".to_string(), "rewrite".into());
            obj.insert("to".to_string(), r.to.clone().into());
            serde_json::Value::Object(obj)
        }
    }
}
