//! Raw-to-normalized pass: the polymorphic JSON document becomes a
//! `ProxyConfig` (routing table + TLS map + defaults) and nothing of the
//! raw shape survives.
//!
//! The loader is lenient: entries it cannot make sense of are skipped with
//! a log line. Strict rejection is the validator's job; `load_str` runs the
//! validator first so a served config never contains skipped entries.

use crate::config::types::{
    DefaultsConfig, ProxyConfig, ProxyRule, RedirectRule, RewriteRule, Rule, Scheme, Target,
    TlsConfig, DEFAULT_REDIRECT_STATUS,
};
use crate::routing::WILDCARD;
use serde_json::{Map, Value};
use tracing::warn;
use url::Url;

pub const RESERVED_DEFAULTS: &str = "__defaults";
pub const RESERVED_HOSTS: &str = "hosts";
pub const RESERVED_TLS: &str = "tls";

/// Reserved names may never appear as routing keys.
fn is_reserved(key: &str) -> bool {
    key == RESERVED_DEFAULTS || key == RESERVED_HOSTS || key == RESERVED_TLS
}

/// A path-key is any string beginning with `/`, or the literal `*`.
pub fn is_path_key(key: &str) -> bool {
    key == WILDCARD || key.starts_with('/')
}

/// Strict decimal port in `[1, 65535]`. Sign prefixes and non-digit
/// characters are rejected, not just out-of-range values.
pub fn parse_port_key(key: &str) -> Option<u16> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u32 = key.parse().ok()?;
    if (1..=65535).contains(&n) {
        Some(n as u16)
    } else {
        None
    }
}

/// Parse an origin URL into the parts the dispatcher uses. `None` when the
/// URL does not parse, carries a non-HTTP scheme, or lacks a hostname.
pub fn parse_target(raw: &str) -> Option<Target> {
    let url = Url::parse(raw).ok()?;
    let scheme = match url.scheme() {
        "http" => Scheme::Http,
        "https" => Scheme::Https,
        _ => return None,
    };
    let host = url.host_str()?.to_string();
    let port = url.port().unwrap_or_else(|| scheme.default_port());
    Some(Target { scheme, host, port })
}

/// Normalize a parsed document. Callers that need hard failure on bad
/// entries must run the validator first; this pass only skips and logs.
pub fn normalize(doc: &Map<String, Value>) -> ProxyConfig {
    let mut config = ProxyConfig::default();

    for (key, value) in doc {
        if key == RESERVED_DEFAULTS {
            match serde_json::from_value::<DefaultsConfig>(value.clone()) {
                Ok(defaults) => config.defaults = defaults,
                Err(e) => warn!("config: unusable __defaults block, skipping, error={}", e),
            }
            continue;
        }

        let Some(port) = parse_port_key(key) else {
            warn!("config: key {:?} is not a port in [1, 65535], skipping", key);
            continue;
        };

        normalize_port_entry(port, value, &mut config);
    }

    config
}

fn normalize_port_entry(port: u16, value: &Value, config: &mut ProxyConfig) {
    match value {
        // Bare origin URL: any host, any path.
        Value::String(raw) => {
            if let Some(rule) = string_rule(raw) {
                config.table.insert(port, WILDCARD, WILDCARD, rule);
            } else {
                warn!("config: port {}: invalid origin URL {:?}, skipping", port, raw);
            }
        }

        Value::Object(obj) => {
            match obj.get(RESERVED_HOSTS) {
                // Virtual-host form: hosts sub-object maps host-key → host-config.
                Some(Value::Object(hosts)) => {
                    for (host, host_cfg) in hosts {
                        if is_reserved(host) {
                            warn!("config: port {}: reserved key {:?} used as host, skipping", port, host);
                            continue;
                        }
                        normalize_host_config(port, host, host_cfg, config);
                    }
                }
                Some(other) => {
                    warn!("config: port {}: 'hosts' must be an object, got {}, skipping", port, json_kind(other));
                }
                // Path-only form: the object minus reserved keys is the
                // path-map of the wildcard host.
                None => {
                    normalize_path_map(port, WILDCARD, obj, config);
                }
            }

            // The TLS block is lifted out after routing normalization and
            // recorded only when the port actually routes something.
            if let Some(tls_value) = obj.get(RESERVED_TLS) {
                if config.table.contains_port(port) {
                    match serde_json::from_value::<TlsConfig>(tls_value.clone()) {
                        Ok(tls) => {
                            config.tls.insert(port, tls);
                        }
                        Err(e) => warn!("config: port {}: unusable tls block, serving plain HTTP, error={}", port, e),
                    }
                }
            }
        }

        other => {
            warn!("config: port {}: entry must be a string or object, got {}, skipping", port, json_kind(other));
        }
    }
}

fn normalize_host_config(port: u16, host: &str, value: &Value, config: &mut ProxyConfig) {
    // Host-keys match case-insensitively; store them folded.
    let host = host.to_ascii_lowercase();

    match value {
        // Bare URL: any path on this host.
        Value::String(raw) => {
            if let Some(rule) = string_rule(raw) {
                config.table.insert(port, &host, WILDCARD, rule);
            } else {
                warn!("config: port {}, host {}: invalid origin URL {:?}, skipping", port, host, raw);
            }
        }
        Value::Object(paths) => normalize_path_map(port, &host, paths, config),
        other => {
            warn!("config: port {}, host {}: entry must be a string or object, got {}, skipping", port, host, json_kind(other));
        }
    }
}

fn normalize_path_map(port: u16, host: &str, paths: &Map<String, Value>, config: &mut ProxyConfig) {
    for (path, rule_cfg) in paths {
        if path == RESERVED_TLS || path == RESERVED_HOSTS {
            continue;
        }
        if !is_path_key(path) {
            warn!("config: port {}, host {}: key {:?} is not a path-key (must begin with '/' or be '*'), skipping", port, host, path);
            continue;
        }
        match normalize_rule(rule_cfg) {
            Some(rule) => config.table.insert(port, host, path, rule),
            None => {
                warn!("config: port {}, host {}, path {}: invalid rule, skipping", port, host, path);
            }
        }
    }
}

fn string_rule(raw: &str) -> Option<Rule> {
    parse_target(raw).map(|t| {
        Rule::Proxy(ProxyRule {
            targets: vec![t],
            health_check: None,
        })
    })
}

/// One rule slot: a bare URL string, or a tagged object. A missing `type`
/// means `proxy`. Anything that fails to normalize yields `None` and the
/// slot is omitted from the table.
pub fn normalize_rule(value: &Value) -> Option<Rule> {
    match value {
        Value::String(raw) => string_rule(raw),
        Value::Object(obj) => {
            let rule_type = match obj.get("type") {
                None => "proxy",
                Some(Value::String(t)) => t.as_str(),
                Some(_) => return None,
            };

            match rule_type {
                "proxy" => {
                    let targets = proxy_targets(obj.get("to")?)?;
                    Some(Rule::Proxy(ProxyRule {
                        targets,
                        health_check: obj.get("health_check").cloned(),
                    }))
                }
                "redirect" => {
                    let to = obj.get("to")?.as_str()?;
                    if to.is_empty() {
                        return None;
                    }
                    let status = obj
                        .get("status")
                        .and_then(Value::as_u64)
                        .and_then(|s| u16::try_from(s).ok())
                        .unwrap_or(DEFAULT_REDIRECT_STATUS);
                    Some(Rule::Redirect(RedirectRule {
                        to: to.to_string(),
                        strip_prefix: obj
                            .get("strip_prefix")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        status,
                    }))
                }
                "rewrite" => {
                    let to = obj.get("to")?.as_str()?;
                    if !to.starts_with('/') {
                        return None;
                    }
                    Some(Rule::Rewrite(RewriteRule { to: to.to_string() }))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// `to` of a proxy rule: a single URL string, or an ordered sequence.
/// The sequence order defines the round-robin cycle. All-or-nothing: one
/// bad element invalidates the rule rather than silently shrinking it.
fn proxy_targets(to: &Value) -> Option<Vec<Target>> {
    match to {
        Value::String(raw) => Some(vec![parse_target(raw)?]),
        Value::Array(items) => {
            if items.is_empty() {
                return None;
            }
            items
                .iter()
                .map(|item| item.as_str().and_then(parse_target))
                .collect()
        }
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
