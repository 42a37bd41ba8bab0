//! Structural, semantic, and shadowing diagnostics over the raw document.
//!
//! Runs independently of the loader so a caller gets the full diagnostic
//! list even for documents the loader would happily (partially) normalize.
//! Errors fail the load; warnings do not.

use crate::config::loader::{
    self, is_path_key, parse_port_key, RESERVED_DEFAULTS, RESERVED_HOSTS, RESERVED_TLS,
};
use crate::config::types::ProxyConfig;
use crate::routing::WILDCARD;
use serde_json::{Map, Value};
use std::fmt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticCode {
    // Errors.
    InvalidJson,
    InvalidPort,
    InvalidUrl,
    InvalidProtocol,
    MissingHostname,
    InvalidRuleType,
    MissingRequiredField,
    EmptyTarget,
    // Warnings.
    InvalidRedirectStatus,
    ShadowedHost,
    ShadowedPath,
    EmptyConfig,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticCode::InvalidJson => "INVALID_JSON",
            DiagnosticCode::InvalidPort => "INVALID_PORT",
            DiagnosticCode::InvalidUrl => "INVALID_URL",
            DiagnosticCode::InvalidProtocol => "INVALID_PROTOCOL",
            DiagnosticCode::MissingHostname => "MISSING_HOSTNAME",
            DiagnosticCode::InvalidRuleType => "INVALID_RULE_TYPE",
            DiagnosticCode::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            DiagnosticCode::EmptyTarget => "EMPTY_TARGET",
            DiagnosticCode::InvalidRedirectStatus => "INVALID_REDIRECT_STATUS",
            DiagnosticCode::ShadowedHost => "SHADOWED_HOST",
            DiagnosticCode::ShadowedPath => "SHADOWED_PATH",
            DiagnosticCode::EmptyConfig => "EMPTY_CONFIG",
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            DiagnosticCode::InvalidRedirectStatus
                | DiagnosticCode::ShadowedHost
                | DiagnosticCode::ShadowedPath
                | DiagnosticCode::EmptyConfig
        )
    }
}

/// One finding. `path` locates the offending node in dotted/bracketed
/// notation, e.g. `80.hosts.api.example.com./v1.to[1]`.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub path: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}: {}", self.code.as_str(), self.message)
        } else {
            write!(f, "{} at {}: {}", self.code.as_str(), self.path, self.message)
        }
    }
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    /// The normalized config, present only when validation passed.
    pub normalized: Option<ProxyConfig>,
}

pub fn validate_str(input: &str) -> ValidationReport {
    match serde_json::from_str::<Value>(input) {
        Ok(doc) => validate_value(&doc),
        Err(e) => {
            let mut report = ValidationReport::default();
            report.errors.push(Diagnostic {
                code: DiagnosticCode::InvalidJson,
                path: String::new(),
                message: format!("document fails to parse: {}", e),
            });
            report
        }
    }
}

pub fn validate_value(doc: &Value) -> ValidationReport {
    let mut v = Validator::default();

    let Some(obj) = doc.as_object() else {
        v.push(
            DiagnosticCode::InvalidJson,
            "",
            "top-level value must be an object".to_string(),
        );
        return v.finish(None);
    };

    let mut port_entries = 0;
    for (key, value) in obj {
        if key == RESERVED_DEFAULTS {
            continue;
        }
        match parse_port_key(key) {
            Some(_) => {
                port_entries += 1;
                v.check_port_entry(key, value);
            }
            None => v.push(
                DiagnosticCode::InvalidPort,
                key,
                format!("key {:?} is not an integer in [1, 65535]", key),
            ),
        }
    }

    if port_entries == 0 {
        v.push(
            DiagnosticCode::EmptyConfig,
            "",
            "document contains no port entries".to_string(),
        );
    }

    v.finish(Some(obj))
}

#[derive(Default)]
struct Validator {
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
}

impl Validator {
    fn push(&mut self, code: DiagnosticCode, path: &str, message: String) {
        let diag = Diagnostic {
            code,
            path: path.to_string(),
            message,
        };
        if code.is_warning() {
            self.warnings.push(diag);
        } else {
            self.errors.push(diag);
        }
    }

    fn finish(self, doc: Option<&Map<String, Value>>) -> ValidationReport {
        let valid = self.errors.is_empty();
        let normalized = match doc {
            Some(obj) if valid => Some(loader::normalize(obj)),
            _ => None,
        };
        ValidationReport {
            valid,
            errors: self.errors,
            warnings: self.warnings,
            normalized,
        }
    }

    fn check_port_entry(&mut self, port_key: &str, value: &Value) {
        match value {
            Value::String(raw) => self.check_target_url(port_key, raw),
            Value::Object(obj) => match obj.get(RESERVED_HOSTS) {
                Some(Value::Object(hosts)) => {
                    let prefix = format!("{}.hosts", port_key);
                    self.check_shadowing(hosts, &prefix, DiagnosticCode::ShadowedHost);
                    for (host, host_cfg) in hosts {
                        self.check_host_config(&format!("{}.{}", prefix, host), host_cfg);
                    }
                }
                Some(other) => self.push(
                    DiagnosticCode::InvalidJson,
                    &format!("{}.hosts", port_key),
                    format!("'hosts' must be an object, got {}", kind(other)),
                ),
                None => self.check_path_map(port_key, obj),
            },
            other => self.push(
                DiagnosticCode::InvalidJson,
                port_key,
                format!("port entry must be a string or object, got {}", kind(other)),
            ),
        }
    }

    fn check_host_config(&mut self, path: &str, value: &Value) {
        match value {
            Value::String(raw) => self.check_target_url(path, raw),
            Value::Object(paths) => self.check_path_map(path, paths),
            other => self.push(
                DiagnosticCode::InvalidJson,
                path,
                format!("host entry must be a string or object, got {}", kind(other)),
            ),
        }
    }

    fn check_path_map(&mut self, prefix: &str, paths: &Map<String, Value>) {
        self.check_shadowing(paths, prefix, DiagnosticCode::ShadowedPath);
        for (path_key, rule_cfg) in paths {
            if path_key == RESERVED_TLS || path_key == RESERVED_HOSTS {
                continue;
            }
            if !is_path_key(path_key) {
                continue;
            }
            self.check_rule(&format!("{}.{}", prefix, path_key), rule_cfg);
        }
    }

    /// A wildcard key written before a non-wildcard key at the same level
    /// reads as if it swallowed the later entries, even though matching
    /// precedence says otherwise. Flag it once, pointing at the wildcard.
    fn check_shadowing(&mut self, map: &Map<String, Value>, prefix: &str, code: DiagnosticCode) {
        let mut wildcard_seen = false;
        for key in map.keys() {
            if key == RESERVED_TLS || key == RESERVED_HOSTS {
                continue;
            }
            if key == WILDCARD {
                wildcard_seen = true;
            } else if wildcard_seen {
                self.push(
                    code,
                    &format!("{}.{}", prefix, WILDCARD),
                    format!("wildcard precedes non-wildcard key {:?} in document order", key),
                );
                return;
            }
        }
    }

    fn check_rule(&mut self, path: &str, value: &Value) {
        match value {
            Value::String(raw) => self.check_target_url(path, raw),
            Value::Object(obj) => {
                let rule_type = match obj.get("type") {
                    None => "proxy",
                    Some(Value::String(t))
                        if matches!(t.as_str(), "proxy" | "redirect" | "rewrite") =>
                    {
                        t.as_str()
                    }
                    Some(other) => {
                        self.push(
                            DiagnosticCode::InvalidRuleType,
                            &format!("{}.type", path),
                            format!(
                                "rule type must be one of proxy, redirect, rewrite, got {}",
                                other
                            ),
                        );
                        return;
                    }
                };

                match rule_type {
                    "proxy" => self.check_proxy_rule(path, obj),
                    "redirect" => self.check_redirect_rule(path, obj),
                    "rewrite" => self.check_rewrite_rule(path, obj),
                    _ => unreachable!(),
                }
            }
            other => self.push(
                DiagnosticCode::InvalidJson,
                path,
                format!("rule must be a string or object, got {}", kind(other)),
            ),
        }
    }

    fn check_proxy_rule(&mut self, path: &str, obj: &Map<String, Value>) {
        match obj.get("to") {
            None => self.push(
                DiagnosticCode::MissingRequiredField,
                path,
                "proxy rule lacks 'to'".to_string(),
            ),
            Some(Value::String(raw)) => {
                if raw.is_empty() {
                    self.push(
                        DiagnosticCode::EmptyTarget,
                        &format!("{}.to", path),
                        "'to' is an empty string".to_string(),
                    );
                } else {
                    self.check_target_url(&format!("{}.to", path), raw);
                }
            }
            Some(Value::Array(items)) => {
                if items.is_empty() {
                    self.push(
                        DiagnosticCode::EmptyTarget,
                        &format!("{}.to", path),
                        "'to' is an empty sequence".to_string(),
                    );
                    return;
                }
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{}.to[{}]", path, i);
                    match item.as_str() {
                        Some(raw) => self.check_target_url(&item_path, raw),
                        None => self.push(
                            DiagnosticCode::InvalidUrl,
                            &item_path,
                            format!("target must be a string, got {}", kind(item)),
                        ),
                    }
                }
            }
            Some(other) => self.push(
                DiagnosticCode::InvalidUrl,
                &format!("{}.to", path),
                format!("'to' must be a string or sequence of strings, got {}", kind(other)),
            ),
        }
    }

    fn check_redirect_rule(&mut self, path: &str, obj: &Map<String, Value>) {
        match obj.get("to").and_then(Value::as_str) {
            None => self.push(
                DiagnosticCode::MissingRequiredField,
                path,
                "redirect rule lacks 'to'".to_string(),
            ),
            Some("") => self.push(
                DiagnosticCode::EmptyTarget,
                &format!("{}.to", path),
                "'to' is an empty string".to_string(),
            ),
            // Relative redirect targets are allowed; absolute ones must be
            // well-formed http(s) URLs.
            Some(to) if !to.starts_with('/') => {
                self.check_target_url(&format!("{}.to", path), to);
            }
            Some(_) => {}
        }

        if let Some(status) = obj.get("status") {
            let semantically_valid = status
                .as_u64()
                .is_some_and(|s| matches!(s, 301 | 302 | 307 | 308));
            if !semantically_valid {
                self.push(
                    DiagnosticCode::InvalidRedirectStatus,
                    &format!("{}.status", path),
                    format!("redirect status {} is not one of 301, 302, 307, 308", status),
                );
            }
        }
    }

    fn check_rewrite_rule(&mut self, path: &str, obj: &Map<String, Value>) {
        match obj.get("to").and_then(Value::as_str) {
            None => self.push(
                DiagnosticCode::MissingRequiredField,
                path,
                "rewrite rule lacks 'to'".to_string(),
            ),
            Some("") => self.push(
                DiagnosticCode::EmptyTarget,
                &format!("{}.to", path),
                "'to' is an empty string".to_string(),
            ),
            Some(to) if !to.starts_with('/') => self.push(
                DiagnosticCode::InvalidUrl,
                &format!("{}.to", path),
                format!("rewrite target must begin with '/', got {:?}", to),
            ),
            Some(_) => {}
        }
    }

    fn check_target_url(&mut self, path: &str, raw: &str) {
        if raw.is_empty() {
            self.push(
                DiagnosticCode::EmptyTarget,
                path,
                "target is an empty string".to_string(),
            );
            return;
        }
        match Url::parse(raw) {
            Err(e) => self.push(
                DiagnosticCode::InvalidUrl,
                path,
                format!("{:?} does not parse as a URL: {}", raw, e),
            ),
            Ok(url) => {
                if !matches!(url.scheme(), "http" | "https") {
                    self.push(
                        DiagnosticCode::InvalidProtocol,
                        path,
                        format!("scheme {:?} is neither http nor https", url.scheme()),
                    );
                } else if url.host_str().is_none() {
                    self.push(
                        DiagnosticCode::MissingHostname,
                        path,
                        format!("{:?} lacks a hostname", raw),
                    );
                }
            }
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
