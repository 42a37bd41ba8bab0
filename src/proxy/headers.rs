//! Header-rewriting policy for forwarded requests.
//!
//! A pure function of `(client headers, client ip, is_tls, defaults)` — it
//! reads nothing else and mutates nothing, so it can run before or after
//! target selection with identical output.

use crate::config::types::HeaderDefaults;
use http::header::HOST;
use http::{HeaderMap, HeaderName, HeaderValue};
use std::net::IpAddr;

static XFF: HeaderName = HeaderName::from_static("x-forwarded-for");
static XFH: HeaderName = HeaderName::from_static("x-forwarded-host");
static XFP: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Produce the header map for the upstream request.
///
/// With `x_forwarded` set, the `X-Forwarded-*` triplet is injected: the
/// client IP appended to any existing `X-Forwarded-For` (the existing list
/// is preserved verbatim), the client's `Host` copied into
/// `X-Forwarded-Host`, and the listener's protocol into
/// `X-Forwarded-Proto`. Without it the triplet passes through untouched.
///
/// With `pass_host` set the client's `Host` survives; otherwise it is
/// removed so the transport sets the upstream's canonical host.
///
/// Hop-by-hop headers (`Connection`, `Transfer-Encoding`, `Upgrade`, ...)
/// pass through unchanged.
pub fn forwarded_headers(
    headers: &HeaderMap,
    client_ip: IpAddr,
    is_tls: bool,
    policy: &HeaderDefaults,
) -> HeaderMap {
    let mut out = headers.clone();

    if policy.x_forwarded {
        let ip = client_ip.to_string();

        match headers.get(&XFF).and_then(|v| v.to_str().ok()) {
            Some(existing) => {
                let mut combined = String::with_capacity(existing.len() + 2 + ip.len());
                combined.push_str(existing);
                combined.push_str(", ");
                combined.push_str(&ip);
                if let Ok(v) = HeaderValue::from_str(&combined) {
                    out.insert(XFF.clone(), v);
                }
            }
            None => {
                if let Ok(v) = HeaderValue::from_str(&ip) {
                    out.insert(XFF.clone(), v);
                }
            }
        }

        // Host verbatim, port portion included.
        if let Some(host) = headers.get(HOST) {
            out.insert(XFH.clone(), host.clone());
        }

        out.insert(
            XFP.clone(),
            HeaderValue::from_static(if is_tls { "https" } else { "http" }),
        );
    }

    if !policy.pass_host {
        out.remove(HOST);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn policy(x_forwarded: bool, pass_host: bool) -> HeaderDefaults {
        HeaderDefaults {
            x_forwarded,
            pass_host,
        }
    }

    #[test]
    fn test_x_forwarded_injects_triplet() {
        let mut h = HeaderMap::new();
        h.insert(HOST, "api.example.com:8080".parse().unwrap());

        let out = forwarded_headers(&h, ip("10.0.0.9"), false, &policy(true, true));
        assert_eq!(out["x-forwarded-for"], "10.0.0.9");
        assert_eq!(out["x-forwarded-host"], "api.example.com:8080");
        assert_eq!(out["x-forwarded-proto"], "http");
        assert_eq!(out[HOST], "api.example.com:8080");
    }

    #[test]
    fn test_x_forwarded_appends_to_existing_list() {
        let mut h = HeaderMap::new();
        h.insert(HOST, "api.example.com".parse().unwrap());
        h.insert("x-forwarded-for", "1.2.3.4, 5.6.7.8".parse().unwrap());

        let out = forwarded_headers(&h, ip("9.9.9.9"), false, &policy(true, false));
        assert_eq!(out["x-forwarded-for"], "1.2.3.4, 5.6.7.8, 9.9.9.9");
    }

    #[test]
    fn test_proto_follows_listener_tls() {
        let h = HeaderMap::new();
        let out = forwarded_headers(&h, ip("1.1.1.1"), true, &policy(true, false));
        assert_eq!(out["x-forwarded-proto"], "https");
    }

    #[test]
    fn test_disabled_policy_passes_existing_headers_through() {
        let mut h = HeaderMap::new();
        h.insert("x-forwarded-for", "1.2.3.4".parse().unwrap());
        h.insert("x-forwarded-proto", "https".parse().unwrap());

        let out = forwarded_headers(&h, ip("9.9.9.9"), false, &policy(false, false));
        // Nothing injected, nothing rewritten.
        assert_eq!(out["x-forwarded-for"], "1.2.3.4");
        assert_eq!(out["x-forwarded-proto"], "https");
        assert!(!out.contains_key("x-forwarded-host"));
    }

    #[test]
    fn test_pass_host_false_removes_host() {
        let mut h = HeaderMap::new();
        h.insert(HOST, "api.example.com".parse().unwrap());

        let out = forwarded_headers(&h, ip("1.1.1.1"), false, &policy(false, false));
        assert!(!out.contains_key(HOST));
    }

    #[test]
    fn test_hop_by_hop_headers_not_stripped() {
        let mut h = HeaderMap::new();
        h.insert("connection", "keep-alive".parse().unwrap());
        h.insert("upgrade", "h2c".parse().unwrap());

        let out = forwarded_headers(&h, ip("1.1.1.1"), false, &policy(true, false));
        assert_eq!(out["connection"], "keep-alive");
        assert_eq!(out["upgrade"], "h2c");
    }

    #[test]
    fn test_pure_function_of_inputs() {
        let mut h = HeaderMap::new();
        h.insert(HOST, "a.b".parse().unwrap());
        h.insert("x-forwarded-for", "1.2.3.4".parse().unwrap());

        let p = policy(true, true);
        let first = forwarded_headers(&h, ip("9.9.9.9"), true, &p);
        let second = forwarded_headers(&h, ip("9.9.9.9"), true, &p);
        assert_eq!(first, second);
    }
}
