//! End-to-end dispatch tests: real listeners, real upstream servers, real
//! client connections over loopback.

use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use iris_gateway::server::{self, GatewayState};
use iris_gateway::Listeners;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// What one upstream request looked like when it arrived.
#[derive(Clone, Debug)]
struct Seen {
    method: String,
    uri: String,
    headers: http::HeaderMap,
}

/// Minimal origin server: records every request and answers 200 with its
/// own name as the body.
async fn spawn_upstream(name: &'static str) -> (u16, Arc<Mutex<Vec<Seen>>>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_task = seen.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let seen = seen_task.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req: Request<Incoming>| {
                    let seen = seen.clone();
                    async move {
                        seen.lock().unwrap().push(Seen {
                            method: req.method().to_string(),
                            uri: req.uri().to_string(),
                            headers: req.headers().clone(),
                        });
                        Ok::<_, std::convert::Infallible>(Response::new(Full::new(
                            bytes::Bytes::from(name),
                        )))
                    }
                });
                let _ = auto::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });

    (port, seen)
}

/// A loopback port that is free right now (and, for the 502 test, one that
/// nothing will be listening on).
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn start_gateway(config_json: &str) -> Listeners {
    let config = iris_gateway::load(config_json).unwrap();
    let state = GatewayState::new(config);
    server::start(state, "127.0.0.1".parse().unwrap())
        .await
        .unwrap()
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// Raw HTTP/1.1 exchange, for asserting on exact header handling.
async fn raw_request(port: u16, request: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}

#[tokio::test]
async fn test_simple_proxy_forwards_method_path_and_body() {
    let (up_port, seen) = spawn_upstream("be").await;
    let gw_port = free_port();

    let listeners = start_gateway(&format!(
        r#"{{"{}": "http://127.0.0.1:{}"}}"#,
        gw_port, up_port
    ))
    .await;

    let resp = client()
        .get(format!("http://127.0.0.1:{}/anything", gw_port))
        .header("Host", "x.y")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "be");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "GET");
    assert_eq!(seen[0].uri, "/anything");

    drop(seen);
    listeners.shutdown().await;
}

#[tokio::test]
async fn test_query_string_forwarded_verbatim() {
    let (up_port, seen) = spawn_upstream("be").await;
    let gw_port = free_port();

    let listeners = start_gateway(&format!(
        r#"{{"{}": "http://127.0.0.1:{}"}}"#,
        gw_port, up_port
    ))
    .await;

    let resp = client()
        .get(format!("http://127.0.0.1:{}/search?q=rust&page=2", gw_port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(seen.lock().unwrap()[0].uri, "/search?q=rust&page=2");

    listeners.shutdown().await;
}

#[tokio::test]
async fn test_round_robin_cycles_targets_in_order() {
    let (a_port, _) = spawn_upstream("a").await;
    let (b_port, _) = spawn_upstream("b").await;
    let (c_port, _) = spawn_upstream("c").await;
    let gw_port = free_port();

    let listeners = start_gateway(&format!(
        r#"{{"{}": {{"*": {{"type": "proxy", "to": [
            "http://127.0.0.1:{}", "http://127.0.0.1:{}", "http://127.0.0.1:{}"
        ]}}}}}}"#,
        gw_port, a_port, b_port, c_port
    ))
    .await;

    let client = client();
    let mut bodies = Vec::new();
    for _ in 0..6 {
        let resp = client
            .get(format!("http://127.0.0.1:{}/", gw_port))
            .send()
            .await
            .unwrap();
        bodies.push(resp.text().await.unwrap());
    }
    assert_eq!(bodies, vec!["a", "b", "c", "a", "b", "c"]);

    listeners.shutdown().await;
}

#[tokio::test]
async fn test_exact_path_beats_wildcard() {
    let (api_port, _) = spawn_upstream("api").await;
    let (web_port, _) = spawn_upstream("web").await;
    let gw_port = free_port();

    let listeners = start_gateway(&format!(
        r#"{{"{}": {{"/api": "http://127.0.0.1:{}", "*": "http://127.0.0.1:{}"}}}}"#,
        gw_port, api_port, web_port
    ))
    .await;

    let client = client();
    let resp = client
        .get(format!("http://127.0.0.1:{}/api", gw_port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "api");

    let resp = client
        .get(format!("http://127.0.0.1:{}/unrelated", gw_port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "web");

    listeners.shutdown().await;
}

#[tokio::test]
async fn test_virtual_host_routing_and_miss_404() {
    let (api_port, _) = spawn_upstream("api").await;
    let gw_port = free_port();

    let listeners = start_gateway(&format!(
        r#"{{"{}": {{"hosts": {{"api.example.com": "http://127.0.0.1:{}"}}}}}}"#,
        gw_port, api_port
    ))
    .await;

    let resp = raw_request(
        gw_port,
        "GET / HTTP/1.1\r\nHost: api.example.com\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(resp.starts_with("HTTP/1.1 200"));
    assert!(resp.ends_with("api"));

    // No host-map matches this host and there is no wildcard.
    let resp = raw_request(
        gw_port,
        "GET / HTTP/1.1\r\nHost: other.example.com\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(resp.starts_with("HTTP/1.1 404"));
    assert!(resp.contains("Not Found"));

    listeners.shutdown().await;
}

#[tokio::test]
async fn test_redirect_with_strip_prefix() {
    let gw_port = free_port();

    let listeners = start_gateway(&format!(
        r#"{{"{}": {{"*": {{
            "type": "redirect",
            "to": "https://cdn.example.com",
            "strip_prefix": "/static",
            "status": 301
        }}}}}}"#,
        gw_port
    ))
    .await;

    let resp = client()
        .get(format!("http://127.0.0.1:{}/static/img/logo.png", gw_port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 301);
    assert_eq!(
        resp.headers()["location"],
        "https://cdn.example.com/img/logo.png"
    );
    assert_eq!(resp.text().await.unwrap(), "");

    listeners.shutdown().await;
}

#[tokio::test]
async fn test_redirect_without_prefix_match_uses_to_verbatim() {
    let gw_port = free_port();

    let listeners = start_gateway(&format!(
        r#"{{"{}": {{"*": {{"type": "redirect", "to": "/new-home"}}}}}}"#,
        gw_port
    ))
    .await;

    let resp = client()
        .get(format!("http://127.0.0.1:{}/old", gw_port))
        .send()
        .await
        .unwrap();
    // Default status.
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers()["location"], "/new-home");

    listeners.shutdown().await;
}

#[tokio::test]
async fn test_forwarded_headers_and_pass_host() {
    let (up_port, seen) = spawn_upstream("be").await;
    let gw_port = free_port();

    let listeners = start_gateway(&format!(
        r#"{{
            "__defaults": {{"headers": {{"x_forwarded": true, "pass_host": true}}}},
            "{}": "http://127.0.0.1:{}"
        }}"#,
        gw_port, up_port
    ))
    .await;

    let resp = raw_request(
        gw_port,
        "GET / HTTP/1.1\r\nHost: api.example.com\r\nX-Forwarded-For: 1.2.3.4, 5.6.7.8\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(resp.starts_with("HTTP/1.1 200"));

    let seen = seen.lock().unwrap();
    let headers = &seen[0].headers;
    assert_eq!(headers["host"], "api.example.com");
    assert_eq!(headers["x-forwarded-for"], "1.2.3.4, 5.6.7.8, 127.0.0.1");
    assert_eq!(headers["x-forwarded-host"], "api.example.com");
    assert_eq!(headers["x-forwarded-proto"], "http");

    drop(seen);
    listeners.shutdown().await;
}

#[tokio::test]
async fn test_no_forwarded_headers_by_default() {
    let (up_port, seen) = spawn_upstream("be").await;
    let gw_port = free_port();

    let listeners = start_gateway(&format!(
        r#"{{"{}": "http://127.0.0.1:{}"}}"#,
        gw_port, up_port
    ))
    .await;

    let resp = raw_request(
        gw_port,
        "GET / HTTP/1.1\r\nHost: api.example.com\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(resp.starts_with("HTTP/1.1 200"));

    let seen = seen.lock().unwrap();
    let headers = &seen[0].headers;
    assert!(!headers.contains_key("x-forwarded-for"));
    assert!(!headers.contains_key("x-forwarded-host"));
    assert!(!headers.contains_key("x-forwarded-proto"));
    // pass_host defaults to false: the transport set the canonical host.
    assert_eq!(headers["host"], format!("127.0.0.1:{}", up_port));

    drop(seen);
    listeners.shutdown().await;
}

#[tokio::test]
async fn test_unavailable_upstream_yields_502() {
    let gw_port = free_port();
    let dead_port = free_port();

    let listeners = start_gateway(&format!(
        r#"{{"{}": "http://127.0.0.1:{}"}}"#,
        gw_port, dead_port
    ))
    .await;

    let resp = client()
        .get(format!("http://127.0.0.1:{}/", gw_port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    assert!(resp.text().await.unwrap().contains("Bad Gateway"));

    listeners.shutdown().await;
}

#[tokio::test]
async fn test_rewrite_exact_rematch_forwards_original_url() {
    let (v2_port, seen) = spawn_upstream("v2").await;
    let gw_port = free_port();

    let listeners = start_gateway(&format!(
        r#"{{"{}": {{
            "/v2/api": "http://127.0.0.1:{}",
            "/api": {{"type": "rewrite", "to": "/v2"}}
        }}}}"#,
        gw_port, v2_port
    ))
    .await;

    let resp = client()
        .get(format!("http://127.0.0.1:{}/api", gw_port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "v2");

    // Routing saw /v2/api; the upstream still sees the original URL.
    assert_eq!(seen.lock().unwrap()[0].uri, "/api");

    listeners.shutdown().await;
}

#[tokio::test]
async fn test_rewrite_wildcard_rematch_forwards_original_url() {
    let (up_port, seen) = spawn_upstream("up").await;
    let gw_port = free_port();

    let listeners = start_gateway(&format!(
        r#"{{"{}": {{
            "/api": {{"type": "rewrite", "to": "/v2"}},
            "*": "http://127.0.0.1:{}"
        }}}}"#,
        gw_port, up_port
    ))
    .await;

    let resp = client()
        .get(format!("http://127.0.0.1:{}/api", gw_port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(seen.lock().unwrap()[0].uri, "/api");

    listeners.shutdown().await;
}

#[tokio::test]
async fn test_rewrite_fallback_scan_forwards_rewritten_url() {
    let (up_port, seen) = spawn_upstream("app").await;
    let gw_port = free_port();

    // The rewritten path resolves nothing (no wildcard), so the dispatcher
    // scans the host's rules for a proxy and sends the rewritten URL.
    let listeners = start_gateway(&format!(
        r#"{{"{}": {{
            "/legacy": {{"type": "rewrite", "to": "/v2"}},
            "/app": "http://127.0.0.1:{}"
        }}}}"#,
        gw_port, up_port
    ))
    .await;

    let resp = client()
        .get(format!("http://127.0.0.1:{}/legacy", gw_port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(seen.lock().unwrap()[0].uri, "/v2/legacy");

    listeners.shutdown().await;
}

#[tokio::test]
async fn test_rewrite_chain_is_not_followed() {
    let gw_port = free_port();

    // /a rewrites onto /b's slot, which is itself a rewrite. The second
    // rewrite is not followed, and with no proxy rule to fall back on the
    // route is unresolved.
    let listeners = start_gateway(&format!(
        r#"{{"{}": {{
            "/a": {{"type": "rewrite", "to": "/b"}},
            "/b/a": {{"type": "rewrite", "to": "/c"}}
        }}}}"#,
        gw_port
    ))
    .await;

    let resp = client()
        .get(format!("http://127.0.0.1:{}/a", gw_port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    listeners.shutdown().await;
}

#[tokio::test]
async fn test_unmatched_route_404() {
    let (up_port, _) = spawn_upstream("be").await;
    let gw_port = free_port();

    let listeners = start_gateway(&format!(
        r#"{{"{}": {{"/only": "http://127.0.0.1:{}"}}}}"#,
        gw_port, up_port
    ))
    .await;

    let resp = client()
        .get(format!("http://127.0.0.1:{}/elsewhere", gw_port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    assert!(resp.text().await.unwrap().contains("Not Found"));

    listeners.shutdown().await;
}

#[tokio::test]
async fn test_post_body_streams_through() {
    let (up_port, seen) = spawn_upstream("be").await;
    let gw_port = free_port();

    let listeners = start_gateway(&format!(
        r#"{{"{}": "http://127.0.0.1:{}"}}"#,
        gw_port, up_port
    ))
    .await;

    let resp = client()
        .post(format!("http://127.0.0.1:{}/submit", gw_port))
        .body("payload bytes")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].uri, "/submit");

    drop(seen);
    listeners.shutdown().await;
}

#[tokio::test]
async fn test_bind_failure_skips_port_and_serves_the_rest() {
    let (up_port, _) = spawn_upstream("be").await;
    let gw_port = free_port();

    // Occupy a port so the gateway cannot bind it.
    let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let blocked_port = blocker.local_addr().unwrap().port();

    let listeners = start_gateway(&format!(
        r#"{{
            "{}": "http://127.0.0.1:{}",
            "{}": "http://127.0.0.1:{}"
        }}"#,
        blocked_port, up_port, gw_port, up_port
    ))
    .await;

    assert_eq!(listeners.bound().len(), 1);
    assert_eq!(listeners.bound()[0].port, gw_port);

    let resp = client()
        .get(format!("http://127.0.0.1:{}/", gw_port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    listeners.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let (up_port, _) = spawn_upstream("be").await;
    let gw_port = free_port();

    let listeners = start_gateway(&format!(
        r#"{{"{}": "http://127.0.0.1:{}"}}"#,
        gw_port, up_port
    ))
    .await;
    listeners.shutdown().await;

    assert!(client()
        .get(format!("http://127.0.0.1:{}/", gw_port))
        .send()
        .await
        .is_err());
}
