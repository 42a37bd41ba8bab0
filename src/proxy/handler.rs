use crate::config::types::{RedirectRule, Rule, Target};
use crate::proxy::context::{empty_body, BoxBody, RequestContext};
use crate::proxy::headers;
use crate::server::GatewayState;
use crate::upstream::RouteKey;
use http::header::{HOST, LOCATION};
use http::{HeaderValue, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, warn};

/// Dispatch one request through the three-variant state machine:
///
/// 1. RESOLVE   — `(port, host, path)` → rule, exact keys beating `"*"`
/// 2. PROXY     — round-robin target, header policy, streamed forward
///    REDIRECT  — computed `Location`, never touches the network
///    REWRITE   — re-resolve on the rewritten path, depth capped at 1
///
/// Every request produces exactly one response; upstream failures before
/// response headers map to 502, an unmatched route to 404.
pub async fn handle_request(
    req: Request<Incoming>,
    state: GatewayState,
    port: u16,
    is_tls: bool,
    peer_addr: SocketAddr,
) -> Result<Response<BoxBody>, hyper::Error> {
    let uri_pq = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| "/".to_owned());
    let uri_path = req.uri().path().to_owned();
    let host = host_key(req.headers().get(HOST).and_then(|v| v.to_str().ok()));
    let method = req.method().as_str().to_owned();

    let mut ctx = RequestContext::new(port, host, uri_path, method, peer_addr.ip(), is_tls);

    let Some(matched) = state.config.table.resolve(port, &ctx.host, &ctx.uri_path) else {
        debug!(
            "dispatch: no route matched, port={}, host={}, path={}",
            port, ctx.host, ctx.uri_path
        );
        return Ok(ctx.error_response(StatusCode::NOT_FOUND, "Not Found"));
    };

    ctx.variant = matched.rule.variant();

    let mut buf = itoa::Buffer::new();
    metrics::gauge!(
        "iris_http_requests_in_flight",
        "port" => buf.format(port).to_owned(),
    )
    .increment(1.0);

    match matched.rule.as_ref() {
        Rule::Proxy(rule) => {
            let key = RouteKey {
                port,
                host_key: matched.host_key.clone(),
                path_key: matched.path_key.clone(),
            };
            let target = state.selector.next(rule, key);
            forward_upstream(req, &mut ctx, &state, target, &uri_pq).await
        }
        Rule::Redirect(rule) => Ok(dispatch_redirect(&ctx, rule, &uri_pq)),
        Rule::Rewrite(rule) => dispatch_rewrite(req, &mut ctx, &state, &rule.to, &uri_pq).await,
    }
}

/// Forward the request to `target`, streaming the body both ways through
/// the pooled client. Connection or I/O failure before response headers
/// yields 502; once headers are streaming, body errors abort the client
/// connection without a status rewrite.
async fn forward_upstream(
    req: Request<Incoming>,
    ctx: &mut RequestContext,
    state: &GatewayState,
    target: &Target,
    upstream_pq: &str,
) -> Result<Response<BoxBody>, hyper::Error> {
    ctx.upstream_addr = target.authority();

    let uri = format!(
        "{}://{}{}",
        target.scheme.as_str(),
        ctx.upstream_addr,
        upstream_pq
    );

    let (parts, body) = req.into_parts();
    let fwd_headers = headers::forwarded_headers(
        &parts.headers,
        ctx.client_ip,
        ctx.is_tls,
        &state.config.defaults.headers,
    );

    let mut upstream_req = match Request::builder()
        .method(parts.method)
        .uri(&uri)
        .body(body.boxed())
    {
        Ok(r) => r,
        Err(e) => {
            warn!(
                "dispatch: failed to build upstream request, uri={}, error={}",
                uri, e
            );
            return Ok(ctx.error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"));
        }
    };
    *upstream_req.headers_mut() = fwd_headers;

    ctx.upstream_start = Some(Instant::now());

    match state.client.request(&target.origin(), upstream_req).await {
        Ok(resp) => {
            ctx.finalize(resp.status().as_u16());
            Ok(resp)
        }
        Err(e) => {
            warn!("dispatch: upstream error, upstream={}, error={}", uri, e);
            Ok(ctx.error_response(StatusCode::BAD_GATEWAY, "Bad Gateway"))
        }
    }
}

fn dispatch_redirect(ctx: &RequestContext, rule: &RedirectRule, uri_pq: &str) -> Response<BoxBody> {
    let location = redirect_location(rule, uri_pq);
    let status = StatusCode::from_u16(rule.status).unwrap_or(StatusCode::FOUND);

    let mut builder = Response::builder().status(status);
    match HeaderValue::from_str(&location) {
        Ok(v) => builder = builder.header(LOCATION, v),
        Err(e) => warn!(
            "dispatch: redirect location not header-safe, location={:?}, error={}",
            location, e
        ),
    }

    ctx.finalize(status.as_u16());
    builder.body(empty_body()).unwrap()
}

/// `strip_prefix` set and matching: the stripped remainder of the request
/// URL is appended to `to`. Otherwise `to` verbatim.
fn redirect_location(rule: &RedirectRule, uri_pq: &str) -> String {
    if let Some(prefix) = &rule.strip_prefix {
        if let Some(rest) = uri_pq.strip_prefix(prefix.as_str()) {
            return format!("{}{}", rule.to, rest);
        }
    }
    rule.to.clone()
}

/// Rewrite: prepend `to` to the URL and resolve again.
///
/// When the re-resolution lands on a proxy rule — exactly or via the path
/// wildcard — the upstream still sees the *original* URL; the rewrite only
/// steers routing. Only the fallback scan (nothing matched, or the match
/// was another rewrite or a redirect) forwards the rewritten URL, to the
/// first target of the first proxy rule on the host. Rewrites never chain.
async fn dispatch_rewrite(
    req: Request<Incoming>,
    ctx: &mut RequestContext,
    state: &GatewayState,
    to: &str,
    uri_pq: &str,
) -> Result<Response<BoxBody>, hyper::Error> {
    let rewritten_pq = format!("{}{}", to, uri_pq);
    let rewritten_path = format!("{}{}", to, ctx.uri_path);

    if let Some(re) = state.config.table.resolve(ctx.port, &ctx.host, &rewritten_path) {
        if let Rule::Proxy(rule) = re.rule.as_ref() {
            let key = RouteKey {
                port: ctx.port,
                host_key: re.host_key.clone(),
                path_key: re.path_key.clone(),
            };
            let target = state.selector.next(rule, key);
            return forward_upstream(req, ctx, state, target, uri_pq).await;
        }
    }

    let fallback = state
        .config
        .table
        .host_paths(ctx.port, &ctx.host)
        .and_then(|paths| paths.values().find_map(|rule| rule.as_proxy()));
    if let Some(p) = fallback {
        return forward_upstream(req, ctx, state, &p.targets[0], &rewritten_pq).await;
    }

    debug!(
        "dispatch: rewrite resolved nothing, port={}, host={}, rewritten={}",
        ctx.port, ctx.host, rewritten_path
    );
    Ok(ctx.error_response(StatusCode::NOT_FOUND, "Not Found"))
}

/// Routing host for a request: the `Host` header lowercased with any port
/// portion stripped; `"*"` when absent.
fn host_key(raw: Option<&str>) -> String {
    match raw {
        Some(h) if !h.is_empty() => h.split(':').next().unwrap_or(h).to_ascii_lowercase(),
        _ => "*".to_string(),
    }
}
