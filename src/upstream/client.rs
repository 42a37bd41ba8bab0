use crate::proxy::context::BoxBody;
use bytes::Bytes;
use dashmap::DashMap;
use http_body_util::BodyExt;
use hyper::body::{Body, Frame, Incoming};
use hyper::{Request, Response};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Hard cap on concurrent sockets per upstream origin.
pub const MAX_SOCKETS_PER_ORIGIN: usize = 100;

/// Idle keep-alive sockets retained per origin.
pub const MAX_IDLE_PER_ORIGIN: usize = 10;

/// Idle sockets older than this are dropped from the pool.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Pooled keep-alive HTTP client for upstream requests.
///
/// One hyper client serves all origins; it pools connections per
/// `(scheme, host, port)` internally with the idle bounds above. On top of
/// that, a per-origin semaphore caps in-flight requests so one slow origin
/// cannot absorb an unbounded number of sockets. The permit travels with
/// the response body and is released when the body is fully streamed (or
/// dropped on client disconnect).
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client<HttpsConnector<HttpConnector>, BoxBody>,
    limits: Arc<DashMap<String, Arc<Semaphore>>>,
}

impl UpstreamClient {
    pub fn new() -> Self {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.set_keepalive(Some(POOL_IDLE_TIMEOUT));
        http.enforce_http(false);

        // Upstream scheme is dictated by each target URL; both http:// and
        // https:// go through the same connector.
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_PER_ORIGIN)
            .build(https);

        Self {
            client,
            limits: Arc::new(DashMap::new()),
        }
    }

    /// Send `req` to the origin identified by `origin` (a
    /// `scheme://host:port` pool key). Errors surface before any response
    /// byte exists, so the caller can still produce a clean 502.
    pub async fn request(
        &self,
        origin: &str,
        req: Request<BoxBody>,
    ) -> Result<Response<BoxBody>, hyper_util::client::legacy::Error> {
        let limiter = self
            .limits
            .entry(origin.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(MAX_SOCKETS_PER_ORIGIN)))
            .clone();

        // The semaphore is never closed; `ok()` only hedges shutdown races.
        let permit = limiter.acquire_owned().await.ok();

        let resp = self.client.request(req).await?;
        Ok(resp.map(|body| {
            PermitBody {
                inner: body,
                _permit: permit,
            }
            .boxed()
        }))
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Response body that holds the origin's concurrency permit until the last
/// frame is read.
struct PermitBody {
    inner: Incoming,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Body for PermitBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> hyper::body::SizeHint {
        self.inner.size_hint()
    }
}
