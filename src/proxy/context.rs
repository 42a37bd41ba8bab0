use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use std::net::IpAddr;
use std::time::Instant;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Per-request state carried through the dispatch phases.
pub struct RequestContext {
    pub port: u16,
    pub host: String,
    pub uri_path: String,
    pub method: String,
    /// Matched rule variant; empty until resolution succeeds.
    pub variant: &'static str,
    pub upstream_addr: String,
    pub client_ip: IpAddr,
    pub is_tls: bool,
    pub start: Instant,
    pub upstream_start: Option<Instant>,
}

impl RequestContext {
    pub fn new(
        port: u16,
        host: String,
        uri_path: String,
        method: String,
        client_ip: IpAddr,
        is_tls: bool,
    ) -> Self {
        Self {
            port,
            host,
            uri_path,
            method,
            variant: "",
            upstream_addr: String::new(),
            client_ip,
            is_tls,
            start: Instant::now(),
            upstream_start: None,
        }
    }

    /// Build a plain-text error response and record metrics in one place —
    /// the single exit point for all error paths.
    pub fn error_response(&self, status: StatusCode, msg: &str) -> hyper::Response<BoxBody> {
        self.record_metrics(status.as_u16());

        hyper::Response::builder()
            .status(status)
            .header("content-type", "text/plain; charset=utf-8")
            .body(full_body(msg.to_owned()))
            .unwrap()
    }

    /// Record final metrics and the access log line for a served response.
    pub fn finalize(&self, resp_status: u16) {
        self.record_metrics(resp_status);

        tracing::info!(
            client_ip = %self.client_ip,
            method = %self.method,
            host = %self.host,
            path = %self.uri_path,
            port = self.port,
            tls = self.is_tls,
            status = resp_status,
            variant = %self.variant,
            upstream = %self.upstream_addr,
            latency_ms = %self.start.elapsed().as_millis(),
            "access"
        );
    }

    fn record_metrics(&self, resp_status: u16) {
        let mut buf = itoa::Buffer::new();
        let status_str = buf.format(resp_status).to_owned();
        let port_str = buf.format(self.port).to_owned();

        metrics::counter!(
            "iris_http_requests_total",
            "port" => port_str.clone(),
            "method" => self.method.clone(),
            "variant" => self.variant,
            "status_code" => status_str,
        )
        .increment(1);

        metrics::histogram!(
            "iris_http_request_duration_seconds",
            "port" => port_str.clone(),
            "variant" => self.variant,
        )
        .record(self.start.elapsed().as_secs_f64());

        if let Some(upstream_start) = self.upstream_start {
            metrics::histogram!(
                "iris_upstream_request_duration_seconds",
                "port" => port_str.clone(),
                "upstream_addr" => self.upstream_addr.clone(),
            )
            .record(upstream_start.elapsed().as_secs_f64());
        }

        if !self.variant.is_empty() {
            metrics::gauge!(
                "iris_http_requests_in_flight",
                "port" => port_str,
            )
            .decrement(1.0);
        }
    }
}
