mod admin;
pub mod bootstrap;
pub mod runtime;
mod state;
pub mod tls;

pub use state::GatewayState;

use crate::proxy;
use anyhow::Result;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// One bound listener, as reported back to the caller of `start`.
#[derive(Debug, Clone)]
pub struct BoundPort {
    pub port: u16,
    pub tls: bool,
    pub addr: SocketAddr,
}

/// Handle over the running listener set. Dropping it does not stop the
/// listeners; call `shutdown` to drain and stop them.
pub struct Listeners {
    shutdown: Arc<Notify>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    bound: Vec<BoundPort>,
}

impl Listeners {
    pub fn bound(&self) -> &[BoundPort] {
        &self.bound
    }

    /// Stop accepting, drain in-flight requests, and wait for every
    /// listener task to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_waiters();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("server: listener task error on shutdown: {}", e);
            }
        }
        info!("server: all listeners stopped");
    }
}

/// Bind one listener per configured port — TLS-terminating when the TLS
/// map has an entry for the port, plain HTTP otherwise.
///
/// Failures are bounded to the port: TLS material that does not load or an
/// address that does not bind is logged and skipped, and the remaining
/// ports still come up.
pub async fn start(state: GatewayState, bind_addr: IpAddr) -> Result<Listeners> {
    let shutdown = Arc::new(Notify::new());
    let mut handles = Vec::new();
    let mut bound = Vec::new();

    let ports: Vec<u16> = state.config.table.ports().collect();
    for port in ports {
        let acceptor = match state.config.tls.get(&port) {
            Some(tls_cfg) => match tls::build_acceptor(tls_cfg) {
                Ok(acceptor) => Some(acceptor),
                Err(e) => {
                    error!(
                        "server: port {}: TLS material failed to load, skipping port, error={}",
                        port, e
                    );
                    continue;
                }
            },
            None => None,
        };

        let addr = SocketAddr::new(bind_addr, port);
        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("server: bind failed, addr={}, skipping port, error={}", addr, e);
                continue;
            }
        };
        let local_addr = listener.local_addr().unwrap_or(addr);

        info!(
            "server: listening, addr={}, tls={}",
            local_addr,
            acceptor.is_some()
        );
        bound.push(BoundPort {
            port,
            tls: acceptor.is_some(),
            addr: local_addr,
        });
        handles.push(tokio::spawn(run_listener(
            listener,
            acceptor,
            port,
            state.clone(),
            shutdown.clone(),
        )));
    }

    if bound.is_empty() {
        warn!("server: no listener could be started");
    }

    Ok(Listeners {
        shutdown,
        handles,
        bound,
    })
}

/// Accept loop for one port. On shutdown, stops accepting and waits up to
/// `DRAIN_TIMEOUT` for in-flight connections to finish.
async fn run_listener(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    port: u16,
    state: GatewayState,
    shutdown: Arc<Notify>,
) {
    const DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

    let active_conns = Arc::new(AtomicI64::new(0));

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                info!("server: port {}: stop accepting new connections, draining...", port);
                break;
            }
        };

        let (stream, peer_addr) = match accepted {
            Ok(v) => {
                metrics::counter!("iris_connections_total", "status" => "accepted").increment(1);
                v
            }
            Err(e) => {
                error!("server: port {}: accept failed, error={}", port, e);
                metrics::counter!("iris_connections_total", "status" => "error").increment(1);
                continue;
            }
        };

        metrics::gauge!("iris_connections_active").increment(1.0);
        active_conns.fetch_add(1, Ordering::Relaxed);

        let state = state.clone();
        let acceptor = acceptor.clone();
        let active_conns = active_conns.clone();

        tokio::spawn(async move {
            let is_tls = acceptor.is_some();
            let state_inner = state.clone();
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state_inner.clone();
                async move { proxy::handle_request(req, state, port, is_tls, peer_addr).await }
            });

            match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        serve_connection(TokioIo::new(tls_stream), svc, peer_addr).await;
                    }
                    Err(e) => {
                        debug!(
                            "server: port {}: TLS handshake failed, peer={}, error={}",
                            port, peer_addr, e
                        );
                    }
                },
                None => {
                    serve_connection(TokioIo::new(stream), svc, peer_addr).await;
                }
            }

            metrics::gauge!("iris_connections_active").decrement(1.0);
            active_conns.fetch_sub(1, Ordering::Relaxed);
        });
    }

    // Drain phase: wait for in-flight connections (or give up after the
    // timeout).
    let active = active_conns.load(Ordering::Relaxed);
    if active > 0 {
        info!(
            "server: port {}: waiting for {} active connections to drain",
            port, active
        );
        let drain = async {
            while active_conns.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        };
        match tokio::time::timeout(DRAIN_TIMEOUT, drain).await {
            Ok(_) => info!("server: port {}: all connections drained", port),
            Err(_) => info!(
                "server: port {}: drain timeout ({}s), {} connections still active",
                port,
                DRAIN_TIMEOUT.as_secs(),
                active_conns.load(Ordering::Relaxed)
            ),
        }
    }
}

async fn serve_connection<I, S>(io: TokioIo<I>, svc: S, peer_addr: SocketAddr)
where
    I: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    S: hyper::service::Service<
            Request<Incoming>,
            Response = hyper::Response<proxy::context::BoxBody>,
            Error = hyper::Error,
        > + Send
        + 'static,
    S::Future: Send + 'static,
{
    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .http1()
        .keep_alive(true)
        .serve_connection_with_upgrades(io, svc)
        .await
    {
        if !e.to_string().contains("connection closed") {
            error!(
                "server: connection error, peer={}, error={}",
                peer_addr, e
            );
        }
    }
}

/// Admin server: health/readiness, metrics, and a routing-table dump.
pub async fn run_admin_server(listen: &str, state: GatewayState) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: admin listening, addr={}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { admin::handle_admin(req, state) }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!("server: admin: connection error, error={}", e);
                }
            }
        });
    }
}
