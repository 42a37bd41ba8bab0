use crate::config::ProxyConfig;
use crate::metrics::Metrics;
use crate::upstream::{UpstreamClient, UpstreamSelector};
use std::sync::Arc;

/// Shared gateway state, cheaply cloneable.
///
/// The configuration (routing table, TLS map, defaults) is immutable after
/// startup — reads need no locking. Mutable state is confined to the
/// round-robin selector and the upstream connection pools, both internally
/// synchronized.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<ProxyConfig>,
    pub selector: Arc<UpstreamSelector>,
    pub client: UpstreamClient,
    /// Present when the Prometheus recorder is installed (not in tests).
    pub metrics: Option<Metrics>,
}

impl GatewayState {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config: Arc::new(config),
            selector: Arc::new(UpstreamSelector::new()),
            client: UpstreamClient::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}
