//! A configuration-driven reverse proxy / edge gateway.
//!
//! One JSON document drives everything: each top-level port key maps
//! `(host, path)` to a proxy, redirect, or rewrite rule, with exact keys
//! beating the `"*"` wildcard and multi-target proxy rules balanced
//! round-robin.
//!
//! Programmatic surface: [`load`] a config, [`server::start`] the
//! listeners, and [`server::Listeners::shutdown`] to drain and stop.

pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod routing;
pub mod server;
pub mod upstream;

pub use config::{load_str as load, ProxyConfig};
pub use error::GatewayError;
pub use server::{GatewayState, Listeners};
