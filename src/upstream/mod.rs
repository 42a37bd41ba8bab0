pub mod client;
pub mod selector;

pub use client::UpstreamClient;
pub use selector::{RouteKey, UpstreamSelector};
