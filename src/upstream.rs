//! This module defines the core upstream abstraction for the proxy.
//!
//! It contains the `Upstream` trait, which is the capability set the
//! balancer relies on for every backend destination, the `StaticUpstream`
//! struct implementing it for a fixed address, and the `ProxyError` enum
//! for handling all possible error conditions within the application.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use reqwest::{Client, Url};
use thiserror::Error;

use crate::config::ConfigError;
use crate::forwarder;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid upstream address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("No upstreams configured")]
    NoUpstreams,
    #[error("No available upstream")]
    NoAvailableUpstream,
}

impl From<ConfigError> for ProxyError {
    fn from(err: ConfigError) -> Self {
        ProxyError::Config(err.to_string())
    }
}

/// The capability set the balancer requires from a backend destination.
///
/// Only `StaticUpstream` exists today. The trait is the seam for variants
/// with real liveness probing to slot in without touching the balancer.
#[async_trait]
pub trait Upstream: Send + Sync + std::fmt::Debug {
    /// Returns the immutable destination identifier this upstream was built from.
    fn address(&self) -> &str;

    /// Returns whether the upstream is currently eligible for selection.
    fn is_alive(&self) -> bool;

    /// Relays `req` to the backend and returns its response.
    ///
    /// Backend failures are converted into gateway-style error responses by
    /// the relay; callers never see an `Err` for a forwarding problem.
    async fn forward(&self, req: Request<Body>) -> Response;
}

/// A fixed backend destination with no health probing.
#[derive(Debug, Clone)]
pub struct StaticUpstream {
    address: String,
    url: Url,
    client: Client,
}

impl StaticUpstream {
    /// Parses `address` into a destination descriptor.
    ///
    /// The address must carry a scheme and a host (`http://host:port`); the
    /// path component of each inbound request replaces whatever path the
    /// address has.
    pub fn new(address: &str, client: Client) -> Result<Self, ProxyError> {
        let url = Url::parse(address).map_err(|e| ProxyError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        if !url.has_host() {
            return Err(ProxyError::InvalidAddress {
                address: address.to_string(),
                reason: "missing host".to_string(),
            });
        }
        Ok(Self { address: address.to_string(), url, client })
    }
}

#[async_trait]
impl Upstream for StaticUpstream {
    fn address(&self) -> &str {
        &self.address
    }

    fn is_alive(&self) -> bool {
        true
    }

    async fn forward(&self, req: Request<Body>) -> Response {
        forwarder::relay(&self.client, &self.url, &self.address, req).await
    }
}
