//! HTTP proxy for historical market series.
//!
//! Serves `GET /api/download` as CSV through an authenticate, rate-limit,
//! cache, upstream and fallback pipeline, plus `GET /api/health` and
//! `GET /api/saved`. All state hangs off one [`AppState`] built at startup.

pub mod auth;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod rate_limit;
pub mod routes;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tickproxy_core::{ReqwestHttpClient, UpstreamClient, UpstreamThrottle, YahooChartClient};

pub use auth::{Authenticator, Credential, CredentialInput, Identity};
pub use config::{AllowedOrigins, ProxyConfig};
pub use error::{ConfigError, ProxyError, StoreError};
pub use pipeline::{ProxyEndpoint, ProxyResponse, ServedFrom};
pub use rate_limit::{Admission, ClientIdentity, RateLimiter};
pub use store::{is_fresh, key_for, CacheKey, SeriesStore};

/// Shared application state, passed to handlers via `axum::extract::State`.
#[derive(Debug)]
pub struct AppState {
    pub config: ProxyConfig,
    pub endpoint: ProxyEndpoint,
}

impl AppState {
    pub fn new(config: ProxyConfig, upstream: Arc<dyn UpstreamClient>) -> Arc<Self> {
        let endpoint = ProxyEndpoint::new(&config, upstream);
        Arc::new(Self { config, endpoint })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    routes::router(state)
}

/// Production upstream: the Yahoo chart API over reqwest, under the configured call budget.
pub fn default_upstream(config: &ProxyConfig) -> Arc<dyn UpstreamClient> {
    let timeout_ms = u64::try_from(config.upstream_timeout.as_millis()).unwrap_or(u64::MAX);
    let mut client = YahooChartClient::new(Arc::new(ReqwestHttpClient::new())).with_timeout_ms(timeout_ms);
    if config.upstream_quota_per_minute > 0 {
        client = client.with_throttle(UpstreamThrottle::new(
            Duration::from_secs(60),
            config.upstream_quota_per_minute,
        ));
    }
    Arc::new(client)
}
