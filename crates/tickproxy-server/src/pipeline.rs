//! Per-request pipeline of the download endpoint.
//!
//! | Stage | Terminal outcome |
//! |-------|------------------|
//! | authenticate | 401 |
//! | rate check | 429 |
//! | cache lookup (skipped on force refresh) | 200 from cache when fresh |
//! | upstream fetch | 200, or 404 on an empty result |
//! | backfill | never fails the request |
//! | degraded fallback (upstream failure only) | 200 from a stale snapshot, else 502 |

use std::sync::Arc;
use std::time::Duration;

use tickproxy_core::{fetch_with_timeout, write_csv, FetchOutcome, SeriesRequest, SeriesTable, UpstreamClient};
use time::OffsetDateTime;

use crate::auth::{Authenticator, CredentialInput, Identity};
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::rate_limit::{Admission, ClientIdentity, RateLimiter};
use crate::store::{is_fresh, CacheKey, SeriesStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
    Cache,
    Upstream,
    Fallback,
}

impl ServedFrom {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Upstream => "upstream",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResponse {
    pub table: SeriesTable,
    pub served_from: ServedFrom,
    pub identity: Identity,
}

impl ProxyResponse {
    pub fn to_csv(&self) -> Result<String, ProxyError> {
        Ok(write_csv(&self.table)?)
    }
}

/// Orchestrates authentication, rate limiting, cache and upstream for one process.
pub struct ProxyEndpoint {
    authenticator: Authenticator,
    limiter: RateLimiter,
    store: SeriesStore,
    upstream: Arc<dyn UpstreamClient>,
    cache_ttl: Duration,
    upstream_timeout: Duration,
}

impl ProxyEndpoint {
    pub fn new(config: &ProxyConfig, upstream: Arc<dyn UpstreamClient>) -> Self {
        Self {
            authenticator: Authenticator::new(config.credentials.clone()),
            limiter: RateLimiter::new(config.rate_limit_max, config.rate_limit_window),
            store: SeriesStore::new(&config.cache_dir, &config.snapshot_dir),
            upstream,
            cache_ttl: config.cache_ttl,
            upstream_timeout: config.upstream_timeout,
        }
    }

    pub fn store(&self) -> &SeriesStore {
        &self.store
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Authentication then rate check. Rejected credentials never consume budget.
    pub fn admit(&self, credential: &CredentialInput, client: &ClientIdentity) -> Result<Identity, ProxyError> {
        let identity = self.authenticator.verify(credential)?;

        match self.limiter.admit(client) {
            Admission::Allowed => Ok(identity),
            Admission::Rejected { retry_after_secs } => {
                tracing::debug!(%client, retry_after_secs, "rate limited");
                Err(ProxyError::RateLimited { retry_after_secs })
            }
        }
    }

    pub async fn handle(
        &self,
        request: SeriesRequest,
        credential: &CredentialInput,
        client: &ClientIdentity,
    ) -> Result<ProxyResponse, ProxyError> {
        let identity = self.admit(credential, client)?;
        let key = CacheKey::for_request(&request);

        if request.force_refresh {
            tracing::debug!(%key, "cache bypassed on request");
        } else if let Some(cached) = self.store.get(&key).await {
            if is_fresh(cached.age, self.cache_ttl) {
                tracing::debug!(%key, age_secs = cached.age.as_secs(), "serving fresh cache entry");
                return Ok(ProxyResponse {
                    table: cached.table,
                    served_from: ServedFrom::Cache,
                    identity,
                });
            }
            tracing::debug!(%key, age_secs = cached.age.as_secs(), "cache entry stale");
        }

        match fetch_with_timeout(self.upstream.as_ref(), &request, self.upstream_timeout).await {
            FetchOutcome::Table(table) => {
                self.backfill(&key, &request, &table).await;
                Ok(ProxyResponse {
                    table,
                    served_from: ServedFrom::Upstream,
                    identity,
                })
            }
            FetchOutcome::Empty => Err(ProxyError::NoDataAvailable {
                symbol: request.symbol.to_string(),
            }),
            FetchOutcome::Failed(error) => {
                tracing::warn!(
                    symbol = %request.symbol,
                    timed_out = error.timed_out(),
                    %error,
                    "upstream fetch failed; trying fallback snapshot"
                );
                match self.store.fallback_for(&request.symbol).await {
                    Some(snapshot) => {
                        tracing::warn!(
                            symbol = %request.symbol,
                            file = %snapshot.file_name,
                            "serving degraded fallback snapshot"
                        );
                        Ok(ProxyResponse {
                            table: snapshot.table,
                            served_from: ServedFrom::Fallback,
                            identity,
                        })
                    }
                    None => Err(ProxyError::UpstreamUnavailable {
                        symbol: request.symbol.to_string(),
                        detail: error.message().to_owned(),
                    }),
                }
            }
        }
    }

    async fn backfill(&self, key: &CacheKey, request: &SeriesRequest, table: &SeriesTable) {
        match self.store.put(key, table).await {
            Ok(path) => tracing::debug!(%key, path = %path.display(), rows = table.len(), "cache entry written"),
            Err(error) => tracing::warn!(%key, %error, "cache write failed; response unaffected"),
        }

        if request.save {
            match self
                .store
                .save_snapshot(&request.symbol, table, OffsetDateTime::now_utc())
                .await
            {
                Ok(path) => tracing::info!(symbol = %request.symbol, path = %path.display(), "snapshot saved"),
                Err(error) => tracing::warn!(symbol = %request.symbol, %error, "snapshot save failed"),
            }
        }
    }
}

impl std::fmt::Debug for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyEndpoint")
            .field("authenticator", &self.authenticator)
            .field("store", &self.store)
            .field("cache_ttl", &self.cache_ttl)
            .field("upstream_timeout", &self.upstream_timeout)
            .finish_non_exhaustive()
    }
}
