//! Ordered-fallback metadata fetcher
//!
//! Each identifier is offered to the sources in order. A source gets its own
//! retry budget for transient failures and a separate allowance for
//! rate-limited answers; once both are spent (or it answers with something
//! unusable) the next source is tried.

use crate::error::FetchError;
use crate::metrics::MetricsTracker;
use crate::models::{MetadataRecord, VideoId};
use crate::sources::MetadataSource;
use crate::throttle::RequestThrottle;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    /// Attempts per source for transient failures (at least one is made)
    pub max_retries: u32,
    pub max_rate_limit_retries: u32,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_rate_limit_retries: 5,
        }
    }
}

pub struct MetadataFetcher {
    sources: Vec<Box<dyn MetadataSource>>,
    throttle: Arc<RequestThrottle>,
    metrics: MetricsTracker,
    policy: FetchPolicy,
}

impl MetadataFetcher {
    pub fn new(
        sources: Vec<Box<dyn MetadataSource>>,
        throttle: Arc<RequestThrottle>,
        metrics: MetricsTracker,
        policy: FetchPolicy,
    ) -> Self {
        Self {
            sources,
            throttle,
            metrics,
            policy,
        }
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// First record any source produces, or `None` once all are exhausted
    pub async fn fetch(&self, id: &VideoId) -> Option<MetadataRecord> {
        for source in &self.sources {
            match self.try_source(source.as_ref(), id).await {
                Ok(record) => {
                    let missing = record.missing_required();
                    if missing.is_empty() {
                        log::info!("[{}] {} -> {}", source.name(), id, record.title);
                    } else {
                        log::warn!(
                            "[{}] {} is missing required fields: {}",
                            source.name(),
                            id,
                            missing.join(", ")
                        );
                    }
                    return Some(record);
                }
                Err(e) => {
                    log::info!("[{}] gave up on {}: {}", source.name(), id, e);
                }
            }
        }
        log::error!("All sources exhausted for {}, skipping", id);
        None
    }

    async fn try_source(
        &self,
        source: &dyn MetadataSource,
        id: &VideoId,
    ) -> Result<MetadataRecord, FetchError> {
        let name = source.name();
        let attempts = self.policy.max_retries.max(1);
        let mut transient_used = 0u32;
        let mut rate_limited = 0u32;

        loop {
            self.throttle.wait(transient_used + rate_limited).await;
            let started = Instant::now();
            let err = match source.fetch(id).await {
                Ok(record) if record.id == *id => {
                    self.throttle.record_success();
                    self.metrics.record_success(name, started.elapsed());
                    return Ok(record);
                }
                Ok(record) => FetchError::Malformed(format!(
                    "asked for {} but got {}",
                    id, record.id
                )),
                Err(e) => e,
            };

            self.metrics.record_failure(name, &err);
            if matches!(err, FetchError::RateLimited(_)) {
                self.throttle.record_failure();
                if rate_limited >= self.policy.max_rate_limit_retries {
                    return Err(err);
                }
                rate_limited += 1;
                self.metrics.record_retry(name);
                log::warn!(
                    "[{}] rate limited on {} ({}/{}), backing off",
                    name,
                    id,
                    rate_limited,
                    self.policy.max_rate_limit_retries
                );
            } else if err.is_retryable() {
                self.throttle.record_failure();
                transient_used += 1;
                if transient_used >= attempts {
                    return Err(err);
                }
                self.metrics.record_retry(name);
                log::warn!(
                    "[{}] attempt {}/{} for {} failed: {}",
                    name,
                    transient_used,
                    attempts,
                    id,
                    err
                );
            } else {
                // The server answered; there is just nothing usable here
                self.throttle.record_success();
                return Err(err);
            }
        }
    }
}
