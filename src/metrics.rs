//! Per-source counters: attempts, failure categories and latency

use crate::error::FetchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Counters for one metadata source over a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMetrics {
    pub source_name: String,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub rate_limit_hits: u64,
    pub challenge_hits: u64,
    pub timeouts: u64,
    pub not_found: u64,
    /// Summed latency of successful attempts
    pub success_latency_ms: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl SourceMetrics {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            ..Self::default()
        }
    }

    /// Percentage of attempts that produced a record
    pub fn success_rate(&self) -> f64 {
        match self.attempts {
            0 => 0.0,
            n => self.successes as f64 * 100.0 / n as f64,
        }
    }

    pub fn mean_latency_ms(&self) -> f64 {
        match self.successes {
            0 => 0.0,
            n => self.success_latency_ms as f64 / n as f64,
        }
    }

    pub fn record_success(&mut self, latency: Duration) {
        self.attempts += 1;
        self.successes += 1;
        self.success_latency_ms += latency.as_millis() as u64;
    }

    pub fn record_failure(&mut self, error: &FetchError) {
        self.attempts += 1;
        self.failures += 1;
        self.last_error = Some(error.to_string());
        self.last_error_at = Some(Utc::now());

        let counter = match error {
            FetchError::RateLimited(_) => &mut self.rate_limit_hits,
            FetchError::Challenge(_) => &mut self.challenge_hits,
            FetchError::NotFound(_) => &mut self.not_found,
            e if e.is_timeout() => &mut self.timeouts,
            _ => return,
        };
        *counter += 1;
    }
}

/// Per-run metrics tracker, shared between fetcher and pipeline
#[derive(Clone)]
pub struct MetricsTracker {
    metrics: Arc<Mutex<HashMap<String, SourceMetrics>>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn with_source<R>(&self, source_name: &str, f: impl FnOnce(&mut SourceMetrics) -> R) -> R {
        let mut metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        let source_metrics = metrics
            .entry(source_name.to_string())
            .or_insert_with(|| SourceMetrics::new(source_name));
        f(source_metrics)
    }

    pub fn record_success(&self, source_name: &str, latency: Duration) {
        self.with_source(source_name, |m| {
            m.record_success(latency);
            log::debug!("[{}] ok in {}ms", source_name, latency.as_millis());
        });
    }

    pub fn record_failure(&self, source_name: &str, error: &FetchError) {
        self.with_source(source_name, |m| {
            m.record_failure(error);
            log::debug!("[{}] failed ({} so far): {}", source_name, m.failures, error);
        });
    }

    pub fn record_retry(&self, source_name: &str) {
        self.with_source(source_name, |m| {
            m.retries += 1;
        });
    }

    pub fn get_metrics(&self, source_name: &str) -> Option<SourceMetrics> {
        let metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        metrics.get(source_name).cloned()
    }

    pub fn get_all_metrics(&self) -> Vec<SourceMetrics> {
        let metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        metrics.values().cloned().collect()
    }

    pub fn log_summary(&self) {
        let mut sorted_metrics = self.get_all_metrics();
        if sorted_metrics.is_empty() {
            return;
        }
        sorted_metrics.sort_by(|a, b| b.success_rate().total_cmp(&a.success_rate()));

        log::info!("Source summary:");
        for m in sorted_metrics {
            log::info!(
                "  {}: {:.1}% of {} attempts ok, mean {:.0}ms, {} retries, {} rate-limited, {} challenges, {} timeouts, {} not found",
                m.source_name,
                m.success_rate(),
                m.attempts,
                m.mean_latency_ms(),
                m.retries,
                m.rate_limit_hits,
                m.challenge_hits,
                m.timeouts,
                m.not_found
            );
            if let Some(last_error) = &m.last_error {
                log::info!("    last error: {}", last_error);
            }
        }
    }

    pub fn export_json(&self) -> String {
        let metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_string_pretty(&*metrics).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}
