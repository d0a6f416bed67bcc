//! Adaptive request throttle
//!
//! Every outbound request passes through [`RequestThrottle::wait`]. The delay
//! grows on failures, shrinks after success streaks, gets exponential backoff
//! for retry attempts and a little random jitter. A semaphore caps how many
//! callers can be waiting at once.

use crate::error::HarvestError;
use rand::Rng;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

const SUCCESS_STREAK: u32 = 3;
const SPEEDUP_FACTOR: f64 = 0.9;
const JITTER_FRACTION: f64 = 0.3;
/// Upper bound for any configured delay, in seconds
pub const MAX_DELAY_SECONDS: f64 = 86_400.0;
const FAILURE_STEP: f64 = 0.2;
const FAILURE_STEP_CAP: u32 = 5;

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Seconds
    pub min_delay: f64,
    /// Seconds
    pub max_delay: f64,
    pub enable_jitter: bool,
    pub enable_adaptive: bool,
    pub enable_exponential_backoff: bool,
    pub backoff_factor: f64,
    pub max_concurrent: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_delay: 1.0,
            max_delay: 3.0,
            enable_jitter: true,
            enable_adaptive: true,
            enable_exponential_backoff: true,
            backoff_factor: 2.0,
            max_concurrent: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThrottleStats {
    pub success_count: u64,
    pub failure_count: u64,
    pub current_delay: f64,
    pub min_delay: f64,
    pub max_delay: f64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
struct ThrottleState {
    current_delay: f64,
    consecutive_successes: u32,
    consecutive_failures: u32,
    success_count: u64,
    failure_count: u64,
    last_call: Option<Instant>,
}

impl ThrottleState {
    fn initial(min_delay: f64) -> Self {
        Self {
            current_delay: min_delay,
            consecutive_successes: 0,
            consecutive_failures: 0,
            success_count: 0,
            failure_count: 0,
            last_call: None,
        }
    }
}

pub struct RequestThrottle {
    config: ThrottleConfig,
    state: Mutex<ThrottleState>,
    permits: Semaphore,
}

impl RequestThrottle {
    pub fn new(config: ThrottleConfig) -> Result<Self, HarvestError> {
        if !(config.min_delay >= 0.0) {
            return Err(HarvestError::Configuration(format!(
                "throttle.minDelay must be >= 0, got {}",
                config.min_delay
            )));
        }
        if !(config.max_delay >= config.min_delay) {
            return Err(HarvestError::Configuration(format!(
                "throttle.maxDelay ({}) must be >= throttle.minDelay ({})",
                config.max_delay, config.min_delay
            )));
        }
        if !(config.max_delay <= MAX_DELAY_SECONDS) {
            return Err(HarvestError::Configuration(format!(
                "throttle.maxDelay must be at most {} seconds, got {}",
                MAX_DELAY_SECONDS, config.max_delay
            )));
        }
        if !(config.backoff_factor >= 1.0 && config.backoff_factor.is_finite()) {
            return Err(HarvestError::Configuration(format!(
                "throttle.backoffFactor must be a finite number >= 1, got {}",
                config.backoff_factor
            )));
        }
        if config.max_concurrent < 1 {
            return Err(HarvestError::Configuration(
                "throttle.maxConcurrent must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            state: Mutex::new(ThrottleState::initial(config.min_delay)),
            permits: Semaphore::new(config.max_concurrent),
            config,
        })
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Target delay in seconds for `attempt` before subtracting elapsed time
    pub fn target_delay(&self, attempt: u32) -> f64 {
        let current = self.state().current_delay;
        let cfg = &self.config;
        let mut base = current;
        if cfg.enable_exponential_backoff && attempt > 0 {
            base = (cfg.min_delay * cfg.backoff_factor.powi(attempt as i32)).min(cfg.max_delay);
        }
        if cfg.enable_jitter && base > 0.0 {
            base += rand::thread_rng().gen_range(0.0..=base * JITTER_FRACTION);
        }
        base.clamp(cfg.min_delay, cfg.max_delay)
    }

    /// Block until the caller may issue its request. Returns the time slept.
    pub async fn wait(&self, attempt: u32) -> Duration {
        let _permit = self.permits.acquire().await.ok();
        let target = Duration::from_secs_f64(self.target_delay(attempt));

        // Reserve the slot under the lock, sleep outside it
        let sleep_for = {
            let mut state = self.state();
            let now = Instant::now();
            let sleep_for = match state.last_call {
                Some(last) => target.saturating_sub(now.saturating_duration_since(last)),
                None => target,
            };
            state.last_call = Some(now + sleep_for);
            sleep_for
        };

        if !sleep_for.is_zero() {
            log::debug!("Throttle waiting {:.2}s (attempt {})", sleep_for.as_secs_f64(), attempt);
            tokio::time::sleep(sleep_for).await;
        }
        sleep_for
    }

    pub fn record_success(&self) {
        let mut state = self.state();
        state.success_count += 1;
        state.consecutive_failures = 0;
        state.consecutive_successes += 1;
        if self.config.enable_adaptive && state.consecutive_successes >= SUCCESS_STREAK {
            state.current_delay = (state.current_delay * SPEEDUP_FACTOR).max(self.config.min_delay);
            state.consecutive_successes = 0;
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state();
        state.failure_count += 1;
        state.consecutive_successes = 0;
        state.consecutive_failures += 1;
        if self.config.enable_adaptive {
            let step = state.consecutive_failures.min(FAILURE_STEP_CAP) as f64;
            state.current_delay =
                (state.current_delay * (1.0 + FAILURE_STEP * step)).min(self.config.max_delay);
            log::debug!(
                "Throttle slowed to {:.2}s after {} consecutive failures",
                state.current_delay,
                state.consecutive_failures
            );
        }
    }

    pub fn current_delay(&self) -> f64 {
        self.state().current_delay
    }

    pub fn reset(&self) {
        *self.state() = ThrottleState::initial(self.config.min_delay);
    }

    pub fn stats(&self) -> ThrottleStats {
        let state = self.state();
        ThrottleStats {
            success_count: state.success_count,
            failure_count: state.failure_count,
            current_delay: state.current_delay,
            min_delay: self.config.min_delay,
            max_delay: self.config.max_delay,
            consecutive_successes: state.consecutive_successes,
            consecutive_failures: state.consecutive_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min: f64, max: f64) -> ThrottleConfig {
        ThrottleConfig {
            min_delay: min,
            max_delay: max,
            ..ThrottleConfig::default()
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(RequestThrottle::new(config(-1.0, 1.0)).is_err());
        assert!(RequestThrottle::new(config(2.0, 1.0)).is_err());
        let mut bad_factor = config(0.1, 1.0);
        bad_factor.backoff_factor = 0.5;
        assert!(RequestThrottle::new(bad_factor).is_err());
        assert!(RequestThrottle::new(config(0.0, f64::INFINITY)).is_err());
        assert!(RequestThrottle::new(config(1e20, 1e20)).is_err());
        assert!(RequestThrottle::new(config(f64::NAN, 1.0)).is_err());
        let mut infinite_factor = config(0.1, 1.0);
        infinite_factor.backoff_factor = f64::INFINITY;
        assert!(RequestThrottle::new(infinite_factor).is_err());
        let mut bad_concurrency = config(0.1, 1.0);
        bad_concurrency.max_concurrent = 0;
        assert!(matches!(
            RequestThrottle::new(bad_concurrency),
            Err(HarvestError::Configuration(_))
        ));
    }

    #[test]
    fn test_failures_push_delay_to_max() {
        let throttle = RequestThrottle::new(config(0.1, 0.5)).unwrap();
        for _ in 0..10 {
            throttle.record_failure();
        }
        assert!((throttle.current_delay() - 0.5).abs() < 1e-9);
        for attempt in 0..5 {
            let d = throttle.target_delay(attempt);
            assert!(d <= 0.5 + 1e-9 && d >= 0.1 - 1e-9);
        }
    }

    #[test]
    fn test_success_streak_speeds_up() {
        let throttle = RequestThrottle::new(config(0.1, 1.0)).unwrap();
        for _ in 0..4 {
            throttle.record_failure();
        }
        let slowed = throttle.current_delay();
        for _ in 0..3 {
            throttle.record_success();
        }
        assert!((throttle.current_delay() - slowed * 0.9).abs() < 1e-9);
        assert_eq!(throttle.stats().consecutive_successes, 0);
    }

    #[test]
    fn test_speedup_floored_at_min() {
        let throttle = RequestThrottle::new(config(0.2, 1.0)).unwrap();
        for _ in 0..30 {
            throttle.record_success();
        }
        assert!((throttle.current_delay() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_non_adaptive_keeps_delay() {
        let mut cfg = config(0.1, 1.0);
        cfg.enable_adaptive = false;
        let throttle = RequestThrottle::new(cfg).unwrap();
        throttle.record_failure();
        throttle.record_failure();
        assert!((throttle.current_delay() - 0.1).abs() < 1e-9);
        assert_eq!(throttle.stats().failure_count, 2);
    }

    #[test]
    fn test_backoff_grows_with_attempt() {
        let mut cfg = config(0.1, 10.0);
        cfg.enable_jitter = false;
        let throttle = RequestThrottle::new(cfg).unwrap();
        assert!((throttle.target_delay(0) - 0.1).abs() < 1e-9);
        assert!((throttle.target_delay(1) - 0.2).abs() < 1e-9);
        assert!((throttle.target_delay(3) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let throttle = RequestThrottle::new(config(0.1, 1.0)).unwrap();
        throttle.record_failure();
        throttle.reset();
        let stats = throttle.stats();
        assert_eq!(stats.failure_count, 0);
        assert!((stats.current_delay - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_wait_spacing() {
        let mut cfg = config(0.05, 0.05);
        cfg.enable_jitter = false;
        let throttle = RequestThrottle::new(cfg).unwrap();
        let start = Instant::now();
        throttle.wait(0).await;
        throttle.wait(0).await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
