//! Shared run state
//!
//! Everything a harvest run needs is constructed once here from the
//! configuration and handed to the pipeline. Construction validates the
//! configuration, so a bad value fails before any network activity.
//!
//! # Structure
//!
//! - `AppState`: throttle, sessions, detector, HTTP client, metrics, sync state
//! - `CrawlProgress`: observable progress of the current run

use crate::bot_challenge::BotChallengeDetector;
use crate::config::Config;
use crate::crawler::CrawlProgress;
use crate::error::HarvestError;
use crate::http_client::{EnhancedHttpClient, HttpClientConfig};
use crate::metrics::MetricsTracker;
use crate::session_pool::SessionPool;
use crate::sync_state::SyncStateTracker;
use crate::throttle::RequestThrottle;
use crate::user_agents::UserAgentPool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct AppState {
    /// Application configuration
    pub config: Config,
    pub user_agents: Arc<UserAgentPool>,
    pub sessions: Arc<SessionPool>,
    pub detector: Arc<BotChallengeDetector>,
    /// Gate every outbound request passes through
    pub throttle: Arc<RequestThrottle>,
    pub client: Arc<EnhancedHttpClient>,
    /// Metrics tracker for monitoring source performance
    pub metrics: MetricsTracker,
    pub sync_state: Arc<SyncStateTracker>,
    /// Progress tracking for the current run
    pub crawl_progress: Arc<Mutex<CrawlProgress>>,
}

impl AppState {
    pub fn from_config(config: Config) -> Result<Self, HarvestError> {
        config.validate()?;

        let user_agents = Arc::new(UserAgentPool::new());
        let sessions = Arc::new(SessionPool::new(
            user_agents.clone(),
            config.session.count,
            Duration::from_secs(config.session.rotate_interval_seconds),
        )?);
        let detector = Arc::new(BotChallengeDetector::new());
        let throttle = Arc::new(RequestThrottle::new(config.throttle.to_throttle_config())?);
        let client = Arc::new(EnhancedHttpClient::new(
            sessions.clone(),
            detector.clone(),
            HttpClientConfig {
                timeout: config.fetch.timeout(),
                ..HttpClientConfig::default()
            },
        ));
        let sync_state = Arc::new(SyncStateTracker::new(config.crawl.full_crawl));

        Ok(Self {
            config,
            user_agents,
            sessions,
            detector,
            throttle,
            client,
            metrics: MetricsTracker::new(),
            sync_state,
            crawl_progress: Arc::new(Mutex::new(CrawlProgress::default())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_default_config() {
        let state = AppState::from_config(Config::default()).unwrap();
        assert_eq!(state.sessions.len(), 3);
        assert!(!state.sync_state.full_crawl());
    }

    #[test]
    fn test_invalid_config_fails_before_network() {
        let mut config = Config::default();
        config.throttle.backoff_factor = 0.5;
        assert!(matches!(
            AppState::from_config(config),
            Err(HarvestError::Configuration(_))
        ));
    }
}
