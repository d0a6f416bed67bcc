use crate::bot_challenge::BotChallengeDetector;
use crate::error::FetchError;
use crate::session_pool::SessionPool;
use reqwest::header::REFERER;
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Per-call settings shared by every request the harvester makes
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub referer: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            referer: Some("https://www.bilibili.com/".to_string()),
        }
    }
}

/// Single-attempt HTTP access over the session pool.
///
/// Retrying is the caller's business: every failure comes back as a
/// classified [`FetchError`] so the fetcher can pick between retry, backoff
/// and fallthrough. Bot challenges force a session rotation before returning.
pub struct EnhancedHttpClient {
    sessions: Arc<SessionPool>,
    detector: Arc<BotChallengeDetector>,
    config: HttpClientConfig,
}

impl EnhancedHttpClient {
    pub fn new(
        sessions: Arc<SessionPool>,
        detector: Arc<BotChallengeDetector>,
        config: HttpClientConfig,
    ) -> Self {
        Self {
            sessions,
            detector,
            config,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionPool> {
        &self.sessions
    }

    pub fn detector(&self) -> &Arc<BotChallengeDetector> {
        &self.detector
    }

    /// Check if a status code is worth retrying
    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(
            status.as_u16(),
            // Rate limiting, including the platform's "precondition failed" throttle
            412 | 429 |
            // Server errors
            500 | 502 | 503 | 504 |
            // CDN edge errors
            520 | 521 | 522 | 523 | 524 | 525 | 526 | 527
        )
    }

    /// Map a non-success status to a fetch error
    pub fn classify_status(status: StatusCode, url: &str) -> FetchError {
        let msg = format!("HTTP {} for {}", status.as_u16(), url);
        match status.as_u16() {
            412 | 429 => FetchError::RateLimited(msg),
            403 => FetchError::Challenge(msg),
            404 | 410 => FetchError::NotFound(msg),
            _ if Self::is_retryable_status(status) || status.is_server_error() => {
                FetchError::Transient(msg)
            }
            _ => FetchError::Malformed(msg),
        }
    }

    fn map_send_error(e: reqwest::Error, url: &str) -> FetchError {
        if e.is_timeout() {
            FetchError::Transient(format!("request timed out for {}: {}", url, e))
        } else {
            FetchError::from(e)
        }
    }

    async fn send(&self, url: &str) -> Result<Response, FetchError> {
        let session = self.sessions.current();
        let mut request = session.client.get(url).timeout(self.config.timeout);
        if let Some(referer) = &self.config.referer {
            request = request.header(REFERER, referer);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, url))?;

        let final_url = response.url().to_string();
        let status = response.status();
        if self.detector.detect(None, Some(&final_url), Some(status.as_u16())) {
            self.sessions.force_rotate();
            return Err(FetchError::Challenge(format!(
                "challenge signalled by {} (HTTP {})",
                final_url,
                status.as_u16()
            )));
        }
        if !status.is_success() {
            log::debug!("Request to {} returned {}", url, status);
            return Err(Self::classify_status(status, url));
        }
        Ok(response)
    }

    /// Fetch a page body. Every body is checked for challenge content,
    /// whatever content type the server claims.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.send(url).await?;
        let body = response
            .text()
            .await
            .map_err(|e| Self::map_send_error(e, url))?;
        if self.detector.detect(Some(&body), Some(url), None) {
            self.sessions.force_rotate();
            return Err(FetchError::Challenge(format!("challenge page served for {}", url)));
        }
        Ok(body)
    }

    /// Fetch and parse a JSON document
    pub async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let response = self.send(url).await?;
        let body = response
            .text()
            .await
            .map_err(|e| Self::map_send_error(e, url))?;
        serde_json::from_str(&body).map_err(|e| {
            if self.detector.detect(Some(&body), Some(url), None) {
                self.sessions.force_rotate();
                FetchError::Challenge(format!("challenge page served instead of JSON for {}", url))
            } else {
                FetchError::Malformed(format!("invalid JSON from {}: {}", url, e))
            }
        })
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.send(url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::map_send_error(e, url))?;
        Ok(bytes.to_vec())
    }
}
