//! Error types shared across the harvester.
//!
//! `HarvestError` covers failures that abort a component or a data type,
//! `FetchError` classifies the outcome of a single outbound request so the
//! fetcher can decide between retrying, backing off and falling through.

/// Errors that can stop construction or a whole data type
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Lookup error: {0}")]
    Lookup(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Outcome classification for one request against one source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Timeouts, connection resets, 5xx: worth retrying
    #[error("Transient network error: {0}")]
    Transient(String),

    /// HTTP 429/412 or the platform's own "too many requests" code
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// A bot-verification page came back instead of data
    #[error("Bot challenge: {0}")]
    Challenge(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The source answered but has nothing usable for this identifier
    #[error("Not found: {0}")]
    NotFound(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_) | FetchError::Challenge(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Transient(msg) if msg.to_lowercase().contains("timed out") || msg.to_lowercase().contains("timeout"))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return FetchError::Malformed(e.to_string());
        }
        if let Some(status) = e.status() {
            if status.as_u16() == 429 {
                return FetchError::RateLimited(e.to_string());
            }
        }
        FetchError::Transient(e.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Malformed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FetchError::Transient("reset".into()).is_retryable());
        assert!(FetchError::Challenge("captcha".into()).is_retryable());
        assert!(!FetchError::RateLimited("-412".into()).is_retryable());
        assert!(!FetchError::Malformed("eof".into()).is_retryable());
        assert!(!FetchError::NotFound("no match".into()).is_retryable());
    }

    #[test]
    fn test_json_error_is_malformed() {
        let err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        assert!(matches!(FetchError::from(err), FetchError::Malformed(_)));
    }
}
