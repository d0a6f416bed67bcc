//! Metadata sources, tried in order by the fetcher.
//!
//! - `search`: structured search endpoint, exact identifier match only
//! - `detail`: structured per-video detail endpoint
//! - `page`: the rendered video page, scraped field by field

pub mod detail;
pub mod page;
pub mod search;

use crate::error::FetchError;
use crate::models::{MetadataRecord, VideoId};
use async_trait::async_trait;
use serde::Deserialize;

pub const API_BASE_URL: &str = "https://api.bilibili.com";
pub const WEB_BASE_URL: &str = "https://www.bilibili.com";

/// One strategy for turning an identifier into a metadata record
#[async_trait]
pub trait MetadataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Single attempt. Retries and fallthrough are handled by the fetcher.
    async fn fetch(&self, id: &VideoId) -> Result<MetadataRecord, FetchError>;
}

/// Common envelope of the platform's JSON API
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the payload, mapping platform error codes to fetch errors
    pub fn into_data(self, context: &str) -> Result<T, FetchError> {
        if self.code != 0 {
            return Err(classify_api_code(self.code, &self.message, context));
        }
        self.data
            .ok_or_else(|| FetchError::Malformed(format!("{}: response has no data", context)))
    }
}

pub(crate) fn classify_api_code(code: i64, message: &str, context: &str) -> FetchError {
    let msg = format!("{}: code {} {}", context, code, message);
    match code {
        // Request throttled / too frequent
        -412 | -509 | -799 => FetchError::RateLimited(msg),
        // Risk control wants a verification step
        -352 | -353 => FetchError::Challenge(msg),
        -404 | 62002 | 62004 | 62012 => FetchError::NotFound(msg),
        -500 | -503 | -504 => FetchError::Transient(msg),
        _ => FetchError::Malformed(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_codes() {
        assert!(matches!(classify_api_code(-412, "request was banned", "detail"), FetchError::RateLimited(_)));
        assert!(matches!(classify_api_code(-352, "", "detail"), FetchError::Challenge(_)));
        assert!(matches!(classify_api_code(62002, "稿件不可见", "detail"), FetchError::NotFound(_)));
        assert!(matches!(classify_api_code(-400, "bad request", "detail"), FetchError::Malformed(_)));
    }

    #[test]
    fn test_envelope() {
        let ok: ApiEnvelope<u32> = serde_json::from_str(r#"{"code":0,"message":"0","data":7}"#).unwrap();
        assert_eq!(ok.into_data("x").unwrap(), 7);
        let empty: ApiEnvelope<u32> = serde_json::from_str(r#"{"code":0}"#).unwrap();
        assert!(matches!(empty.into_data("x"), Err(FetchError::Malformed(_))));
    }
}
