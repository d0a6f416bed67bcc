use super::{ApiEnvelope, MetadataSource, API_BASE_URL};
use crate::error::FetchError;
use crate::helpers::{date_from_timestamp, normalize_cover_url, normalize_duration, strip_html_tags};
use crate::http_client::EnhancedHttpClient;
use crate::models::{MetadataRecord, VideoId};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

const SEARCH_PATH: &str = "/x/web-interface/search/type";

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    bvid: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    pubdate: i64,
    #[serde(default)]
    play: u64,
    #[serde(default)]
    video_review: u64,
    #[serde(default)]
    author: String,
    #[serde(default)]
    pic: String,
    #[serde(default)]
    duration: String,
}

/// Keyword search, accepted only when a hit carries the exact identifier
pub struct SearchSource {
    client: Arc<EnhancedHttpClient>,
    base_url: String,
}

impl SearchSource {
    pub fn new(client: Arc<EnhancedHttpClient>) -> Self {
        Self::with_base_url(client, API_BASE_URL)
    }

    pub fn with_base_url(client: Arc<EnhancedHttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn search_url(&self, id: &VideoId) -> String {
        format!(
            "{}{}?search_type=video&keyword={}",
            self.base_url,
            SEARCH_PATH,
            urlencoding::encode(id.as_str())
        )
    }
}

#[async_trait]
impl MetadataSource for SearchSource {
    fn name(&self) -> &str {
        "search"
    }

    async fn fetch(&self, id: &VideoId) -> Result<MetadataRecord, FetchError> {
        let url = self.search_url(id);
        let value = self.client.get_json(&url).await?;
        let envelope: ApiEnvelope<SearchData> = serde_json::from_value(value)?;
        let data = envelope.into_data(&format!("search {}", id))?;

        let hit = data
            .result
            .into_iter()
            .find(|hit| VideoId::parse(&hit.bvid).as_ref() == Some(id))
            .ok_or_else(|| FetchError::NotFound(format!("search {}: no exact match", id)))?;

        let mut record = MetadataRecord::empty(id.clone());
        record.title = strip_html_tags(&hit.title);
        record.description = hit.description.trim().to_string();
        record.publish_date = date_from_timestamp(hit.pubdate).unwrap_or_default();
        record.views = hit.play;
        record.danmaku = hit.video_review;
        record.author = hit.author.trim().to_string();
        record.cover_url = if hit.pic.is_empty() {
            String::new()
        } else {
            normalize_cover_url(&hit.pic)
        };
        if let Some(duration) = normalize_duration(&hit.duration) {
            record.duration = duration;
        }
        Ok(record)
    }
}
