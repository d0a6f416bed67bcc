use super::{ApiEnvelope, MetadataSource, API_BASE_URL};
use crate::error::FetchError;
use crate::helpers::{date_from_timestamp, format_duration, normalize_cover_url};
use crate::http_client::EnhancedHttpClient;
use crate::models::{MetadataRecord, VideoId};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

const DETAIL_PATH: &str = "/x/web-interface/wbi/view/detail";

#[derive(Debug, Deserialize)]
struct DetailData {
    #[serde(rename = "View")]
    view: Option<ViewData>,
}

#[derive(Debug, Deserialize)]
struct ViewData {
    #[serde(default)]
    bvid: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    desc: String,
    #[serde(default)]
    pubdate: i64,
    #[serde(default)]
    pic: String,
    #[serde(default)]
    duration: u64,
    #[serde(default)]
    stat: Stat,
    #[serde(default)]
    owner: Owner,
}

#[derive(Debug, Default, Deserialize)]
struct Stat {
    #[serde(default)]
    view: u64,
    #[serde(default)]
    danmaku: u64,
}

#[derive(Debug, Default, Deserialize)]
struct Owner {
    #[serde(default)]
    name: String,
}

/// Per-video detail endpoint
pub struct DetailSource {
    client: Arc<EnhancedHttpClient>,
    base_url: String,
}

impl DetailSource {
    pub fn new(client: Arc<EnhancedHttpClient>) -> Self {
        Self::with_base_url(client, API_BASE_URL)
    }

    pub fn with_base_url(client: Arc<EnhancedHttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn detail_url(&self, id: &VideoId) -> String {
        format!(
            "{}{}?bvid={}&need_view=1",
            self.base_url,
            DETAIL_PATH,
            urlencoding::encode(id.as_str())
        )
    }
}

#[async_trait]
impl MetadataSource for DetailSource {
    fn name(&self) -> &str {
        "detail"
    }

    async fn fetch(&self, id: &VideoId) -> Result<MetadataRecord, FetchError> {
        let url = self.detail_url(id);
        let value = self.client.get_json(&url).await?;
        let envelope: ApiEnvelope<DetailData> = serde_json::from_value(value)?;
        let view = envelope
            .into_data(&format!("detail {}", id))?
            .view
            .ok_or_else(|| FetchError::Malformed(format!("detail {}: no View object", id)))?;

        if !view.bvid.is_empty() && VideoId::parse(&view.bvid).as_ref() != Some(id) {
            return Err(FetchError::Malformed(format!(
                "detail {}: response describes {}",
                id, view.bvid
            )));
        }

        let mut record = MetadataRecord::empty(id.clone());
        record.title = view.title.trim().to_string();
        record.description = view.desc.trim().to_string();
        record.publish_date = date_from_timestamp(view.pubdate).unwrap_or_default();
        record.views = view.stat.view;
        record.danmaku = view.stat.danmaku;
        record.author = view.owner.name.trim().to_string();
        record.cover_url = if view.pic.is_empty() {
            String::new()
        } else {
            normalize_cover_url(&view.pic)
        };
        record.duration = format_duration(view.duration);
        Ok(record)
    }
}
