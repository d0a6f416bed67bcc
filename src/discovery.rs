//! Enumerating the identifiers that belong to a curated collection
//!
//! The structured favourites endpoint is tried first, page by page. If it
//! fails or the collection URL carries no numeric id, the collection page is
//! rendered and scraped for video links instead.

use crate::config::DataTypeConfig;
use crate::error::{FetchError, HarvestError};
use crate::helpers::parse_identifier_list;
use crate::http_client::EnhancedHttpClient;
use crate::models::VideoId;
use crate::sources::{ApiEnvelope, API_BASE_URL};
use crate::throttle::RequestThrottle;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, OnceLock};

const FAVORITES_PATH: &str = "/x/v3/fav/resource/list";
const PAGE_SIZE: u32 = 20;
/// Hard stop in case the endpoint never reports the end of the list
const MAX_PAGES: u32 = 500;

/// Produces the identifiers a data type should consider this run
#[async_trait]
pub trait Discover: Send + Sync {
    async fn discover(&self, data_type: &DataTypeConfig) -> Result<Vec<VideoId>, HarvestError>;
}

/// Returns the markup of a page after rendering
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String, FetchError>;
}

/// Renderer for pages whose links are present in the served HTML
pub struct HttpPageRenderer {
    client: Arc<EnhancedHttpClient>,
}

impl HttpPageRenderer {
    pub fn new(client: Arc<EnhancedHttpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageRenderer for HttpPageRenderer {
    async fn render(&self, url: &str) -> Result<String, FetchError> {
        self.client.get_text(url).await
    }
}

#[derive(Debug, Deserialize)]
struct FavoritesPage {
    #[serde(default)]
    info: Option<FavoritesInfo>,
    #[serde(default)]
    medias: Option<Vec<FavoriteMedia>>,
    #[serde(default)]
    has_more: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct FavoritesInfo {
    #[serde(default)]
    media_count: usize,
}

#[derive(Debug, Deserialize)]
struct FavoriteMedia {
    #[serde(default)]
    bvid: String,
}

/// Numeric favourites id from `...?fid=123`, `/favlist/123` or `ml123`
pub fn collection_media_id(url: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r"(?:[?&]fid=|/favlist/|/ml)(\d+)").ok())
        .as_ref()?;
    re.captures(url)?.get(1).map(|m| m.as_str().to_string())
}

/// Every distinct video link in a rendered page, in order of appearance
pub fn scrape_video_links(html: &str) -> Vec<VideoId> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = RE
        .get_or_init(|| Regex::new(r"/video/(BV[0-9A-Za-z]+)").ok())
        .as_ref()
    else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    re.captures_iter(html)
        .filter_map(|c| c.get(1))
        .filter_map(|m| VideoId::parse(m.as_str()))
        .filter(|id| seen.insert(id.key()))
        .collect()
}

/// Identifier list file; a missing file contributes nothing
pub fn load_identifier_file(path: &Path) -> Result<Vec<VideoId>, HarvestError> {
    match std::fs::read_to_string(path) {
        Ok(body) => {
            let ids = parse_identifier_list(&body);
            log::info!("Loaded {} identifiers from {}", ids.len(), path.display());
            Ok(ids)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::warn!("Identifier file {} not found", path.display());
            Ok(Vec::new())
        }
        Err(e) => Err(HarvestError::Discovery(format!(
            "cannot read {}: {}",
            path.display(),
            e
        ))),
    }
}

pub struct CollectionDiscoverer {
    client: Arc<EnhancedHttpClient>,
    throttle: Arc<RequestThrottle>,
    renderer: Box<dyn PageRenderer>,
    api_base: String,
}

impl CollectionDiscoverer {
    pub fn new(
        client: Arc<EnhancedHttpClient>,
        throttle: Arc<RequestThrottle>,
        renderer: Box<dyn PageRenderer>,
    ) -> Self {
        Self::with_api_base(client, throttle, renderer, API_BASE_URL)
    }

    pub fn with_api_base(
        client: Arc<EnhancedHttpClient>,
        throttle: Arc<RequestThrottle>,
        renderer: Box<dyn PageRenderer>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            client,
            throttle,
            renderer,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Members of one collection: structured endpoint first, page scrape second
    pub async fn discover_collection(&self, url: &str) -> Result<Vec<VideoId>, HarvestError> {
        if let Some(media_id) = collection_media_id(url) {
            match self.fetch_all_pages(&media_id).await {
                Ok(ids) if !ids.is_empty() => {
                    log::info!("Favourites endpoint listed {} videos for {}", ids.len(), media_id);
                    return Ok(ids);
                }
                Ok(_) => log::warn!("Favourites endpoint returned nothing for {}", media_id),
                Err(e) => log::warn!("Favourites endpoint failed for {}: {}", media_id, e),
            }
        } else {
            log::info!("No favourites id in {}, scraping the page", url);
        }

        self.throttle.wait(0).await;
        match self.renderer.render(url).await {
            Ok(html) => {
                self.throttle.record_success();
                let ids = scrape_video_links(&html);
                log::info!("Scraped {} videos from {}", ids.len(), url);
                Ok(ids)
            }
            Err(e) => {
                self.throttle.record_failure();
                Err(HarvestError::Discovery(format!("{}: {}", url, e)))
            }
        }
    }

    async fn fetch_all_pages(&self, media_id: &str) -> Result<Vec<VideoId>, FetchError> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for page in 1..=MAX_PAGES {
            self.throttle.wait(0).await;
            let url = format!(
                "{}{}?media_id={}&pn={}&ps={}&platform=web",
                self.api_base, FAVORITES_PATH, media_id, page, PAGE_SIZE
            );
            let value = match self.client.get_json(&url).await {
                Ok(value) => value,
                Err(e) => {
                    self.throttle.record_failure();
                    return Err(e);
                }
            };
            self.throttle.record_success();
            let envelope: ApiEnvelope<FavoritesPage> = serde_json::from_value(value)?;
            let data = envelope.into_data(&format!("favourites {} page {}", media_id, page))?;

            let medias = data.medias.unwrap_or_default();
            if medias.is_empty() {
                break;
            }
            for media in medias {
                if let Some(id) = VideoId::parse(&media.bvid) {
                    if seen.insert(id.key()) {
                        ids.push(id);
                    }
                }
            }
            let total = data.info.map(|i| i.media_count).unwrap_or(0);
            if data.has_more == Some(false) || (total > 0 && ids.len() >= total) {
                break;
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl Discover for CollectionDiscoverer {
    /// Collection members followed by any extra identifiers from the list
    /// file, without duplicates.
    async fn discover(&self, data_type: &DataTypeConfig) -> Result<Vec<VideoId>, HarvestError> {
        let mut ids = Vec::new();
        let mut failure = None;

        if let Some(url) = &data_type.collection_url {
            match self.discover_collection(url).await {
                Ok(found) => ids.extend(found),
                Err(e) => failure = Some(e),
            }
        }
        if let Some(path) = &data_type.identifier_file {
            ids.extend(load_identifier_file(path)?);
        }

        // A broken collection is fatal only when nothing else supplied ids
        if let Some(e) = failure {
            if ids.is_empty() {
                return Err(e);
            }
            log::warn!("{}: continuing with identifier file only: {}", data_type.name, e);
        }

        let mut seen = HashSet::new();
        ids.retain(|id| seen.insert(id.key()));
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_media_id() {
        assert_eq!(
            collection_media_id("https://space.bilibili.com/4176573/favlist?fid=3390448373&ftype=create").as_deref(),
            Some("3390448373")
        );
        assert_eq!(collection_media_id("https://www.bilibili.com/medialist/detail/ml42").as_deref(), Some("42"));
        assert!(collection_media_id("https://space.bilibili.com/4176573").is_none());
    }

    #[test]
    fn test_scrape_video_links() {
        let html = r#"<a href="//www.bilibili.com/video/BV1aaaaaaaaa/">x</a>
            <a href="https://www.bilibili.com/video/BV1bbbbbbbbb?p=1">y</a>
            <a href="/video/BV1aaaaaaaaa">dup</a>"#;
        let ids: Vec<String> = scrape_video_links(html).iter().map(|i| i.to_string()).collect();
        assert_eq!(ids, vec!["BV1aaaaaaaaa", "BV1bbbbbbbbb"]);
    }

    #[test]
    fn test_load_identifier_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bv.txt");
        std::fs::write(&path, "# launch streams\nBV111\n\n222\n").unwrap();
        let ids = load_identifier_file(&path).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(load_identifier_file(&dir.path().join("missing.txt")).unwrap().is_empty());
    }
}
