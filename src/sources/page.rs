use super::{MetadataSource, WEB_BASE_URL};
use crate::error::FetchError;
use crate::helpers::{
    clean_page_title, date_from_timestamp, format_duration, normalize_cover_url, normalize_date,
    normalize_duration,
};
use crate::http_client::EnhancedHttpClient;
use crate::models::{MetadataRecord, VideoId};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::sync::{Arc, OnceLock};

/// Rendered video page. Any page that loads produces a record; fields the
/// page does not expose stay empty.
pub struct PageSource {
    client: Arc<EnhancedHttpClient>,
    base_url: String,
}

impl PageSource {
    pub fn new(client: Arc<EnhancedHttpClient>) -> Self {
        Self::with_base_url(client, WEB_BASE_URL)
    }

    pub fn with_base_url(client: Arc<EnhancedHttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MetadataSource for PageSource {
    fn name(&self) -> &str {
        "page"
    }

    async fn fetch(&self, id: &VideoId) -> Result<MetadataRecord, FetchError> {
        let url = format!("{}/video/{}", self.base_url, id);
        let html = self.client.get_text(&url).await?;
        Ok(parse_video_page(&html, id))
    }
}

/// Extract every field with the first strategy that yields a value:
/// meta tags, then JSON-LD, then raw regex over embedded state.
pub fn parse_video_page(html: &str, id: &VideoId) -> MetadataRecord {
    let doc = Html::parse_document(html);
    let ld = json_ld_video(&doc);
    let ld = ld.as_ref();

    let mut record = MetadataRecord::empty(id.clone());

    record.title = meta(&doc, &["og:title", "title"])
        .or_else(|| select_text(&doc, "h1.video-title"))
        .or_else(|| select_text(&doc, "title"))
        .map(|t| clean_page_title(&t))
        .filter(|t| !t.is_empty())
        .or_else(|| ld_str(ld, "name"))
        .or_else(|| json_string_field(html, "title"))
        .unwrap_or_default();

    record.description = meta(&doc, &["og:description", "description"])
        .or_else(|| ld_str(ld, "description"))
        .or_else(|| json_string_field(html, "desc"))
        .unwrap_or_default();

    record.publish_date = meta(&doc, &["uploadDate", "datePublished", "article:published_time"])
        .and_then(|d| normalize_date(&d))
        .or_else(|| ld_str(ld, "uploadDate").and_then(|d| normalize_date(&d)))
        .or_else(|| json_number_field(html, "pubdate").and_then(|n| date_from_timestamp(n as i64)))
        .unwrap_or_default();

    record.views = json_number_field(html, "view").unwrap_or(0);
    record.danmaku = json_number_field(html, "danmaku").unwrap_or(0);

    record.author = meta(&doc, &["author"])
        .or_else(|| ld_author(ld))
        .or_else(|| owner_name(html))
        .unwrap_or_default();

    record.cover_url = meta(&doc, &["og:image", "twitter:image", "image"])
        .or_else(|| ld_thumbnail(ld))
        .or_else(|| json_string_field(html, "pic"))
        .map(|u| normalize_cover_url(&u))
        .unwrap_or_default();

    if let Some(duration) = meta(&doc, &["duration"])
        .and_then(|d| normalize_duration(&d))
        .or_else(|| ld_str(ld, "duration").and_then(|d| normalize_duration(&d)))
        .or_else(|| json_number_field(html, "duration").map(format_duration))
    {
        record.duration = duration;
    }

    record
}

/// First non-empty `content` of a meta tag matched by property, name or itemprop
fn meta(doc: &Html, keys: &[&str]) -> Option<String> {
    static META: OnceLock<Option<Selector>> = OnceLock::new();
    let selector = META.get_or_init(|| Selector::parse("meta").ok()).as_ref()?;
    for key in keys {
        let found = doc.select(selector).find_map(|el| {
            let attrs = el.value();
            let matches = ["property", "name", "itemprop"]
                .iter()
                .any(|attr| attrs.attr(attr) == Some(*key));
            if !matches {
                return None;
            }
            attrs
                .attr("content")
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
        });
        if found.is_some() {
            return found;
        }
    }
    None
}

fn select_text(doc: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    doc.select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// The first JSON-LD block describing a VideoObject
fn json_ld_video(doc: &Html) -> Option<Value> {
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;
    doc.select(&selector)
        .filter_map(|el| serde_json::from_str::<Value>(&el.text().collect::<String>()).ok())
        .flat_map(|v| match v {
            Value::Array(items) => items,
            other => vec![other],
        })
        .find(|v| v.get("@type").and_then(Value::as_str) == Some("VideoObject"))
}

fn ld_str(ld: Option<&Value>, key: &str) -> Option<String> {
    ld?.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn ld_author(ld: Option<&Value>) -> Option<String> {
    let author = ld?.get("author")?;
    let first = match author {
        Value::Array(items) => items.first()?,
        other => other,
    };
    match first {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(|s| s.trim().to_string()),
        _ => None,
    }
    .filter(|s| !s.is_empty())
}

fn ld_thumbnail(ld: Option<&Value>) -> Option<String> {
    match ld?.get("thumbnailUrl")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
    .filter(|s| !s.is_empty())
}

/// `"field":"value"` in embedded page state, with JSON escapes decoded
fn json_string_field(html: &str, field: &str) -> Option<String> {
    let pattern = format!(r#""{}"\s*:\s*"((?:[^"\\]|\\.)*)""#, regex::escape(field));
    let re = Regex::new(&pattern).ok()?;
    let found = re
        .captures_iter(html)
        .filter_map(|c| c.get(1))
        .map(|m| {
            serde_json::from_str::<String>(&format!("\"{}\"", m.as_str()))
                .unwrap_or_else(|_| m.as_str().to_string())
        })
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty());
    found
}

fn json_number_field(html: &str, field: &str) -> Option<u64> {
    let pattern = format!(r#""{}"\s*:\s*(\d+)"#, regex::escape(field));
    let re = Regex::new(&pattern).ok()?;
    let digits = re.captures(html)?.get(1)?.as_str().to_string();
    digits.parse().ok()
}

fn owner_name(html: &str) -> Option<String> {
    static OWNER: OnceLock<Option<Regex>> = OnceLock::new();
    let re = OWNER
        .get_or_init(|| Regex::new(r#""owner"\s*:\s*\{[^}]*?"name"\s*:\s*"((?:[^"\\]|\\.)*)""#).ok())
        .as_ref()?;
    let raw = re.captures(html)?.get(1)?.as_str();
    serde_json::from_str::<String>(&format!("\"{}\"", raw))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
