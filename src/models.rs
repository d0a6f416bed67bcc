use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::hash::{Hash, Hasher};

pub const ID_PREFIX: &str = "BV";
pub const VIDEO_URL_BASE: &str = "https://www.bilibili.com/video/";

/// Platform video code, stored with its prefix normalized to `BV`.
///
/// The body keeps the case it was discovered with because the platform's URLs
/// are case-sensitive. Equality and hashing go through [`VideoId::key`], so
/// `bv1abc`, `BV1ABC` and `BV1abc` are the same identifier.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VideoId(String);

impl VideoId {
    /// Parse a raw code with or without the prefix. Returns `None` for empty
    /// or non-alphanumeric input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let body = strip_prefix_ci(trimmed);
        if body.is_empty() || !body.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self(format!("{}{}", ID_PREFIX, body)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical dedup key
    pub fn key(&self) -> String {
        canonical_key(&self.0)
    }

    pub fn video_url(&self) -> String {
        format!("{}{}", VIDEO_URL_BASE, self.0)
    }
}

impl PartialEq for VideoId {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Hash for VideoId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VideoId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        VideoId::parse(&value).ok_or_else(|| format!("invalid video identifier: {:?}", value))
    }
}

impl From<VideoId> for String {
    fn from(id: VideoId) -> Self {
        id.0
    }
}

fn strip_prefix_ci(s: &str) -> &str {
    if s.get(..2).is_some_and(|p| p.eq_ignore_ascii_case(ID_PREFIX)) {
        &s[2..]
    } else {
        s
    }
}

/// Case- and prefix-insensitive canonical form. Idempotent.
pub fn canonical_key(raw: &str) -> String {
    let body = strip_prefix_ci(raw.trim());
    format!("{}{}", ID_PREFIX, body.to_ascii_uppercase())
}

/// Normalized metadata for one video, produced once by a metadata source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub id: VideoId,
    pub url: String,
    pub title: String,
    pub description: String,
    /// YYYY-MM-DD, empty when no source could determine it
    pub publish_date: String,
    pub views: u64,
    pub danmaku: u64,
    pub author: String,
    pub cover_url: String,
    /// Local cover filename, only ever set by the asset downloader
    pub cover: Option<String>,
    pub duration: String,
    pub fetched_at: String,
}

impl MetadataRecord {
    /// Empty record for an identifier; every field takes its zero value
    pub fn empty(id: VideoId) -> Self {
        Self {
            url: id.video_url(),
            id,
            title: String::new(),
            description: String::new(),
            publish_date: String::new(),
            views: 0,
            danmaku: 0,
            author: String::new(),
            cover_url: String::new(),
            cover: None,
            duration: "00:00".to_string(),
            fetched_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Names of required fields that are still empty
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.title.is_empty() {
            missing.push("title");
        }
        if self.url.is_empty() {
            missing.push("url");
        }
        if self.author.is_empty() {
            missing.push("author");
        }
        missing
    }
}

/// One element of the persisted timeline artifact.
///
/// Fields the harvester does not know about are kept in `extra` and written
/// back unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimelineEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "videoUrl", default)]
    pub video_url: String,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub cover_url: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub bv: String,
    #[serde(default)]
    pub author: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TimelineEntry {
    /// Project a freshly fetched record into an entry carrying `tags`.
    ///
    /// `bv` and the default `cover` name keep the identifier as discovered
    /// (`BV` prefix, original body case) since the platform resolves URLs and
    /// CDN paths case-sensitively. Readers compare entries through
    /// [`canonical_key`], so the spelling never affects dedup.
    pub fn from_record(record: &MetadataRecord, tags: Vec<String>) -> Self {
        Self {
            id: String::new(),
            date: record.publish_date.clone(),
            title: record.title.clone(),
            video_url: record.url.clone(),
            cover: record
                .cover
                .clone()
                .unwrap_or_else(|| format!("{}.jpg", record.id)),
            cover_url: record.cover_url.clone(),
            tags,
            duration: record.duration.clone(),
            bv: record.id.to_string(),
            author: record.author.clone(),
            extra: Map::new(),
        }
    }

    /// Identifier of this entry, derived with the shared extraction rules
    pub fn identifier(&self) -> Option<VideoId> {
        crate::helpers::identifier_from_entry(self)
    }
}
