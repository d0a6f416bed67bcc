//! Helper functions shared by the fetcher, sync tracker and merger
//!
//! This module provides:
//! - Identifier extraction from URLs, cover filenames and artifact entries
//! - Date and duration normalization
//! - URL clean-up for remote cover images
//!
//! # Examples
//!
//! ```
//! use rust_video_harvester::helpers::{identifier_from_url, normalize_date};
//!
//! let id = identifier_from_url("https://www.bilibili.com/video/BV1XCffBPEj4?p=1");
//! assert_eq!(id.unwrap().as_str(), "BV1XCffBPEj4");
//!
//! assert_eq!(normalize_date("2024年1月2日").as_deref(), Some("2024-01-02"));
//! ```

use crate::models::{TimelineEntry, VideoId};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Platform-local offset used for unix timestamps (UTC+8)
const PLATFORM_OFFSET_SECS: i32 = 8 * 3600;

fn url_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"BV([0-9A-Za-z]+)").expect("valid identifier regex"))
}

/// Identifier embedded in a URL or arbitrary text
pub fn identifier_from_url(url: &str) -> Option<VideoId> {
    url_id_regex()
        .captures(url)
        .and_then(|c| c.get(1))
        .and_then(|m| VideoId::parse(m.as_str()))
}

/// Identifier embedded in a cover filename such as `BV1xx.webp` or a legacy
/// `/thumbs/1XCffBPEj4.jpg` path without the prefix.
pub fn identifier_from_cover(cover: &str) -> Option<VideoId> {
    let name = cover.rsplit('/').next().unwrap_or(cover);
    let stem = match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => return None,
    };
    if stem.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("BV")) {
        return VideoId::parse(stem);
    }
    // Bare codes are only trusted when they look like a full identifier body
    if stem.len() >= 10 && stem.chars().all(|c| c.is_ascii_alphanumeric()) {
        return VideoId::parse(stem);
    }
    None
}

/// The single identifier-derivation routine. Checks, in order: URL-embedded,
/// cover-filename-embedded, nested `video.bv`, top-level `bv`.
pub fn identifier_from_parts(
    video_url: Option<&str>,
    cover: Option<&str>,
    nested: Option<&Value>,
    bv: Option<&str>,
) -> Option<VideoId> {
    video_url
        .and_then(identifier_from_url)
        .or_else(|| cover.and_then(identifier_from_cover))
        .or_else(|| {
            nested
                .and_then(|v| v.get("bv"))
                .and_then(|v| v.as_str())
                .and_then(VideoId::parse)
        })
        .or_else(|| bv.and_then(VideoId::parse))
}

/// Identifier of a raw artifact element; non-objects yield `None`
pub fn identifier_from_value(item: &Value) -> Option<VideoId> {
    let obj = item.as_object()?;
    identifier_from_parts(
        obj.get("videoUrl").and_then(|v| v.as_str()),
        obj.get("cover").and_then(|v| v.as_str()),
        obj.get("video"),
        obj.get("bv").and_then(|v| v.as_str()),
    )
}

pub fn identifier_from_entry(entry: &TimelineEntry) -> Option<VideoId> {
    identifier_from_parts(
        Some(entry.video_url.as_str()),
        Some(entry.cover.as_str()),
        entry.extra.get("video"),
        Some(entry.bv.as_str()),
    )
}

/// Parse an identifier list file body: one id per line, `#` comments and
/// blank lines ignored, prefix optional. Duplicates are dropped in order.
pub fn parse_identifier_list(body: &str) -> Vec<VideoId> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let candidate = identifier_from_url(line).or_else(|| {
            line.split_whitespace().next().and_then(VideoId::parse)
        });
        if let Some(id) = candidate {
            if seen.insert(id.key()) {
                out.push(id);
            }
        }
    }
    out
}

/// Normalize a date string or unix timestamp to `YYYY-MM-DD`.
///
/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, RFC 3339, `YYYY年M月D日`,
/// `YYYY/MM/DD` and bare unix seconds.
pub fn normalize_date(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().all(|c| c.is_ascii_digit()) && s.len() >= 9 {
        return s.parse::<i64>().ok().and_then(date_from_timestamp);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.format("%Y-%m-%d").to_string());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.format("%Y-%m-%d").to_string());
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%Y年%m月%d日"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d.format("%Y-%m-%d").to_string());
        }
    }
    // Dates embedded in longer text, e.g. "2024-01-02 发布"
    static EMBEDDED: OnceLock<Regex> = OnceLock::new();
    let re = EMBEDDED.get_or_init(|| {
        Regex::new(r"(\d{4})[-/年](\d{1,2})[-/月](\d{1,2})").expect("valid date regex")
    });
    let caps = re.captures(s)?;
    let y = caps[1].parse::<i32>().ok()?;
    let m = caps[2].parse::<u32>().ok()?;
    let d = caps[3].parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(y, m, d).map(|d| d.format("%Y-%m-%d").to_string())
}

pub fn date_from_timestamp(secs: i64) -> Option<String> {
    if secs <= 0 {
        return None;
    }
    let offset = FixedOffset::east_opt(PLATFORM_OFFSET_SECS)?;
    offset
        .timestamp_opt(secs, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
}

/// Seconds to `MM:SS`, or `HH:MM:SS` once an hour is reached
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// Normalize `M:SS`, `H:MM:SS`, ISO-8601 `PT1H2M3S` or bare seconds
pub fn normalize_duration(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Some(format_duration(secs));
    }
    if let Some(iso) = s.strip_prefix("PT").or_else(|| s.strip_prefix("pt")) {
        let mut total = 0u64;
        let mut num = String::new();
        for c in iso.chars() {
            if c.is_ascii_digit() {
                num.push(c);
                continue;
            }
            let n: u64 = num.parse().ok()?;
            num.clear();
            total += match c.to_ascii_uppercase() {
                'H' => n * 3600,
                'M' => n * 60,
                'S' => n,
                _ => return None,
            };
        }
        return Some(format_duration(total));
    }
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    let mut total = 0u64;
    for part in parts {
        total = total * 60 + part.trim().parse::<u64>().ok()?;
    }
    Some(format_duration(total))
}

/// Upgrade protocol-relative or schemeless URLs to https
pub fn ensure_https(url: &str) -> String {
    let url = url.trim();
    if url.is_empty() {
        return String::new();
    }
    if let Some(rest) = url.strip_prefix("//") {
        return format!("https://{}", rest);
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    format!("https://{}", url.trim_start_matches(':').trim_start_matches('/'))
}

/// Clean a remote cover URL: explicit scheme, no `@...` resize suffix
pub fn normalize_cover_url(url: &str) -> String {
    let upgraded = ensure_https(url);
    match upgraded.find('@') {
        Some(idx) if upgraded[..idx].contains('/') => upgraded[..idx].to_string(),
        _ => upgraded,
    }
}

/// Remove highlight markup like `<em class="keyword">` and decode the common
/// entities the search endpoint returns.
pub fn strip_html_tags(s: &str) -> String {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    let re = TAGS.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));
    re.replace_all(s, "")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .trim()
        .to_string()
}

/// Page titles carry a platform suffix that is not part of the video title
pub fn clean_page_title(title: &str) -> String {
    title
        .trim()
        .trim_end_matches("_哔哩哔哩_bilibili")
        .trim()
        .to_string()
}
