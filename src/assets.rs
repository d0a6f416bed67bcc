//! Cover image downloader
//!
//! A missing local file is the only reason to download. The cover directory
//! is listed once per run; workers then consult and update that shared index,
//! so the same cover is never fetched twice.

use crate::error::{FetchError, HarvestError};
use crate::helpers::ensure_https;
use crate::http_client::EnhancedHttpClient;
use crate::models::{canonical_key, TimelineEntry, VideoId};
use crate::throttle::RequestThrottle;
use crate::timeline::TimelineMerger;
use futures::stream::{self, StreamExt};
use image::{DynamicImage, ImageFormat, ImageReader, Rgb, RgbImage};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Extensions recognised as an existing cover, most preferred first
pub const COVER_EXTENSIONS: &[&str] = &["webp", "jpg", "jpeg", "png"];

#[derive(Debug, Clone)]
pub struct AssetConfig {
    pub max_workers: usize,
    pub enable_transcode: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            enable_transcode: true,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOutcome {
    Downloaded(String),
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssetSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Entries whose cover field was rewritten
    pub relinked: usize,
}

struct CoverIndex {
    /// canonical key -> filename present on disk
    files: HashMap<String, String>,
    in_flight: HashSet<String>,
}

/// List the cover directory once: webp beats other formats, empty files
/// do not count.
pub fn scan_cover_dir(dir: &Path) -> HashMap<String, String> {
    let mut found: HashMap<String, String> = HashMap::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return found,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let (Some(stem), Some(ext)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|s| s.to_str()),
        ) else {
            continue;
        };
        let ext = ext.to_ascii_lowercase();
        let Some(rank) = COVER_EXTENSIONS.iter().position(|e| *e == ext) else {
            continue;
        };
        if entry.metadata().map(|m| m.len() == 0).unwrap_or(true) {
            continue;
        }
        if VideoId::parse(stem).is_none() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let key = canonical_key(stem);
        let better = match found.get(&key) {
            Some(current) => rank < extension_rank(current),
            None => true,
        };
        if better {
            found.insert(key, name);
        }
    }
    found
}

fn extension_rank(filename: &str) -> usize {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(|e| {
            COVER_EXTENSIONS
                .iter()
                .position(|c| c.eq_ignore_ascii_case(e))
        })
        .unwrap_or(usize::MAX)
}

/// Extension of the remote file, `jpg` when the URL does not say
fn remote_extension(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    let ext = last.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("webp") => "webp",
        Some("png") => "png",
        Some("jpeg") => "jpeg",
        _ => "jpg",
    }
}

/// Decode any supported format, flatten transparency onto white, write WebP
pub fn transcode_to_webp(src: &Path, dst: &Path) -> Result<(), String> {
    let img = ImageReader::open(src)
        .map_err(|e| e.to_string())?
        .with_guessed_format()
        .map_err(|e| e.to_string())?
        .decode()
        .map_err(|e| e.to_string())?;
    let flattened = flatten_on_white(&img);
    DynamicImage::ImageRgb8(flattened)
        .save_with_format(dst, ImageFormat::WebP)
        .map_err(|e| e.to_string())
}

fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let alpha = px[3] as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(px[0]), blend(px[1]), blend(px[2])]));
    }
    out
}

struct CoverJob {
    id: VideoId,
    cover_url: String,
    indices: Vec<usize>,
}

pub struct AssetDownloader {
    client: Arc<EnhancedHttpClient>,
    throttle: Arc<RequestThrottle>,
    config: AssetConfig,
}

impl AssetDownloader {
    /// Every download attempt waits on `throttle`, the pacer metadata fetches use
    pub fn new(
        client: Arc<EnhancedHttpClient>,
        throttle: Arc<RequestThrottle>,
        config: AssetConfig,
    ) -> Self {
        Self {
            client,
            throttle,
            config,
        }
    }

    /// Fill missing covers for the artifact and persist any relinked entries
    pub async fn sync_artifact(
        &self,
        artifact: &Path,
        cover_dir: &Path,
    ) -> Result<AssetSummary, HarvestError> {
        let mut entries = TimelineMerger::load_artifact(artifact)?;
        let summary = self.fill_covers(&mut entries, cover_dir).await?;
        if summary.relinked > 0 {
            TimelineMerger::save_artifact(artifact, &entries)?;
        }
        Ok(summary)
    }

    /// Make sure every identifiable entry has a local cover and that its
    /// `cover` field names the file actually on disk.
    pub async fn fill_covers(
        &self,
        entries: &mut [TimelineEntry],
        cover_dir: &Path,
    ) -> Result<AssetSummary, HarvestError> {
        std::fs::create_dir_all(cover_dir).map_err(|e| {
            HarvestError::Persistence(format!("cannot create {}: {}", cover_dir.display(), e))
        })?;
        let index = Mutex::new(CoverIndex {
            files: scan_cover_dir(cover_dir),
            in_flight: HashSet::new(),
        });

        let mut jobs: Vec<CoverJob> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            let Some(id) = entry.identifier() else { continue };
            match by_key.get(&id.key()) {
                Some(&job) => jobs[job].indices.push(i),
                None => {
                    by_key.insert(id.key(), jobs.len());
                    jobs.push(CoverJob {
                        id,
                        cover_url: entry.cover_url.clone(),
                        indices: vec![i],
                    });
                }
            }
        }

        let results: Vec<(Vec<usize>, AssetOutcome)> = stream::iter(jobs)
            .map(|job| {
                let index = &index;
                async move {
                    let outcome = self.process(&job.id, &job.cover_url, cover_dir, index).await;
                    (job.indices, outcome)
                }
            })
            .buffer_unordered(self.config.max_workers.max(1))
            .collect()
            .await;

        let mut summary = AssetSummary::default();
        for (indices, outcome) in results {
            let filename = match outcome {
                AssetOutcome::Downloaded(name) => {
                    summary.downloaded += 1;
                    name
                }
                AssetOutcome::Skipped(name) => {
                    summary.skipped += 1;
                    name
                }
                AssetOutcome::Failed(reason) => {
                    summary.failed += 1;
                    log::warn!("Cover failed: {}", reason);
                    continue;
                }
            };
            for i in indices {
                if entries[i].cover != filename {
                    entries[i].cover = filename.clone();
                    summary.relinked += 1;
                }
            }
        }

        log::info!(
            "Covers in {}: {} downloaded, {} skipped, {} failed, {} relinked",
            cover_dir.display(),
            summary.downloaded,
            summary.skipped,
            summary.failed,
            summary.relinked
        );
        Ok(summary)
    }

    async fn process(
        &self,
        id: &VideoId,
        cover_url: &str,
        dir: &Path,
        index: &Mutex<CoverIndex>,
    ) -> AssetOutcome {
        let key = id.key();
        {
            let mut idx = index.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = idx.files.get(&key) {
                return AssetOutcome::Skipped(existing.clone());
            }
            if !idx.in_flight.insert(key.clone()) {
                return AssetOutcome::Failed(format!("{} already being downloaded", id));
            }
        }

        let outcome = self.download(id, cover_url, dir).await;

        let mut idx = index.lock().unwrap_or_else(PoisonError::into_inner);
        idx.in_flight.remove(&key);
        match outcome {
            Ok(filename) => {
                idx.files.insert(key, filename.clone());
                AssetOutcome::Downloaded(filename)
            }
            Err(reason) => AssetOutcome::Failed(format!("{}: {}", id, reason)),
        }
    }

    async fn download(&self, id: &VideoId, cover_url: &str, dir: &Path) -> Result<String, String> {
        if cover_url.trim().is_empty() {
            return Err("no remote cover url".to_string());
        }
        let url = ensure_https(cover_url);
        let bytes = self.fetch_with_retry(&url).await.map_err(|e| e.to_string())?;
        if bytes.is_empty() {
            return Err(format!("empty body from {}", url));
        }

        let ext = remote_extension(&url);
        let original = format!("{}.{}", id, ext);
        let temp = dir.join(format!("{}.part", original));
        tokio::fs::write(&temp, &bytes)
            .await
            .map_err(|e| format!("cannot write {}: {}", temp.display(), e))?;

        if self.config.enable_transcode {
            let webp = format!("{}.webp", id);
            let src = temp.clone();
            let dst_temp = dir.join(format!("{}.part", webp));
            let dst = dir.join(&webp);
            let converted = tokio::task::spawn_blocking(move || {
                transcode_to_webp(&src, &dst_temp)?;
                std::fs::rename(&dst_temp, &dst).map_err(|e| e.to_string())
            })
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r);
            match converted {
                Ok(()) => {
                    let _ = tokio::fs::remove_file(&temp).await;
                    log::debug!("Saved {}", webp);
                    return Ok(webp);
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(dir.join(format!("{}.part", webp))).await;
                    log::warn!("Transcode failed for {}, keeping {}: {}", id, original, e);
                }
            }
        }

        finalize(&temp, &dir.join(&original)).await?;
        log::debug!("Saved {}", original);
        Ok(original)
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let attempts = self.config.max_retries.max(1);
        let mut attempt = 0;
        loop {
            self.throttle.wait(attempt).await;
            attempt += 1;
            match self.client.get_bytes(url).await {
                Ok(bytes) => {
                    self.throttle.record_success();
                    return Ok(bytes);
                }
                Err(e) if e.is_retryable() || matches!(e, FetchError::RateLimited(_)) => {
                    self.throttle.record_failure();
                    if attempt >= attempts {
                        return Err(e);
                    }
                    log::warn!("Cover download attempt {}/{} for {} failed: {}", attempt, attempts, url, e);
                    tokio::time::sleep(self.config.retry_delay * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn finalize(temp: &Path, dst: &Path) -> Result<(), String> {
    tokio::fs::rename(temp, dst)
        .await
        .map_err(|e| format!("cannot move {} into place: {}", temp.display(), e))
}
