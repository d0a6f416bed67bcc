//! Timeline artifact: merging new records and persisting the result

use crate::error::HarvestError;
use crate::helpers::normalize_date;
use crate::models::{MetadataRecord, TimelineEntry};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub struct TimelineMerger;

impl TimelineMerger {
    /// Combine existing entries with freshly fetched records.
    ///
    /// Tags curated on an existing entry carry over to a new record with the
    /// same identifier. Existing entries win on duplicates. The result is
    /// sorted newest first and renumbered `"1"..="N"`.
    pub fn merge(existing: Vec<TimelineEntry>, new: &[MetadataRecord]) -> Vec<TimelineEntry> {
        let mut tags_by_key: HashMap<String, Vec<String>> = HashMap::new();
        for entry in &existing {
            if let Some(id) = entry.identifier() {
                tags_by_key.entry(id.key()).or_insert_with(|| entry.tags.clone());
            }
        }

        let fresh = new.iter().map(|record| {
            let tags = tags_by_key.get(&record.id.key()).cloned().unwrap_or_default();
            TimelineEntry::from_record(record, tags)
        });

        let mut seen = HashSet::new();
        let mut merged: Vec<TimelineEntry> = existing
            .into_iter()
            .chain(fresh)
            .filter(|entry| match entry.identifier() {
                Some(id) => seen.insert(id.key()),
                None => true,
            })
            .collect();

        for entry in &mut merged {
            if let Some(date) = normalize_date(&entry.date) {
                entry.date = date;
            }
        }
        // Stable: equal dates keep their existing-before-new order
        merged.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));

        for (i, entry) in merged.iter_mut().enumerate() {
            entry.id = (i + 1).to_string();
        }
        merged
    }

    /// Read the artifact. A missing file is an empty timeline; anything
    /// unreadable is an error so it never gets overwritten.
    pub fn load_artifact(path: &Path) -> Result<Vec<TimelineEntry>, HarvestError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(HarvestError::Persistence(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let items: Vec<Value> = serde_json::from_str(&content).map_err(|e| {
            HarvestError::Persistence(format!("{} is not a JSON array: {}", path.display(), e))
        })?;
        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value(item).map_err(|e| {
                    HarvestError::Persistence(format!(
                        "{} entry {} is not a timeline object: {}",
                        path.display(),
                        i,
                        e
                    ))
                })
            })
            .collect()
    }

    /// Write the artifact via a sibling temp file and rename
    pub fn save_artifact(path: &Path, entries: &[TimelineEntry]) -> Result<(), HarvestError> {
        let persist = |e: std::io::Error| {
            HarvestError::Persistence(format!("cannot write {}: {}", path.display(), e))
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(persist)?;
        }
        let mut body = serde_json::to_string_pretty(entries)
            .map_err(|e| HarvestError::Persistence(e.to_string()))?;
        body.push('\n');

        let tmp = temp_path(path);
        fs::write(&tmp, body).map_err(persist)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(persist(e));
        }
        log::info!("Wrote {} entries to {}", entries.len(), path.display());
        Ok(())
    }
}

/// Unparseable dates sort after every real date
fn sort_key(entry: &TimelineEntry) -> (bool, String) {
    match normalize_date(&entry.date) {
        Some(date) => (true, date),
        None => (false, String::new()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "timeline.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}
