use crate::app_state::AppState;
use crate::assets::{AssetConfig, AssetDownloader, AssetSummary};
use crate::config::DataTypeConfig;
use crate::discovery::{CollectionDiscoverer, Discover, HttpPageRenderer};
use crate::error::HarvestError;
use crate::fetcher::{FetchPolicy, MetadataFetcher};
use crate::metrics::MetricsTracker;
use crate::sources::detail::DetailSource;
use crate::sources::page::PageSource;
use crate::sources::search::SearchSource;
use crate::sources::MetadataSource;
use crate::sync_state::SyncStateTracker;
use crate::timeline::TimelineMerger;
use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default, Serialize, Clone)]
pub struct DataTypeProgress {
    pub name: String,
    pub discovered: usize,
    pub already_processed: usize,
    pub fetched: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct CrawlProgress {
    pub in_progress: bool,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub current_data_type: Option<String>,
    pub data_types: Vec<DataTypeProgress>,
    pub error: Option<String>,
}

/// Outcome of one data type
#[derive(Debug, Default, Serialize, Clone, PartialEq, Eq)]
pub struct DataTypeReport {
    pub name: String,
    pub discovered: usize,
    pub already_processed: usize,
    pub fetched: usize,
    pub failed: usize,
    /// Entries in the artifact after the merge
    pub total_entries: usize,
    pub artifact_written: bool,
    pub assets: Option<AssetSummary>,
}

/// The harvest pipeline: discover, filter, fetch, merge, save, fill covers
pub struct Harvester {
    discoverer: Box<dyn Discover>,
    fetcher: MetadataFetcher,
    sync_state: Arc<SyncStateTracker>,
    assets: Option<AssetDownloader>,
    metrics: MetricsTracker,
    progress: Arc<Mutex<CrawlProgress>>,
}

impl Harvester {
    pub fn new(
        discoverer: Box<dyn Discover>,
        fetcher: MetadataFetcher,
        sync_state: Arc<SyncStateTracker>,
        assets: Option<AssetDownloader>,
        metrics: MetricsTracker,
    ) -> Self {
        Self {
            discoverer,
            fetcher,
            sync_state,
            assets,
            metrics,
            progress: Arc::new(Mutex::new(CrawlProgress::default())),
        }
    }

    /// Wire the standard sources and discoverer around shared run state
    pub fn from_state(state: &AppState) -> Self {
        let sources: Vec<Box<dyn MetadataSource>> = vec![
            Box::new(SearchSource::new(state.client.clone())),
            Box::new(DetailSource::new(state.client.clone())),
            Box::new(PageSource::new(state.client.clone())),
        ];
        let fetcher = MetadataFetcher::new(
            sources,
            state.throttle.clone(),
            state.metrics.clone(),
            FetchPolicy {
                max_retries: state.config.fetch.max_retries,
                max_rate_limit_retries: state.config.fetch.max_rate_limit_retries,
            },
        );
        let discoverer = CollectionDiscoverer::new(
            state.client.clone(),
            state.throttle.clone(),
            Box::new(HttpPageRenderer::new(state.client.clone())),
        );
        let assets = state.config.assets.enabled.then(|| {
            AssetDownloader::new(
                state.client.clone(),
                state.throttle.clone(),
                AssetConfig {
                    max_workers: state.config.assets.max_workers,
                    enable_transcode: state.config.assets.enable_transcode,
                    max_retries: state.config.fetch.max_retries,
                    retry_delay: state.config.fetch.retry_delay(),
                },
            )
        });

        let mut harvester = Self::new(
            Box::new(discoverer),
            fetcher,
            state.sync_state.clone(),
            assets,
            state.metrics.clone(),
        );
        harvester.progress = state.crawl_progress.clone();
        harvester
    }

    pub fn progress(&self) -> CrawlProgress {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_progress(&self, f: impl FnOnce(&mut CrawlProgress)) {
        let mut p = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut p);
    }

    fn update_current(&self, f: impl FnOnce(&mut DataTypeProgress)) {
        self.update_progress(|p| {
            if let Some(current) = p.data_types.last_mut() {
                f(current);
            }
        });
    }

    pub async fn run_data_type(&self, dt: &DataTypeConfig) -> Result<DataTypeReport, HarvestError> {
        info!("=== Harvesting {} ===", dt.name);
        self.update_progress(|p| {
            p.current_data_type = Some(dt.name.clone());
            p.data_types.push(DataTypeProgress {
                name: dt.name.clone(),
                ..DataTypeProgress::default()
            });
        });
        let mut report = DataTypeReport {
            name: dt.name.clone(),
            ..DataTypeReport::default()
        };

        let ids = self.discoverer.discover(dt).await?;
        report.discovered = ids.len();
        // Unreadable artifacts stop this data type before anything is fetched
        let existing = TimelineMerger::load_artifact(&dt.artifact_path)?;

        let pending: Vec<_> = ids
            .into_iter()
            .filter(|id| !self.sync_state.already_processed(id, &dt.artifact_path))
            .collect();
        report.already_processed = report.discovered - pending.len();
        info!(
            "{}: {} discovered, {} already in {}, {} to fetch",
            dt.name,
            report.discovered,
            report.already_processed,
            dt.artifact_path.display(),
            pending.len()
        );
        let (discovered, already) = (report.discovered, report.already_processed);
        self.update_current(|p| {
            p.discovered = discovered;
            p.already_processed = already;
        });

        let mut records = Vec::with_capacity(pending.len());
        for (i, id) in pending.iter().enumerate() {
            info!("[{}/{}] {}", i + 1, pending.len(), id);
            match self.fetcher.fetch(id).await {
                Some(record) => {
                    records.push(record);
                    self.update_current(|p| p.fetched += 1);
                }
                None => {
                    report.failed += 1;
                    self.update_current(|p| p.failed += 1);
                }
            }
        }
        report.fetched = records.len();

        let merged = TimelineMerger::merge(existing.clone(), &records);
        report.total_entries = merged.len();
        if merged != existing {
            TimelineMerger::save_artifact(&dt.artifact_path, &merged)?;
            report.artifact_written = true;
            self.sync_state.clear_cache();
        } else {
            info!("{}: artifact unchanged", dt.name);
        }

        if let Some(assets) = &self.assets {
            let summary = assets.sync_artifact(&dt.artifact_path, &dt.cover_dir).await?;
            if summary.relinked > 0 {
                report.artifact_written = true;
            }
            report.assets = Some(summary);
        }

        self.metrics.log_summary();
        info!(
            "{}: fetched {}, failed {}, {} entries total",
            dt.name, report.fetched, report.failed, report.total_entries
        );
        Ok(report)
    }

    /// Run every data type in order. A failing data type is logged and the
    /// rest still run.
    pub async fn run_all(
        &self,
        data_types: &[DataTypeConfig],
    ) -> Vec<(String, Result<DataTypeReport, HarvestError>)> {
        self.update_progress(|p| {
            *p = CrawlProgress {
                in_progress: true,
                started_at: Some(Utc::now().timestamp()),
                ..CrawlProgress::default()
            };
        });
        if data_types.is_empty() {
            warn!("No data types configured, nothing to do");
        }

        let mut results = Vec::with_capacity(data_types.len());
        for dt in data_types {
            let result = self.run_data_type(dt).await;
            if let Err(e) = &result {
                error!("{} failed: {}", dt.name, e);
                let message = format!("{}: {}", dt.name, e);
                self.update_progress(|p| p.error = Some(message));
            }
            results.push((dt.name.clone(), result));
        }

        self.update_progress(|p| {
            p.in_progress = false;
            p.current_data_type = None;
            p.finished_at = Some(Utc::now().timestamp());
        });
        results
    }
}
