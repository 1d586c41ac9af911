//! Snapshot-diff-and-notify pipeline orchestration.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use jobwatch_adapters::{
    AdapterRegistry, FetchError, HttpClientConfig, HttpFetcher, SourceAdapter, SourceConfig,
};
use jobwatch_core::{is_cold_start, new_position_message, new_positions};
use jobwatch_notify::{LogNotifier, Notifier, NotifyError, PushoverCredentials, PushoverNotifier};
use jobwatch_storage::{SnapshotStore, SqliteSnapshotStore, StorageError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobwatch-sync";

/// Failures that abort a whole run. Per-source failures are reported in [`SourceReport`].
#[derive(Debug, Error)]
pub enum RunError {
    #[error("reading source registry {path}: {source}")]
    RegistryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing source registry {path}: {source}")]
    RegistryParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("source {0} is listed more than once")]
    DuplicateSource(String),
    #[error("no adapter registered for source {0}")]
    MissingAdapter(String),
    #[error("opening snapshot store: {0}")]
    StoreOpen(#[source] StorageError),
    #[error("initializing snapshot store: {0}")]
    StoreInit(#[source] StorageError),
    #[error(transparent)]
    HttpClient(#[from] FetchError),
    #[error(transparent)]
    Notifier(#[from] NotifyError),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RunError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .await
            .map_err(|source| RunError::RegistryRead {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&text, path)
    }

    /// Parses registry YAML; `origin` is only used in error messages.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, RunError> {
        let registry: Self =
            serde_yaml::from_str(text).map_err(|source| RunError::RegistryParse {
                path: origin.to_path_buf(),
                source,
            })?;

        let mut seen = BTreeSet::new();
        for source in &registry.sources {
            if !seen.insert(source.source_id.as_str()) {
                return Err(RunError::DuplicateSource(source.source_id.clone()));
            }
        }
        Ok(registry)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

/// Process configuration, built once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub database_path: PathBuf,
    pub sources_path: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub suppress_cold_start: bool,
    pub pushover: Option<PushoverCredentials>,
}

impl WatchConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let pushover = match (non_empty("PUSHOVER_APP_TOKEN"), non_empty("PUSHOVER_USER_KEY")) {
            (Some(token), Some(user)) => Some(PushoverCredentials::new(token, user)),
            _ => None,
        };

        Self {
            database_path: non_empty("JOBWATCH_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/jobwatch.db")),
            sources_path: non_empty("JOBWATCH_SOURCES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./sources.yaml")),
            user_agent: non_empty("JOBWATCH_USER_AGENT")
                .unwrap_or_else(|| "jobwatch-bot/0.1".to_string()),
            http_timeout_secs: non_empty("JOBWATCH_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            suppress_cold_start: non_empty("JOBWATCH_SUPPRESS_COLD_START")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            pushover,
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            suppress_cold_start: self.suppress_cold_start,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Skip notifications for a source with no prior snapshot. Off by default.
    pub suppress_cold_start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageStage {
    ReadLatest,
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome {
    Completed,
    FetchFailed { error: String },
    StorageFailed { stage: StorageStage, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source_id: String,
    pub outcome: SourceOutcome,
    pub fetched: usize,
    pub cold_start: bool,
    pub new_positions: Vec<String>,
    pub notified: usize,
    pub notify_failures: usize,
    pub persisted: usize,
}

impl SourceReport {
    fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            outcome: SourceOutcome::Completed,
            fetched: 0,
            cold_start: false,
            new_positions: Vec::new(),
            notified: 0,
            notify_failures: 0,
            persisted: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == SourceOutcome::Completed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub run_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
}

impl RunSummary {
    pub fn new_position_count(&self) -> usize {
        self.sources.iter().map(|s| s.new_positions.len()).sum()
    }

    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|s| !s.is_completed())
    }

    pub fn source(&self, source_id: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }
}

pub struct SyncPipeline {
    sources: Vec<SourceConfig>,
    adapters: AdapterRegistry,
    store: Arc<dyn SnapshotStore>,
    notifier: Arc<dyn Notifier>,
    options: PipelineOptions,
}

impl SyncPipeline {
    pub fn new(
        sources: Vec<SourceConfig>,
        adapters: AdapterRegistry,
        store: Arc<dyn SnapshotStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            sources,
            adapters,
            store,
            notifier,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Runs every enabled source once, dated with today's local date.
    pub async fn run_once(&self) -> Result<RunSummary, RunError> {
        self.run_on(Local::now().date_naive()).await
    }

    /// Runs every enabled source once, one after another, recording observations under `run_date`.
    pub async fn run_on(&self, run_date: NaiveDate) -> Result<RunSummary, RunError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, %run_date);

        async {
            self.store
                .ensure_initialized()
                .await
                .map_err(RunError::StoreInit)?;

            let mut planned = Vec::new();
            for source in self.sources.iter().filter(|s| s.enabled) {
                let adapter = self
                    .adapters
                    .get(&source.source_id)
                    .ok_or_else(|| RunError::MissingAdapter(source.source_id.clone()))?;
                planned.push((source, adapter));
            }

            let mut reports = Vec::with_capacity(planned.len());
            for (source, adapter) in planned {
                let span = info_span!(
                    "source",
                    source_id = %source.source_id,
                    adapter = %adapter.kind()
                );
                let report = self
                    .process_source(source, adapter, run_date)
                    .instrument(span)
                    .await;
                reports.push(report);
            }

            let summary = RunSummary {
                run_id,
                run_date,
                started_at,
                finished_at: Utc::now(),
                sources: reports,
            };
            info!(
                sources = summary.sources.len(),
                new_positions = summary.new_position_count(),
                failed = summary.failed_sources().count(),
                "run complete"
            );
            Ok::<RunSummary, RunError>(summary)
        }
        .instrument(span)
        .await
    }

    async fn process_source(
        &self,
        source: &SourceConfig,
        adapter: &dyn SourceAdapter,
        run_date: NaiveDate,
    ) -> SourceReport {
        let mut report = SourceReport::new(&source.source_id);

        let positions = match adapter.fetch_positions(source).await {
            Ok(positions) => positions,
            Err(err) => {
                warn!(error = %err, "fetch failed; skipping source for this run");
                report.outcome = SourceOutcome::FetchFailed {
                    error: err.to_string(),
                };
                return report;
            }
        };
        report.fetched = positions.len();
        if positions.is_empty() {
            // An empty fetch must not leave the previous snapshot standing as the latest one.
            warn!("adapter returned no positions; skipping source for this run");
            report.outcome = SourceOutcome::FetchFailed {
                error: "adapter returned no positions".to_string(),
            };
            return report;
        }

        let previous = match self.store.latest_snapshot(&source.source_id).await {
            Ok(previous) => previous,
            Err(err) => {
                warn!(error = %err, "reading latest snapshot failed; skipping source");
                report.outcome = SourceOutcome::StorageFailed {
                    stage: StorageStage::ReadLatest,
                    error: err.to_string(),
                };
                return report;
            }
        };

        report.cold_start = is_cold_start(&previous);
        let fresh = new_positions(&positions, &previous);
        report.new_positions = fresh.iter().cloned().collect();

        if report.cold_start && self.options.suppress_cold_start {
            info!(count = fresh.len(), "first snapshot for source; notifications suppressed");
        } else {
            for position in &fresh {
                let message = new_position_message(&source.display_name, position);
                match self.notifier.notify(&message).await {
                    Ok(()) => report.notified += 1,
                    Err(err) => {
                        report.notify_failures += 1;
                        warn!(error = %err, %position, "notification failed");
                    }
                }
            }
        }

        for position in &positions {
            if let Err(err) = self
                .store
                .append_observation(&source.source_id, position, run_date)
                .await
            {
                warn!(
                    error = %err,
                    persisted = report.persisted,
                    "append failed; remaining observations skipped"
                );
                report.outcome = SourceOutcome::StorageFailed {
                    stage: StorageStage::Append,
                    error: err.to_string(),
                };
                return report;
            }
            report.persisted += 1;
        }

        info!(
            fetched = report.fetched,
            new_positions = report.new_positions.len(),
            persisted = report.persisted,
            cold_start = report.cold_start,
            "source processed"
        );
        report
    }
}

/// Pushover when credentials are configured, otherwise log-only delivery.
pub fn build_notifier(config: &WatchConfig) -> Result<Arc<dyn Notifier>, RunError> {
    match &config.pushover {
        Some(credentials) => Ok(Arc::new(PushoverNotifier::new(credentials.clone())?)),
        None => {
            warn!("pushover credentials not configured; notifications go to the log only");
            Ok(Arc::new(LogNotifier))
        }
    }
}

pub async fn open_store(config: &WatchConfig) -> Result<Arc<SqliteSnapshotStore>, RunError> {
    let store = SqliteSnapshotStore::open(&config.database_path)
        .await
        .map_err(RunError::StoreOpen)?;
    Ok(Arc::new(store))
}

/// Loads the source registry and runs the pipeline once against the configured store.
pub async fn run_with_config(
    config: &WatchConfig,
    notifier: Arc<dyn Notifier>,
) -> Result<RunSummary, RunError> {
    let registry = SourceRegistry::load(&config.sources_path).await?;
    let sources: Vec<SourceConfig> = registry.enabled().cloned().collect();
    let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
    let adapters = AdapterRegistry::for_sources(&sources, http);
    let store = open_store(config).await?;

    let pipeline = SyncPipeline::new(sources, adapters, store, notifier)
        .with_options(config.pipeline_options());
    pipeline.run_once().await
}

pub fn failure_message(err: &RunError) -> String {
    format!("jobwatch run failed: {err}")
}

/// Best-effort delivery of a run failure through the notifier.
pub async fn report_run_failure(notifier: &dyn Notifier, err: &RunError) {
    let message = failure_message(err);
    if let Err(notify_err) = notifier.notify(&message).await {
        warn!(error = %notify_err, "could not deliver run failure alert");
    }
}
