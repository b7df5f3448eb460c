//! Pipeline orchestration for the periodic results refresh
//!
//! Sequence: idempotency gate, fetch, staging setup, persons load and
//! dedup, results transform and load, index build, atomic swap. The
//! working directory is removed after every run, success or failure.

use crate::config::LoaderConfig;
use crate::downloader::ExportDownloader;
use crate::error::Result;
use crate::storage::{self, ResultsStore};
use crate::{parser, transform};
use sqlx::PgPool;
use tracing::{info, warn};

/// The load-and-swap pipeline
pub struct LoaderPipeline {
    config: LoaderConfig,
    store: ResultsStore,
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub persons_loaded: u64,
    pub duplicates_removed: u64,
    pub results_loaded: u64,
    pub skipped: bool,
}

impl LoaderPipeline {
    pub fn new(config: LoaderConfig, pool: PgPool) -> Self {
        LoaderPipeline {
            config,
            store: ResultsStore::new(pool),
        }
    }

    /// Run the full refresh. The working directory is cleaned up whether
    /// the run succeeded or not.
    pub async fn run(&self) -> Result<PipelineStats> {
        let outcome = self.run_stages().await;
        self.remove_data_dir();
        outcome
    }

    async fn run_stages(&self) -> Result<PipelineStats> {
        // Advisory gate only; not re-checked before the swap.
        if self.config.skip_if_loaded && self.store.table_exists(storage::RESULTS_TABLE).await? {
            info!("Live results table already exists, skipping load");
            return Ok(PipelineStats {
                skipped: true,
                ..PipelineStats::default()
            });
        }

        let downloader = ExportDownloader::new(&self.config)?;
        let files = downloader.fetch().await?;

        self.store.init_staging().await?;

        info!("Loading persons data");
        let persons = parser::read_persons(&files.persons)?;
        info!(rows = persons.len(), "Streaming persons to staging");
        let persons_loaded = self.store.load_persons(&persons).await?;
        let duplicates_removed = self.store.dedup_persons().await?;

        info!("Transforming results data");
        let results = transform::build_results(&files)?;
        info!(rows = results.len(), "Streaming results to staging");
        let results_loaded = self.store.load_results(&results).await?;

        self.store.build_results_index().await?;
        self.store.swap_tables().await?;

        info!(
            persons = persons_loaded,
            duplicates_removed, results = results_loaded, "Pipeline complete"
        );

        Ok(PipelineStats {
            persons_loaded,
            duplicates_removed,
            results_loaded,
            skipped: false,
        })
    }

    /// Remove the working directory unconditionally; a cleanup failure is
    /// logged but never overrides the pipeline outcome.
    fn remove_data_dir(&self) {
        let dir = &self.config.data_dir;
        if dir.exists() {
            info!(dir = %dir.display(), "Removing working directory");
            if let Err(err) = std::fs::remove_dir_all(dir) {
                warn!(error = %err, "Failed to remove working directory");
            }
        }
    }
}
