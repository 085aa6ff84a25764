use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::models::{JoinedRecord, RawBatch};
use crate::processors::aggregator::ReadingAggregator;
use crate::processors::assembler::JoinAssembler;
use crate::processors::matcher::{MatchOutcome, MatchStrategy, NearestStationMatcher};
use crate::processors::normalizer::Normalizer;
use crate::processors::run_summary::{PipelineStage, RunSummary};
use crate::readers::RawSource;
use crate::utils::constants::DEFAULT_TIME_BUDGET_SECS;
use crate::utils::filename::{generate_run_id, processed_snapshot_key, raw_snapshot_key, summary_key};
use crate::utils::progress::ProgressReporter;
use crate::writers::{BlobStore, JoinedStore, Loader, SnapshotWriter};
use chrono::Utc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Outcome of one run: the summary always, the fatal error when there was one
#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    pub error: Option<PipelineError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Drives one batch through fetch, normalize, aggregate, match, assemble and
/// load, checking the time budget between stages.
pub struct Pipeline {
    max_workers: usize,
    time_budget: Duration,
    strategy: MatchStrategy,
    region_filter: Option<String>,
    loader: Loader,
    snapshot_writer: SnapshotWriter,
}

impl Pipeline {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            time_budget: Duration::from_secs(DEFAULT_TIME_BUDGET_SECS),
            strategy: MatchStrategy::default(),
            region_filter: None,
            loader: Loader::default(),
            snapshot_writer: SnapshotWriter::default(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let loader = Loader::new()
            .with_retry_policy(config.loader.retry_policy())
            .with_batch_size(config.loader.batch_size)
            .with_batch_timeout(config.loader.batch_timeout());
        let snapshot_writer = SnapshotWriter::new()
            .with_compression(&config.blob.compression)?
            .with_row_group_size(config.blob.row_group_size);

        Ok(Self::new(config.workers)
            .with_time_budget(config.time_budget())
            .with_strategy(config.matcher)
            .with_region_filter(config.state_province.clone())
            .with_loader(loader)
            .with_snapshot_writer(snapshot_writer))
    }

    pub fn with_time_budget(mut self, time_budget: Duration) -> Self {
        self.time_budget = time_budget;
        self
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_region_filter(mut self, region: Option<String>) -> Self {
        self.region_filter = region;
        self
    }

    pub fn with_loader(mut self, loader: Loader) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_snapshot_writer(mut self, snapshot_writer: SnapshotWriter) -> Self {
        self.snapshot_writer = snapshot_writer;
        self
    }

    /// Run the whole pipeline once. Never panics on bad input: every outcome,
    /// including fatal ones, comes back as a `RunReport`.
    pub fn run(
        &self,
        source: &mut dyn RawSource,
        target: &mut dyn JoinedStore,
        blobs: Option<&dyn BlobStore>,
        progress: Option<&ProgressReporter>,
    ) -> RunReport {
        let started = Instant::now();
        let mut run = Run {
            pipeline: self,
            started,
            stage: PipelineStage::Idle,
            summary: RunSummary::new(generate_run_id(Utc::now())),
            blobs,
            progress,
        };

        info!(run_id = %run.summary.run_id, strategy = %self.strategy, "starting run");

        let result = run.execute(source, target);
        let stage = run.stage;
        let mut summary = run.summary;
        summary.elapsed_ms = started.elapsed().as_millis() as u64;

        let error = match result {
            Ok(()) => {
                summary.complete();
                info!(
                    loaded = summary.records_loaded(),
                    failed = summary.records_failed,
                    rejected = summary.rejected_count(),
                    "run complete"
                );
                None
            }
            Err(e) => {
                error!(stage = %stage, "run failed: {}", e);
                summary.fail(stage, &e);
                Some(e)
            }
        };

        if let Some(blobs) = blobs {
            let key = summary_key(&summary.run_id);
            match serde_json::to_vec_pretty(&summary) {
                Ok(bytes) => {
                    if let Err(e) = blobs.put(&key, &bytes) {
                        warn!(key = %key, "could not store run summary: {}", e);
                    } else {
                        summary.blob_keys.push(key);
                    }
                }
                Err(e) => warn!("could not encode run summary: {}", e),
            }
        }

        if let Some(p) = progress {
            if summary.is_success() {
                p.finish_with_message(&format!("Loaded {} records", summary.records_loaded()));
            } else {
                p.finish_with_message("Run failed");
            }
        }

        RunReport { summary, error }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

/// Mutable state of a single run
struct Run<'a> {
    pipeline: &'a Pipeline,
    started: Instant,
    stage: PipelineStage,
    summary: RunSummary,
    blobs: Option<&'a dyn BlobStore>,
    progress: Option<&'a ProgressReporter>,
}

impl Run<'_> {
    fn execute(&mut self, source: &mut dyn RawSource, target: &mut dyn JoinedStore) -> Result<()> {
        let pipeline = self.pipeline;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(pipeline.max_workers)
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        self.enter(PipelineStage::Fetching);
        let batch = source.fetch()?;
        self.summary
            .record_fetch(batch.observations.len(), batch.station_readings.len());
        self.store_raw_snapshots(&batch);
        self.check_budget()?;

        self.enter(PipelineStage::Normalizing);
        let normalizer = Normalizer::new().with_region_filter(pipeline.region_filter.clone());
        let normalized =
            pool.install(|| normalizer.normalize(batch.observations, batch.station_readings))?;
        self.summary.record_normalize(&normalized.stats);
        if normalized.rejected_count() > 0 {
            warn!(
                rejected = normalized.rejected_count(),
                reasons = ?normalized.stats.rejections,
                "rejected malformed rows"
            );
        }
        self.check_budget()?;

        self.enter(PipelineStage::Aggregating);
        let (summaries, aggregate_stats) =
            ReadingAggregator::new().aggregate(normalized.stations, normalized.readings);
        self.summary.record_aggregate(&aggregate_stats);
        self.check_budget()?;

        self.enter(PipelineStage::Matching);
        let matcher = NearestStationMatcher::new(pipeline.strategy);
        let outcome = pool.install(|| matcher.match_nearest(normalized.observations, &summaries));
        self.summary.record_match(&outcome.stats());
        let pairs = match outcome {
            MatchOutcome::Matched(pairs) => pairs,
            MatchOutcome::NoStationsAvailable { .. } => Vec::new(),
        };
        self.check_budget()?;

        self.enter(PipelineStage::Assembling);
        let records = JoinAssembler::new().assemble(pairs)?;
        self.summary.records_joined = records.len();
        self.store_processed_snapshot(&records);
        self.check_budget()?;

        // Loading runs to completion once started
        self.enter(PipelineStage::Loading);
        pipeline.loader.prepare(target)?;
        match pipeline.loader.load(records, target, self.progress) {
            Ok(result) => {
                self.summary.record_load(&result);
                Ok(())
            }
            Err(interrupted) => {
                self.summary.record_load(&interrupted.partial);
                Err(interrupted.error)
            }
        }
    }

    fn enter(&mut self, stage: PipelineStage) {
        self.stage = stage;
        self.summary.state = stage;
        info!(stage = %stage, "entering stage");
        if let Some(p) = self.progress {
            p.stage(&stage.to_string());
        }
    }

    fn check_budget(&self) -> Result<()> {
        let budget = self.pipeline.time_budget;
        if self.started.elapsed() >= budget {
            return Err(PipelineError::TimeoutExceeded {
                stage: self.stage.to_string(),
                budget_secs: budget.as_secs(),
            });
        }
        Ok(())
    }

    fn store_raw_snapshots(&mut self, batch: &RawBatch) {
        let Some(blobs) = self.blobs else {
            return;
        };
        for (name, records) in [
            ("gbif", &batch.observations),
            ("usgs", &batch.station_readings),
        ] {
            let key = raw_snapshot_key(&self.summary.run_id, name);
            let stored = serde_json::to_vec(records)
                .map_err(PipelineError::from)
                .and_then(|bytes| blobs.put(&key, &bytes));
            self.note_blob(key, stored);
        }
    }

    fn store_processed_snapshot(&mut self, records: &[JoinedRecord]) {
        let Some(blobs) = self.blobs else {
            return;
        };
        let key = processed_snapshot_key(&self.summary.run_id);
        let stored = self
            .pipeline
            .snapshot_writer
            .to_bytes(records)
            .and_then(|bytes| blobs.put(&key, &bytes));
        self.note_blob(key, stored);
    }

    /// Audit writes never fail the run
    fn note_blob(&mut self, key: String, stored: Result<()>) {
        match stored {
            Ok(()) => self.summary.blob_keys.push(key),
            Err(e) => warn!(key = %key, "could not store audit snapshot: {}", e),
        }
    }
}
