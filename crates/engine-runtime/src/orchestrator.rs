//! Per-cycle orchestration of extraction jobs.
//!
//! Each cycle walks the configured sources one at a time through
//! `DISCOVER → COMPUTE → BUILD → RUN → COMMIT`. Only RUN is parallel; it
//! joins every job before any watermark is committed.

use crate::{
    descriptor::write_descriptor,
    error::{EngineError, PipelineError},
    job::{ExtractionJob, JobDescription, PipelineOutcome, PlannedWindow, SourceDescriptor},
    pipeline::PipelineEngine,
};
use chrono::{DateTime, SubsecRound, Utc};
use connectors::sql::base::{adapter::SourceAdapter, source::SourceConnector};
use engine_config::settings::{BatchingParams, Settings};
use engine_core::{
    state::StateStore,
    watermark::{PolicyInput, WatermarkPolicy},
};
use futures::{StreamExt, stream};
use model::{
    core::{identifiers::{SourceId, TableKey}, window::WatermarkWindow},
    source::SourceConnection,
    tracking::TrackedTable,
};
use planner::extraction::{ExtractionRequest, QuerySynthesizer};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOutcome {
    Committed {
        window: WatermarkWindow,
        rows: Option<u64>,
    },
    /// The job succeeded but the engine does not advance watermarks.
    Extracted { window: WatermarkWindow },
    Failed { reason: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    Completed(Vec<(TableKey, TableOutcome)>),
    Aborted { reason: String },
    /// Shutdown was requested before the source was reached.
    NotStarted,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub sources: Vec<(SourceId, SourceOutcome)>,
}

impl CycleReport {
    pub fn table(&self, key: &TableKey) -> Option<&TableOutcome> {
        self.sources
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                SourceOutcome::Completed(tables) => Some(tables),
                _ => None,
            })
            .flatten()
            .find(|(k, _)| k == key)
            .map(|(_, outcome)| outcome)
    }

    pub fn source(&self, id: SourceId) -> Option<&SourceOutcome> {
        self.sources
            .iter()
            .find(|(s, _)| *s == id)
            .map(|(_, outcome)| outcome)
    }

    pub fn committed(&self) -> usize {
        self.count(|o| matches!(o, TableOutcome::Committed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TableOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&TableOutcome) -> bool) -> usize {
        self.sources
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                SourceOutcome::Completed(tables) => Some(tables),
                _ => None,
            })
            .flatten()
            .filter(|(_, o)| pred(o))
            .count()
    }
}

/// Largest number of jobs allowed in flight at once.
pub fn concurrency_cap(configured: usize, available_parallelism: usize) -> usize {
    configured
        .min(available_parallelism.saturating_sub(1))
        .max(1)
}

fn effective_concurrency(configured: usize) -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    concurrency_cap(configured, available)
}

pub struct OrchestratorParams {
    pub sources: Vec<SourceConnection>,
    pub state: Arc<dyn StateStore>,
    pub connector: Arc<dyn SourceConnector>,
    pub engine: Arc<dyn PipelineEngine>,
    pub policy: WatermarkPolicy,
    pub synthesizer: QuerySynthesizer,
    pub batching: BatchingParams,
    pub max_concurrent_jobs: usize,
    pub descriptor_dir: Option<PathBuf>,
}

pub struct Orchestrator {
    sources: Vec<SourceConnection>,
    state: Arc<dyn StateStore>,
    connector: Arc<dyn SourceConnector>,
    engine: Arc<dyn PipelineEngine>,
    policy: WatermarkPolicy,
    synthesizer: QuerySynthesizer,
    batching: BatchingParams,
    concurrency: usize,
    descriptor_dir: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(params: OrchestratorParams) -> Self {
        Self {
            concurrency: effective_concurrency(params.max_concurrent_jobs),
            sources: params.sources,
            state: params.state,
            connector: params.connector,
            engine: params.engine,
            policy: params.policy,
            synthesizer: params.synthesizer,
            batching: params.batching,
            descriptor_dir: params.descriptor_dir,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        state: Arc<dyn StateStore>,
        connector: Arc<dyn SourceConnector>,
        engine: Arc<dyn PipelineEngine>,
    ) -> Self {
        Self::new(OrchestratorParams {
            sources: settings.sources.clone(),
            state,
            connector,
            engine,
            policy: WatermarkPolicy::new(settings.policy),
            synthesizer: QuerySynthesizer::new(settings.munging),
            batching: settings.batching,
            max_concurrent_jobs: settings.max_concurrent_jobs,
            descriptor_dir: settings.job_descriptor_dir.clone(),
        })
    }

    /// Overrides the computed cap, still keeping at least one slot.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs cycles until `cancel` fires, pausing `interval` between them.
    pub async fn run_continuous(
        &self,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        info!(
            engine = self.engine.name(),
            sources = self.sources.len(),
            concurrency = self.concurrency,
            "Starting continuous extraction"
        );

        loop {
            let report = self.run_cycle(cancel).await;
            info!(
                committed = report.committed(),
                failed = report.failed(),
                "Cycle finished"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown requested, leaving extraction loop");
                    return Err(EngineError::ShutdownRequested);
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        self.run_cycle_at(Utc::now(), cancel).await
    }

    /// One pass over every source, evaluating the policy against `now`.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport {
            started_at: now,
            sources: Vec::with_capacity(self.sources.len()),
        };

        for source in &self.sources {
            if cancel.is_cancelled() {
                warn!(source = %source.id, "Shutdown requested, source not started");
                report.sources.push((source.id, SourceOutcome::NotStarted));
                continue;
            }

            let outcome = match self.run_source(source, now).await {
                Ok(tables) => SourceOutcome::Completed(tables),
                Err(e) => {
                    error!(source = %source.id, error = %e, "Source cycle aborted");
                    SourceOutcome::Aborted {
                        reason: e.to_string(),
                    }
                }
            };
            report.sources.push((source.id, outcome));
        }

        report
    }

    async fn run_source(
        &self,
        source: &SourceConnection,
        now: DateTime<Utc>,
    ) -> Result<Vec<(TableKey, TableOutcome)>, EngineError> {
        let adapter =
            self.connector
                .connect(source)
                .await
                .map_err(|error| EngineError::Connect {
                    source_id: source.id,
                    error,
                })?;

        // DISCOVER
        let tables = self.state.list_tracked(Some(source.id)).await?;
        info!(source = %source.id, tables = tables.len(), "Discovered tracked tables");

        let mut outcomes = Vec::with_capacity(tables.len());

        // COMPUTE_WATERMARKS
        let mut planned = Vec::new();
        for table in &tables {
            match self.compute(source, adapter.as_ref(), table, now).await {
                Ok(window) => planned.push((table, window)),
                Err(reason) => {
                    warn!(table = %table.key, %reason, "Skipping table this cycle");
                    outcomes.push((table.key.clone(), TableOutcome::Skipped { reason }));
                }
            }
        }

        // BUILD_JOBS
        let mut jobs = Vec::with_capacity(planned.len());
        for (table, plan) in planned {
            match self.build(source, table, plan) {
                Ok(job) => jobs.push(job),
                Err(reason) => {
                    warn!(table = %table.key, %reason, "Skipping table this cycle");
                    outcomes.push((table.key.clone(), TableOutcome::Skipped { reason }));
                }
            }
        }

        if let Some(dir) = &self.descriptor_dir {
            for job in &jobs {
                if let Err(e) = write_descriptor(dir, &job.description).await {
                    warn!(table = %job.key, error = %e, "Failed to write job descriptor");
                }
            }
        }

        // RUN
        let results = self.run_jobs(jobs, adapter).await;

        // COMMIT
        for (job, result) in results {
            let outcome = self.commit(&job, result).await;
            outcomes.push((job.key, outcome));
        }

        Ok(outcomes)
    }

    async fn compute(
        &self,
        source: &SourceConnection,
        adapter: &dyn SourceAdapter,
        table: &TrackedTable,
        now: DateTime<Utc>,
    ) -> Result<PlannedWindow, String> {
        let observed_row_count = adapter
            .row_count(&table.schema, table.name())
            .await
            .map_err(|e| format!("row count failed: {e}"))?;

        let input = PolicyInput {
            current: table.watermark,
            last_row_count: table.last_row_count,
            observed_row_count,
            replication_buffer: source.replication_buffer,
            target_batch_size: source.target_batch_size,
        };
        let decision = self.policy.evaluate(&input, now);

        let window = decision
            .window()
            .ok_or_else(|| format!("watermark {} is already current", table.watermark))?;

        info!(
            table = %table.key,
            case = %decision.case,
            from = %window.from,
            to = %window.to,
            row_delta = input.row_delta(),
            "Computed extraction window"
        );

        Ok(PlannedWindow {
            key: table.key.clone(),
            window,
            case: decision.case,
            observed_row_count,
            snapshot_at: now.trunc_subsecs(6),
        })
    }

    fn build(
        &self,
        source: &SourceConnection,
        table: &TrackedTable,
        plan: PlannedWindow,
    ) -> Result<ExtractionJob, String> {
        let query = self
            .synthesizer
            .synthesize(&ExtractionRequest {
                schema: &table.schema,
                table: table.name(),
                columns: &table.columns,
                watermark_column: &table.watermark_column,
                window: plan.window,
                snapshot_at: plan.snapshot_at,
            })
            .map_err(|e| format!("query synthesis failed: {e}"))?;

        Ok(ExtractionJob {
            description: JobDescription {
                id: ExtractionJob::make_id(&plan.key, &plan.window),
                source: SourceDescriptor::from(source),
                table: table.name().to_string(),
                window: plan.window,
                query,
                destination: table.destination_name(),
                batching: self.batching,
            },
            key: plan.key,
            window: plan.window,
            case: plan.case,
            observed_row_count: plan.observed_row_count,
        })
    }

    /// Runs all jobs as separate tasks, at most `concurrency` at a time, and
    /// returns once every one of them has finished.
    async fn run_jobs(
        &self,
        jobs: Vec<ExtractionJob>,
        adapter: Arc<dyn SourceAdapter>,
    ) -> Vec<(ExtractionJob, Result<PipelineOutcome, PipelineError>)> {
        if jobs.is_empty() {
            return Vec::new();
        }
        debug!(jobs = jobs.len(), concurrency = self.concurrency, "Running jobs");

        stream::iter(jobs.into_iter().map(|job| {
            let engine = self.engine.clone();
            let adapter = adapter.clone();
            async move {
                let description = job.description.clone();
                let handle =
                    tokio::spawn(async move { engine.run(&description, adapter).await });
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(PipelineError::Join(e.to_string())),
                };
                (job, result)
            }
        }))
        .buffer_unordered(self.concurrency)
        .collect()
        .await
    }

    async fn commit(
        &self,
        job: &ExtractionJob,
        result: Result<PipelineOutcome, PipelineError>,
    ) -> TableOutcome {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(table = %job.key, job = %job.description.id, error = %e, "Job failed, watermark unchanged");
                return TableOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        if !self.engine.advances_watermarks() {
            info!(table = %job.key, to = %job.window.to, "Job finished, watermark not advanced");
            return TableOutcome::Extracted { window: job.window };
        }

        match self
            .state
            .commit_watermark(&job.key, job.window.to, job.observed_row_count)
            .await
        {
            Ok(()) => {
                info!(
                    table = %job.key,
                    from = %job.window.from,
                    to = %job.window.to,
                    rows = ?outcome.rows,
                    "Committed watermark"
                );
                TableOutcome::Committed {
                    window: job.window,
                    rows: outcome.rows,
                }
            }
            Err(e) => {
                error!(table = %job.key, error = %e, "Failed to commit watermark");
                TableOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
