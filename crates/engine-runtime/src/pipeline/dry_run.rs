use crate::{
    error::PipelineError,
    job::{JobDescription, PipelineOutcome},
    pipeline::PipelineEngine,
};
use async_trait::async_trait;
use connectors::sql::base::adapter::SourceAdapter;
use std::sync::Arc;
use tracing::info;

/// Logs jobs without touching the source or any sink.
pub struct DryRunEngine;

#[async_trait]
impl PipelineEngine for DryRunEngine {
    async fn run(
        &self,
        job: &JobDescription,
        _source: Arc<dyn SourceAdapter>,
    ) -> Result<PipelineOutcome, PipelineError> {
        info!(
            job = %job.id,
            table = %job.table,
            destination = %job.destination,
            query = %job.query,
            "[dry-run] Would run extraction job"
        );
        Ok(PipelineOutcome { rows: Some(0) })
    }

    fn advances_watermarks(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}
