//! External pipeline engines that move rows for a job.

use crate::{
    error::PipelineError,
    job::{JobDescription, PipelineOutcome},
};
use async_trait::async_trait;
use connectors::sql::base::adapter::SourceAdapter;
use engine_config::settings::{OutputKind, Settings};
use std::sync::Arc;

pub mod dry_run;
pub mod file;

/// Executes one job and reports completion or failure.
#[async_trait]
pub trait PipelineEngine: Send + Sync {
    async fn run(
        &self,
        job: &JobDescription,
        source: Arc<dyn SourceAdapter>,
    ) -> Result<PipelineOutcome, PipelineError>;

    /// Whether a successful run should advance the table's watermark.
    fn advances_watermarks(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}

pub fn create_engine(settings: &Settings) -> Arc<dyn PipelineEngine> {
    match settings.output {
        OutputKind::File => Arc::new(file::FileSinkEngine::new(settings.output_dir.clone())),
        OutputKind::DryRun => Arc::new(dry_run::DryRunEngine),
    }
}
