use crate::{
    error::PipelineError,
    job::{JobDescription, PipelineOutcome},
    pipeline::PipelineEngine,
};
use async_trait::async_trait;
use connectors::sql::base::adapter::SourceAdapter;
use futures::TryStreamExt;
use std::{path::PathBuf, sync::Arc};
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
};
use tracing::{debug, info};

/// Appends each extracted row as one JSON line to `<dir>/<destination>.json`.
pub struct FileSinkEngine {
    dir: PathBuf,
}

impl FileSinkEngine {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn output_path(&self, destination: &str) -> PathBuf {
        self.dir.join(format!("{destination}.json"))
    }
}

#[async_trait]
impl PipelineEngine for FileSinkEngine {
    async fn run(
        &self,
        job: &JobDescription,
        source: Arc<dyn SourceAdapter>,
    ) -> Result<PipelineOutcome, PipelineError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.output_path(&job.destination);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let mut writer = BufWriter::new(file);

        let batch_size = job.batching.count.max(1);
        let mut rows = source.json_rows(&job.query).await?;
        let mut written: u64 = 0;

        while let Some(row) = rows.try_next().await? {
            writer.write_all(row.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            written += 1;

            if written % batch_size == 0 {
                writer.flush().await?;
                debug!(job = %job.id, rows = written, "Flushed batch");
            }
        }
        writer.flush().await?;

        info!(
            job = %job.id,
            table = %job.table,
            rows = written,
            path = %path.display(),
            "File sink finished"
        );
        Ok(PipelineOutcome {
            rows: Some(written),
        })
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
