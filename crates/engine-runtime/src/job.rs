//! Per-cycle units of work.

use chrono::{DateTime, Utc};
use engine_config::settings::BatchingParams;
use engine_core::watermark::PolicyCase;
use model::{
    core::{identifiers::TableKey, window::WatermarkWindow},
    source::SourceConnection,
};
use serde::Serialize;

/// Declarative description handed to a pipeline engine.
#[derive(Debug, Clone, Serialize)]
pub struct JobDescription {
    pub id: String,
    pub source: SourceDescriptor,
    pub table: String,
    pub window: WatermarkWindow,
    pub query: String,
    pub destination: String,
    pub batching: BatchingParams,
}

/// Connection parameters of the job's source, with the password redacted.
#[derive(Debug, Clone, Serialize)]
pub struct SourceDescriptor {
    pub id: u32,
    pub url: String,
    pub schema: String,
}

impl From<&SourceConnection> for SourceDescriptor {
    fn from(conn: &SourceConnection) -> Self {
        Self {
            id: conn.id.get(),
            url: conn.redacted_url(),
            schema: conn.schema.clone(),
        }
    }
}

/// A table's extraction for one cycle.
///
/// Built once the window is known and never mutated afterwards; the commit
/// step reads the window and row count from here.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub key: TableKey,
    pub window: WatermarkWindow,
    pub case: PolicyCase,
    /// Row count observed on the source while computing the window.
    pub observed_row_count: i64,
    pub description: JobDescription,
}

impl ExtractionJob {
    /// Stable id for one table window.
    pub fn make_id(key: &TableKey, window: &WatermarkWindow) -> String {
        let mut h = blake3::Hasher::new();
        h.update(key.source.to_string().as_bytes());
        h.update(b":");
        h.update(key.name.as_bytes());
        h.update(b":");
        h.update(window.from.to_rfc3339().as_bytes());
        h.update(b":");
        h.update(window.to.to_rfc3339().as_bytes());
        format!("job-{}", &h.finalize().to_hex()[..16])
    }
}

/// Result of running one job through a pipeline engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineOutcome {
    /// Rows delivered, when the engine can tell.
    pub rows: Option<u64>,
}

/// Window and snapshot time chosen for a table during COMPUTE.
#[derive(Debug, Clone)]
pub struct PlannedWindow {
    pub key: TableKey,
    pub window: WatermarkWindow,
    pub case: PolicyCase,
    pub observed_row_count: i64,
    pub snapshot_at: DateTime<Utc>,
}
