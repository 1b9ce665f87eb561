//! Test doubles shared by the runtime unit tests.

use crate::{
    error::PipelineError,
    job::{JobDescription, PipelineOutcome, SourceDescriptor},
    pipeline::PipelineEngine,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use connectors::sql::base::{
    adapter::{DatabaseKind, SourceAdapter},
    error::{ConnectorError, DbError},
    source::SourceConnector,
};
use engine_config::settings::BatchingParams;
use engine_core::{
    error::StateError,
    state::{StateStore, sled_store::SledStateStore},
};
use futures::{StreamExt, stream::BoxStream};
use model::{
    core::{
        identifiers::{SourceId, TableKey},
        window::WatermarkWindow,
    },
    source::SourceConnection,
    tracking::{ColumnMetadata, TrackedTable},
};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Debug, Clone, Default)]
pub struct MockTable {
    pub columns: Vec<ColumnMetadata>,
    /// `None` makes the row count query fail.
    pub row_count: Option<i64>,
    pub min_watermark: Option<DateTime<Utc>>,
    pub primary_key: Option<String>,
    pub unlogged: bool,
}

impl MockTable {
    pub fn new(row_count: i64, min_watermark: Option<DateTime<Utc>>) -> Self {
        Self {
            columns: vec![
                ColumnMetadata::new("id", "int8", 1).not_null(),
                ColumnMetadata::new("updated_at", "timestamptz", 2),
            ],
            row_count: Some(row_count),
            min_watermark,
            primary_key: Some("id".into()),
            unlogged: false,
        }
    }
}

#[derive(Default)]
pub struct MockSource {
    pub tables: Mutex<HashMap<String, MockTable>>,
    rows: Vec<String>,
    fail_rows: bool,
}

impl MockSource {
    pub fn with_tables(tables: Vec<(&str, MockTable)>) -> Self {
        Self {
            tables: Mutex::new(
                tables
                    .into_iter()
                    .map(|(name, t)| (name.to_string(), t))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    pub fn with_rows(rows: Vec<String>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn failing_rows() -> Self {
        Self {
            fail_rows: true,
            ..Self::default()
        }
    }

    pub fn set_row_count(&self, table: &str, count: Option<i64>) {
        if let Some(t) = self.tables.lock().unwrap().get_mut(table) {
            t.row_count = count;
        }
    }

    fn table(&self, name: &str) -> Result<MockTable, DbError> {
        self.tables
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::Unknown(format!("no table {name}")))
    }
}

#[async_trait]
impl SourceAdapter for MockSource {
    async fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn watermark_tables(&self, _schema: &str, column: &str) -> Result<Vec<String>, DbError> {
        let tables = self.tables.lock().unwrap();
        let mut names: Vec<String> = tables
            .iter()
            .filter(|(_, t)| t.columns.iter().any(|c| c.name == column))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn unlogged_tables(&self, _schema: &str) -> Result<Vec<String>, DbError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .iter()
            .filter(|(_, t)| t.unlogged)
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn table_columns(&self, _schema: &str, table: &str) -> Result<Vec<ColumnMetadata>, DbError> {
        Ok(self.table(table)?.columns)
    }

    async fn primary_key(&self, _schema: &str, table: &str) -> Result<Option<String>, DbError> {
        Ok(self.table(table)?.primary_key)
    }

    async fn row_count(&self, _schema: &str, table: &str) -> Result<i64, DbError> {
        self.table(table)?
            .row_count
            .ok_or_else(|| DbError::Unknown("row count unavailable".into()))
    }

    async fn min_watermark(
        &self,
        _schema: &str,
        table: &str,
        _column: &str,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        Ok(self.table(table)?.min_watermark)
    }

    async fn json_rows(
        &self,
        _query: &str,
    ) -> Result<BoxStream<'static, Result<String, DbError>>, DbError> {
        if self.fail_rows {
            let failing = futures::stream::iter(vec![Err(DbError::Unknown("broken pipe".into()))]);
            return Ok(failing.boxed());
        }
        Ok(futures::stream::iter(self.rows.clone().into_iter().map(Ok)).boxed())
    }

    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Other("mock".into())
    }
}

/// Hands out pre-built sources; unknown ids fail to connect.
#[derive(Default)]
pub struct MockConnector {
    pub sources: HashMap<SourceId, Arc<MockSource>>,
}

#[async_trait]
impl SourceConnector for MockConnector {
    async fn connect(
        &self,
        connection: &SourceConnection,
    ) -> Result<Arc<dyn SourceAdapter>, ConnectorError> {
        match self.sources.get(&connection.id) {
            Some(source) => Ok(source.clone() as Arc<dyn SourceAdapter>),
            None => Err(ConnectorError::InvalidUrl(connection.redacted_url())),
        }
    }
}

/// Engine that fails for selected tables and records every run.
#[derive(Default)]
pub struct RecordingEngine {
    pub fail_tables: HashSet<String>,
    pub delay: Option<Duration>,
    pub runs: Mutex<Vec<JobDescription>>,
    in_flight: Mutex<(usize, usize)>,
}

impl RecordingEngine {
    pub fn failing(tables: &[&str]) -> Self {
        Self {
            fail_tables: tables.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().1
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

#[async_trait]
impl PipelineEngine for RecordingEngine {
    async fn run(
        &self,
        job: &JobDescription,
        _source: Arc<dyn SourceAdapter>,
    ) -> Result<PipelineOutcome, PipelineError> {
        {
            let mut guard = self.in_flight.lock().unwrap();
            guard.0 += 1;
            guard.1 = guard.1.max(guard.0);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.lock().unwrap().0 -= 1;
        self.runs.lock().unwrap().push(job.clone());

        if self.fail_tables.contains(&job.table) {
            return Err(PipelineError::Failed(format!("sink rejected {}", job.table)));
        }
        Ok(PipelineOutcome { rows: Some(7) })
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

pub fn connection(id: u32) -> SourceConnection {
    SourceConnection {
        id: SourceId::new(id),
        url: format!("postgres://app:secret@db{id}/app"),
        schema: "public".into(),
        watermark_column: "updated_at".into(),
        replication_buffer: Duration::from_secs(60),
        target_batch_size: 4096,
        is_replica: false,
    }
}

pub fn job_description(table: &str) -> JobDescription {
    JobDescription {
        id: "job-test".into(),
        source: SourceDescriptor::from(&connection(1)),
        table: table.to_string(),
        window: WatermarkWindow::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        )
        .unwrap(),
        query: "SELECT 1".into(),
        destination: format!("{table}_cdc"),
        batching: BatchingParams::default(),
    }
}

/// Sled store whose writes fail for one table name.
pub struct FailingStore {
    pub inner: SledStateStore,
    fail_table: String,
}

impl FailingStore {
    pub fn new(inner: SledStateStore, fail_table: &str) -> Self {
        Self {
            inner,
            fail_table: fail_table.to_string(),
        }
    }

    fn check(&self, name: &str) -> Result<(), StateError> {
        if name == self.fail_table {
            return Err(StateError::Export(std::io::Error::other(format!(
                "write rejected for {name}"
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for FailingStore {
    async fn upsert_seed(&self, table: &TrackedTable) -> Result<TrackedTable, StateError> {
        self.check(table.name())?;
        self.inner.upsert_seed(table).await
    }

    async fn list_tracked(
        &self,
        source: Option<SourceId>,
    ) -> Result<Vec<TrackedTable>, StateError> {
        self.inner.list_tracked(source).await
    }

    async fn get(&self, key: &TableKey) -> Result<Option<TrackedTable>, StateError> {
        self.inner.get(key).await
    }

    async fn commit_watermark(
        &self,
        key: &TableKey,
        watermark: DateTime<Utc>,
        row_count: i64,
    ) -> Result<(), StateError> {
        self.check(&key.name)?;
        self.inner.commit_watermark(key, watermark, row_count).await
    }

    async fn cache_destination_schema(
        &self,
        key: &TableKey,
        schema: &str,
    ) -> Result<(), StateError> {
        self.check(&key.name)?;
        self.inner.cache_destination_schema(key, schema).await
    }
}
