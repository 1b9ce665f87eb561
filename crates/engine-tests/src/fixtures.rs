//! In-memory source and sink used to drive the engine through many cycles.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use connectors::sql::base::{
    adapter::{DatabaseKind, SourceAdapter},
    error::{ConnectorError, DbError},
    source::SourceConnector,
};
use engine_config::settings::BatchingParams;
use engine_core::{
    state::{StateStore, sled_store::SledStateStore},
    watermark::WatermarkPolicy,
};
use engine_runtime::{
    error::PipelineError,
    job::{JobDescription, PipelineOutcome},
    orchestrator::{Orchestrator, OrchestratorParams},
    pipeline::PipelineEngine,
};
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use model::{
    core::{
        identifiers::SourceId,
        utils::{format_sql_timestamp, parse_timestamp},
        window::WatermarkWindow,
    },
    source::SourceConnection,
    tracking::ColumnMetadata,
};
use planner::extraction::{QuerySynthesizer, TimestampMunging};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};
use tempfile::TempDir;

pub const WATERMARK_COLUMN: &str = "updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Row {
    pub id: i64,
    pub updated_at: DateTime<Utc>,
}

/// A single-schema database whose tables all carry `id` and `updated_at`.
///
/// `json_rows` honours the watermark predicate of synthesized extraction
/// queries, so the rows handed to an engine are exactly those a real source
/// would return for the job's window.
#[derive(Default)]
pub struct InMemoryDatabase {
    tables: Mutex<BTreeMap<String, Vec<Row>>>,
    next_id: Mutex<i64>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one row and returns its id.
    pub fn insert(&self, table: &str, updated_at: DateTime<Utc>) -> i64 {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(Row { id, updated_at });
        id
    }

    /// Inserts rows every `step` from `from` up to and including `to`.
    pub fn fill(&self, table: &str, from: DateTime<Utc>, to: DateTime<Utc>, step: TimeDelta) {
        let mut ts = from;
        while ts <= to {
            self.insert(table, ts);
            ts += step;
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Ids whose watermark falls in `(after, up_to]`.
    pub fn ids_between(&self, table: &str, after: DateTime<Utc>, up_to: DateTime<Utc>) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .rows(table)
            .into_iter()
            .filter(|r| r.updated_at > after && r.updated_at <= up_to)
            .map(|r| r.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn table(&self, name: &str) -> Result<Vec<Row>, DbError> {
        self.tables
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::Unknown(format!("relation {name} does not exist")))
    }
}

/// Reads the `(from, to]` bounds out of a synthesized extraction query.
pub fn window_from_query(sql: &str) -> Option<WatermarkWindow> {
    let bound = |marker: &str| {
        let (_, rest) = sql.split_once(marker)?;
        let (literal, _) = rest.split_once('\'')?;
        parse_timestamp(literal)
    };
    WatermarkWindow::new(bound(" > '")?, bound(" <= '")?)
}

/// Table named in the `FROM "schema"."table"` clause of a query.
fn table_from_query(sql: &str) -> Option<String> {
    let (_, rest) = sql.split_once(" FROM ")?;
    let qualified = rest.split_whitespace().next()?;
    let name = qualified.rsplit('.').next()?;
    Some(name.trim_matches('"').to_string())
}

#[async_trait]
impl SourceAdapter for InMemoryDatabase {
    async fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn watermark_tables(&self, _schema: &str, _column: &str) -> Result<Vec<String>, DbError> {
        Ok(self.tables.lock().unwrap().keys().cloned().collect())
    }

    async fn unlogged_tables(&self, _schema: &str) -> Result<Vec<String>, DbError> {
        Ok(Vec::new())
    }

    async fn table_columns(&self, _schema: &str, table: &str) -> Result<Vec<ColumnMetadata>, DbError> {
        self.table(table)?;
        Ok(vec![
            ColumnMetadata::new("id", "int8", 1).not_null(),
            ColumnMetadata::new(WATERMARK_COLUMN, "timestamptz", 2),
        ])
    }

    async fn primary_key(&self, _schema: &str, table: &str) -> Result<Option<String>, DbError> {
        self.table(table)?;
        Ok(Some("id".into()))
    }

    async fn row_count(&self, _schema: &str, table: &str) -> Result<i64, DbError> {
        Ok(self.table(table)?.len() as i64)
    }

    async fn min_watermark(
        &self,
        _schema: &str,
        table: &str,
        _column: &str,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        Ok(self.table(table)?.iter().map(|r| r.updated_at).min())
    }

    async fn json_rows(
        &self,
        query: &str,
    ) -> Result<BoxStream<'static, Result<String, DbError>>, DbError> {
        let table = table_from_query(query)
            .ok_or_else(|| DbError::Unknown(format!("no FROM clause in {query}")))?;
        let window = window_from_query(query)
            .ok_or_else(|| DbError::Unknown(format!("no watermark bounds in {query}")))?;

        let mut rows: Vec<Row> = self
            .table(&table)?
            .into_iter()
            .filter(|r| window.contains(&r.updated_at))
            .collect();
        rows.sort_by_key(|r| (r.updated_at, r.id));

        let encoded = rows.into_iter().map(|r| {
            Ok(serde_json::json!({
                "id": r.id,
                "updated_at": format_sql_timestamp(&r.updated_at),
            })
            .to_string())
        });
        Ok(futures::stream::iter(encoded.collect::<Vec<_>>()).boxed())
    }

    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Other("in-memory".into())
    }
}

#[derive(Default)]
pub struct StaticConnector {
    sources: HashMap<SourceId, Arc<InMemoryDatabase>>,
}

impl StaticConnector {
    pub fn with(mut self, id: u32, db: Arc<InMemoryDatabase>) -> Self {
        self.sources.insert(SourceId::new(id), db);
        self
    }
}

#[async_trait]
impl SourceConnector for StaticConnector {
    async fn connect(
        &self,
        connection: &SourceConnection,
    ) -> Result<Arc<dyn SourceAdapter>, ConnectorError> {
        self.sources
            .get(&connection.id)
            .map(|db| db.clone() as Arc<dyn SourceAdapter>)
            .ok_or_else(|| ConnectorError::InvalidUrl(connection.redacted_url()))
    }
}

/// Sink that keeps every delivered row id, per table, in arrival order.
///
/// A run can be told to fail; a failing run still delivers the first half of
/// its rows before reporting the error, like a sink that dies mid-stream.
#[derive(Default)]
pub struct CollectingSink {
    delivered: Mutex<HashMap<String, Vec<i64>>>,
    runs: Mutex<HashMap<String, usize>>,
    fail_runs: Mutex<HashMap<String, Vec<usize>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `run`-th run (starting at 1) of `table` fail.
    pub fn fail_run(&self, table: &str, run: usize) {
        self.fail_runs
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(run);
    }

    pub fn delivered(&self, table: &str) -> Vec<i64> {
        self.delivered
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn delivered_sorted(&self, table: &str) -> Vec<i64> {
        let mut ids = self.delivered(table);
        ids.sort_unstable();
        ids
    }

    pub fn runs(&self, table: &str) -> usize {
        self.runs.lock().unwrap().get(table).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PipelineEngine for CollectingSink {
    async fn run(
        &self,
        job: &JobDescription,
        source: Arc<dyn SourceAdapter>,
    ) -> Result<PipelineOutcome, PipelineError> {
        let run = {
            let mut runs = self.runs.lock().unwrap();
            let run = runs.entry(job.table.clone()).or_default();
            *run += 1;
            *run
        };
        let fails = self
            .fail_runs
            .lock()
            .unwrap()
            .get(&job.table)
            .is_some_and(|runs| runs.contains(&run));

        let rows: Vec<String> = source.json_rows(&job.query).await?.try_collect().await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let value: serde_json::Value = serde_json::from_str(row)
                .map_err(|e| PipelineError::Failed(format!("bad row {row}: {e}")))?;
            let id = value["id"]
                .as_i64()
                .ok_or_else(|| PipelineError::Failed(format!("row without id: {row}")))?;
            ids.push(id);
        }

        let keep = if fails { ids.len() / 2 } else { ids.len() };
        self.delivered
            .lock()
            .unwrap()
            .entry(job.table.clone())
            .or_default()
            .extend_from_slice(&ids[..keep]);

        if fails {
            return Err(PipelineError::Failed(format!(
                "sink closed after {keep} rows of {}",
                job.table
            )));
        }
        Ok(PipelineOutcome {
            rows: Some(ids.len() as u64),
        })
    }

    fn name(&self) -> &'static str {
        "collecting"
    }
}

pub fn source_connection(id: u32) -> SourceConnection {
    SourceConnection {
        id: SourceId::new(id),
        url: format!("postgres://app:secret@db{id}/app"),
        schema: "public".into(),
        watermark_column: WATERMARK_COLUMN.into(),
        replication_buffer: Duration::from_secs(60),
        target_batch_size: 4096,
        is_replica: false,
    }
}

/// A state store in a temporary directory plus everything needed to build
/// orchestrators over it.
pub struct TestEnv {
    pub dir: TempDir,
    pub state: Arc<SledStateStore>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(SledStateStore::open(dir.path().join("state")).unwrap());
        Self { dir, state }
    }

    pub fn state(&self) -> Arc<dyn StateStore> {
        self.state.clone()
    }

    pub fn orchestrator(
        &self,
        sources: Vec<SourceConnection>,
        connector: StaticConnector,
        engine: Arc<dyn PipelineEngine>,
    ) -> Orchestrator {
        Orchestrator::new(OrchestratorParams {
            sources,
            state: self.state(),
            connector: Arc::new(connector),
            engine,
            policy: WatermarkPolicy::default(),
            synthesizer: QuerySynthesizer::new(TimestampMunging::Off),
            batching: BatchingParams::default(),
            max_concurrent_jobs: 4,
            descriptor_dir: None,
        })
        .with_concurrency(4)
    }
}

/// Fails the test if any id appears more than once.
pub fn assert_no_duplicates(ids: &[i64]) {
    let mut seen = std::collections::HashSet::new();
    for id in ids {
        assert!(seen.insert(*id), "row {id} delivered more than once");
    }
}
