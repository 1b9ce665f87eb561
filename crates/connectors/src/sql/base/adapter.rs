use crate::sql::base::error::DbError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use model::tracking::ColumnMetadata;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseKind {
    Postgres,
    Other(String),
}

/// Read-side operations the engine needs from a relational source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn ping(&self) -> Result<(), DbError>;

    // Discovery
    /// Base tables in `schema` exposing `watermark_column`.
    async fn watermark_tables(
        &self,
        schema: &str,
        watermark_column: &str,
    ) -> Result<Vec<String>, DbError>;
    async fn unlogged_tables(&self, schema: &str) -> Result<Vec<String>, DbError>;

    // Introspection
    async fn table_columns(&self, schema: &str, table: &str)
    -> Result<Vec<ColumnMetadata>, DbError>;
    async fn primary_key(&self, schema: &str, table: &str) -> Result<Option<String>, DbError>;
    /// Catalog estimate, not an exact `COUNT(*)`.
    async fn row_count(&self, schema: &str, table: &str) -> Result<i64, DbError>;
    /// `None` when the table holds no non-null watermark value.
    async fn min_watermark(
        &self,
        schema: &str,
        table: &str,
        column: &str,
    ) -> Result<Option<DateTime<Utc>>, DbError>;

    // Extraction
    /// Runs `query` and yields each row as a JSON object in text form.
    async fn json_rows(&self, query: &str)
    -> Result<BoxStream<'static, Result<String, DbError>>, DbError>;

    fn kind(&self) -> DatabaseKind;
}
