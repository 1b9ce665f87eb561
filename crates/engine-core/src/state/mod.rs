use crate::error::StateError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{
    core::identifiers::{SourceId, TableKey},
    tracking::TrackedTable,
};
use std::path::Path;

pub mod sled_store;

/// Durable mapping from (source, table) to its sync metadata.
///
/// Every mutation touches exactly one table record.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Inserts a new record or refreshes the metadata of an existing one.
    ///
    /// The watermark and watermark column of an existing record are kept as
    /// they are; seeding only sets them for tables seen for the first time.
    async fn upsert_seed(&self, table: &TrackedTable) -> Result<TrackedTable, StateError>;

    async fn list_tracked(&self, source: Option<SourceId>)
    -> Result<Vec<TrackedTable>, StateError>;

    async fn get(&self, key: &TableKey) -> Result<Option<TrackedTable>, StateError>;

    /// Advances the persisted watermark and row count of one table.
    ///
    /// Fails with [`StateError::WatermarkRegression`] if `watermark` is older
    /// than the stored one.
    async fn commit_watermark(
        &self,
        key: &TableKey,
        watermark: DateTime<Utc>,
        row_count: i64,
    ) -> Result<(), StateError>;

    async fn cache_destination_schema(&self, key: &TableKey, schema: &str)
    -> Result<(), StateError>;

    /// Writes every tracked table as one JSON document per line.
    async fn export_jsonl(&self, path: &Path) -> Result<usize, StateError> {
        let tables = self.list_tracked(None).await?;
        let mut out = String::new();
        for table in &tables {
            out.push_str(&serde_json::to_string(table)?);
            out.push('\n');
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, out).await?;
        Ok(tables.len())
    }
}
