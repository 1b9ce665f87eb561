use crate::{error::StateError, state::StateStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{
    core::identifiers::{SourceId, TableKey},
    tracking::TrackedTable,
};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;
use tracing::debug;

const TABLE_PREFIX: &str = "tbl:";

pub struct SledStateStore {
    db: sled::Db,
}

impl SledStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    #[inline]
    fn table_key(key: &TableKey) -> String {
        format!("{TABLE_PREFIX}{}:{}", key.source, key.name)
    }

    #[inline]
    fn source_prefix(source: SourceId) -> String {
        format!("{TABLE_PREFIX}{source}:")
    }

    /// Read-modify-write of one record inside a sled transaction.
    fn update<F>(&self, key: &TableKey, mutate: F) -> Result<TrackedTable, StateError>
    where
        F: Fn(Option<TrackedTable>) -> Result<TrackedTable, StateError>,
    {
        let db_key = Self::table_key(key);

        let result = self.db.transaction(|tx_db| {
            let existing = match tx_db.get(db_key.as_bytes())? {
                Some(bytes) => Some(
                    bincode::deserialize::<TrackedTable>(&bytes)
                        .map_err(|e| ConflictableTransactionError::Abort(StateError::from(e)))?,
                ),
                None => None,
            };

            let updated = mutate(existing).map_err(ConflictableTransactionError::Abort)?;
            let bytes = bincode::serialize(&updated)
                .map_err(|e| ConflictableTransactionError::Abort(StateError::from(e)))?;
            tx_db.insert(db_key.as_bytes(), bytes)?;
            Ok(updated)
        });

        match result {
            Ok(table) => Ok(table),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(StateError::Storage(e)),
        }
    }
}

#[async_trait]
impl StateStore for SledStateStore {
    async fn upsert_seed(&self, table: &TrackedTable) -> Result<TrackedTable, StateError> {
        let stored = self.update(&table.key, |existing| {
            Ok(match existing {
                None => table.clone(),
                Some(current) => TrackedTable {
                    schema: table.schema.clone(),
                    columns: table.columns.clone(),
                    primary_key: table.primary_key.clone(),
                    last_row_count: table.last_row_count,
                    ..current
                },
            })
        })?;
        self.db.flush_async().await?;

        debug!(table = %table.key, watermark = %stored.watermark, "Seeded tracked table");
        Ok(stored)
    }

    async fn list_tracked(
        &self,
        source: Option<SourceId>,
    ) -> Result<Vec<TrackedTable>, StateError> {
        let prefix = match source {
            Some(source) => Self::source_prefix(source),
            None => TABLE_PREFIX.to_string(),
        };

        let mut tables = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (_key, value) = item?;
            tables.push(bincode::deserialize::<TrackedTable>(&value)?);
        }
        tables.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(tables)
    }

    async fn get(&self, key: &TableKey) -> Result<Option<TrackedTable>, StateError> {
        match self.db.get(Self::table_key(key))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn commit_watermark(
        &self,
        key: &TableKey,
        watermark: DateTime<Utc>,
        row_count: i64,
    ) -> Result<(), StateError> {
        let run_at = Utc::now();
        self.update(key, |existing| {
            let current = existing.ok_or_else(|| StateError::NotTracked(key.clone()))?;
            if watermark < current.watermark {
                return Err(StateError::WatermarkRegression {
                    key: key.clone(),
                    current: current.watermark,
                    proposed: watermark,
                });
            }
            Ok(TrackedTable {
                watermark,
                last_row_count: row_count,
                last_run_at: Some(run_at),
                ..current
            })
        })?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn cache_destination_schema(
        &self,
        key: &TableKey,
        schema: &str,
    ) -> Result<(), StateError> {
        self.update(key, |existing| {
            let current = existing.ok_or_else(|| StateError::NotTracked(key.clone()))?;
            Ok(TrackedTable {
                destination_schema: Some(schema.to_string()),
                ..current
            })
        })?;
        self.db.flush_async().await?;
        Ok(())
    }
}
