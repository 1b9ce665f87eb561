//! Discovery and seeding of tracked tables.

use crate::error::EngineError;
use connectors::sql::base::{adapter::SourceAdapter, source::SourceConnector};
use engine_core::state::StateStore;
use model::{
    core::identifiers::{SourceId, TableKey},
    source::SourceConnection,
    tracking::TrackedTable,
};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

pub const SEED_BACKUP_FILE: &str = "seed_state.jsonl";

#[derive(Debug, Default)]
pub struct SeedReport {
    pub seeded: Vec<TableKey>,
    pub skipped: Vec<(String, String)>,
}

/// Finds the tables of one source that expose its watermark column and
/// records them in the state store.
///
/// Tables that cannot be introspected, or whose watermark column holds no
/// value yet, are skipped and picked up by a later seed.
pub async fn seed_source(
    source: &SourceConnection,
    adapter: &dyn SourceAdapter,
    state: &dyn StateStore,
) -> Result<SeedReport, EngineError> {
    let mut tables = adapter
        .watermark_tables(&source.schema, &source.watermark_column)
        .await?;
    info!(
        source = %source.id,
        schema = %source.schema,
        column = %source.watermark_column,
        tables = tables.len(),
        "Discovered watermark tables"
    );

    if source.is_replica {
        let unlogged: HashSet<String> = adapter
            .unlogged_tables(&source.schema)
            .await?
            .into_iter()
            .collect();
        tables.retain(|t| {
            let keep = !unlogged.contains(t);
            if !keep {
                info!(source = %source.id, table = %t, "Skipping unlogged table on replica");
            }
            keep
        });
    }

    let mut report = SeedReport::default();
    for name in tables {
        match seed_table(source, adapter, &name).await {
            Ok(Some(table)) => match state.upsert_seed(&table).await {
                Ok(stored) => {
                    info!(
                        table = %stored.key,
                        watermark = %stored.watermark,
                        rows = stored.last_row_count,
                        "Seeded table"
                    );
                    report.seeded.push(stored.key);
                }
                Err(e) => {
                    warn!(table = %table.key, error = %e, "Failed to store seeded table");
                    report.skipped.push((name, e.to_string()));
                }
            },
            Ok(None) => {
                warn!(source = %source.id, table = %name, "No watermark value yet, skipping");
                report.skipped.push((name, "empty watermark column".into()));
            }
            Err(e) => {
                warn!(source = %source.id, table = %name, error = %e, "Failed to seed table");
                report.skipped.push((name, e.to_string()));
            }
        }
    }

    Ok(report)
}

/// Seeds every source in turn. A source that cannot be reached or listed
/// is logged and reported; the remaining sources are still seeded.
pub async fn seed_sources(
    sources: &[SourceConnection],
    connector: &dyn SourceConnector,
    state: &dyn StateStore,
) -> Vec<(SourceId, Result<SeedReport, EngineError>)> {
    let mut results = Vec::with_capacity(sources.len());
    for source in sources {
        let result = match connector.connect(source).await {
            Ok(adapter) => seed_source(source, adapter.as_ref(), state).await,
            Err(error) => Err(EngineError::Connect {
                source_id: source.id,
                error,
            }),
        };
        match &result {
            Ok(report) => info!(
                source = %source.id,
                seeded = report.seeded.len(),
                skipped = report.skipped.len(),
                "Seed finished"
            ),
            Err(e) => warn!(source = %source.id, error = %e, "Seeding source failed"),
        }
        results.push((source.id, result));
    }
    results
}

async fn seed_table(
    source: &SourceConnection,
    adapter: &dyn SourceAdapter,
    name: &str,
) -> Result<Option<TrackedTable>, EngineError> {
    let schema = &source.schema;
    let Some(watermark) = adapter
        .min_watermark(schema, name, &source.watermark_column)
        .await?
    else {
        return Ok(None);
    };

    let columns = adapter.table_columns(schema, name).await?;
    let row_count = adapter.row_count(schema, name).await?;
    let primary_key = match adapter.primary_key(schema, name).await {
        Ok(pk) => pk,
        Err(e) => {
            warn!(source = %source.id, table = %name, error = %e, "Primary key lookup failed");
            None
        }
    };

    Ok(Some(TrackedTable {
        key: TableKey::new(source.id, name),
        schema: schema.clone(),
        columns,
        primary_key,
        destination_schema: None,
        watermark_column: source.watermark_column.clone(),
        watermark,
        last_row_count: row_count,
        last_run_at: None,
    }))
}

/// Location of the seed backup, next to the state directory.
pub fn seed_backup_path(state_path: &Path) -> PathBuf {
    state_path
        .parent()
        .map(|dir| dir.join(SEED_BACKUP_FILE))
        .unwrap_or_else(|| PathBuf::from(SEED_BACKUP_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingStore, MockConnector, MockSource, MockTable, connection};
    use std::sync::Arc;
    use chrono::{TimeZone, Utc};
    use engine_core::state::sled_store::SledStateStore;

    #[tokio::test]
    async fn seeds_tables_and_skips_empty_ones() {
        let dir = tempfile::tempdir().unwrap();
        let state = SledStateStore::open(dir.path()).unwrap();
        let first = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let adapter = MockSource::with_tables(vec![
            ("orders", MockTable::new(100, Some(first))),
            ("empty", MockTable::new(0, None)),
        ]);

        let report = seed_source(&connection(1), &adapter, &state).await.unwrap();
        assert_eq!(report.seeded, [TableKey::new(1, "orders")]);
        assert_eq!(report.skipped.len(), 1);

        let stored = state.get(&TableKey::new(1, "orders")).await.unwrap().unwrap();
        assert_eq!(stored.watermark, first);
        assert_eq!(stored.last_row_count, 100);
        assert_eq!(stored.primary_key.as_deref(), Some("id"));
        assert_eq!(stored.watermark_column, "updated_at");
    }

    #[tokio::test]
    async fn reseeding_keeps_committed_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let state = SledStateStore::open(dir.path()).unwrap();
        let first = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2023, 7, 1, 0, 0, 0).unwrap();
        let adapter = MockSource::with_tables(vec![("orders", MockTable::new(100, Some(first)))]);
        let key = TableKey::new(1, "orders");

        seed_source(&connection(1), &adapter, &state).await.unwrap();
        state.commit_watermark(&key, later, 150).await.unwrap();
        adapter.set_row_count("orders", Some(175));
        seed_source(&connection(1), &adapter, &state).await.unwrap();

        let stored = state.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.watermark, later);
        assert_eq!(stored.last_row_count, 175);
    }

    #[tokio::test]
    async fn replicas_skip_unlogged_tables() {
        let dir = tempfile::tempdir().unwrap();
        let state = SledStateStore::open(dir.path()).unwrap();
        let first = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let mut scratch = MockTable::new(5, Some(first));
        scratch.unlogged = true;
        let adapter = MockSource::with_tables(vec![
            ("orders", MockTable::new(100, Some(first))),
            ("scratch", scratch),
        ]);

        let mut replica = connection(1);
        replica.is_replica = true;
        let report = seed_source(&replica, &adapter, &state).await.unwrap();
        assert_eq!(report.seeded, [TableKey::new(1, "orders")]);

        let report = seed_source(&connection(1), &adapter, &state).await.unwrap();
        assert_eq!(report.seeded.len(), 2);
    }

    #[tokio::test]
    async fn row_count_failure_skips_table() {
        let dir = tempfile::tempdir().unwrap();
        let state = SledStateStore::open(dir.path()).unwrap();
        let first = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let mut broken = MockTable::new(0, Some(first));
        broken.row_count = None;
        let adapter = MockSource::with_tables(vec![("broken", broken)]);

        let report = seed_source(&connection(1), &adapter, &state).await.unwrap();
        assert!(report.seeded.is_empty());
        assert_eq!(report.skipped[0].0, "broken");
        assert!(state.list_tracked(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_skips_only_that_table() {
        let dir = tempfile::tempdir().unwrap();
        let state = FailingStore::new(SledStateStore::open(dir.path()).unwrap(), "a_first");
        let first = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let adapter = MockSource::with_tables(vec![
            ("a_first", MockTable::new(10, Some(first))),
            ("b_second", MockTable::new(20, Some(first))),
        ]);

        let report = seed_source(&connection(1), &adapter, &state).await.unwrap();

        assert_eq!(report.seeded, [TableKey::new(1, "b_second")]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "a_first");
        let tracked = state.list_tracked(None).await.unwrap();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].name(), "b_second");
    }

    #[tokio::test]
    async fn unreachable_source_does_not_stop_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let state = SledStateStore::open(dir.path()).unwrap();
        let first = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let adapter = Arc::new(MockSource::with_tables(vec![(
            "orders",
            MockTable::new(10, Some(first)),
        )]));
        let connector = MockConnector {
            sources: [(SourceId::new(2), adapter)].into_iter().collect(),
        };

        let results = seed_sources(&[connection(1), connection(2)], &connector, &state).await;

        assert!(matches!(results[0], (_, Err(EngineError::Connect { .. }))));
        let (id, second) = &results[1];
        assert_eq!(*id, SourceId::new(2));
        assert_eq!(
            second.as_ref().unwrap().seeded,
            [TableKey::new(2, "orders")]
        );
    }

    #[test]
    fn backup_lives_next_to_state_dir() {
        assert_eq!(
            seed_backup_path(Path::new("/home/u/.leftshove/state")),
            PathBuf::from("/home/u/.leftshove/seed_state.jsonl")
        );
    }
}
