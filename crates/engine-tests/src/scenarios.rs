use crate::fixtures::{
    CollectingSink, InMemoryDatabase, StaticConnector, TestEnv, assert_no_duplicates,
    source_connection,
};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use engine_core::state::StateStore;
use engine_runtime::{
    discovery::{seed_backup_path, seed_source},
    orchestrator::TableOutcome,
    pipeline::{dry_run::DryRunEngine, file::FileSinkEngine},
    provision::{FileProvisioner, ProvisionStatus, provision_tables},
};
use model::core::{identifiers::TableKey, window::WatermarkWindow};
use std::{collections::HashMap, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

fn at(month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, month, day, hour, 0, 0).unwrap()
}

const BUFFER: TimeDelta = TimeDelta::seconds(60);

async fn seed(env: &TestEnv, db: &Arc<InMemoryDatabase>) {
    let report = seed_source(&source_connection(1), db.as_ref(), env.state.as_ref())
        .await
        .unwrap();
    assert!(report.skipped.is_empty(), "{:?}", report.skipped);
}

async fn watermark(env: &TestEnv, table: &str) -> DateTime<Utc> {
    env.state
        .get(&TableKey::new(1, table))
        .await
        .unwrap()
        .unwrap()
        .watermark
}

#[traced_test]
#[tokio::test]
async fn every_row_is_delivered_once_across_catch_up_and_steady_state() {
    let env = TestEnv::new();
    let db = Arc::new(InMemoryDatabase::new());
    db.fill("orders", at(1, 1, 0), at(3, 1, 0), TimeDelta::hours(1));
    seed(&env, &db).await;
    let seeded_at = watermark(&env, "orders").await;
    assert_eq!(seeded_at, at(1, 1, 0));

    let sink = Arc::new(CollectingSink::new());
    let orchestrator = env.orchestrator(
        vec![source_connection(1)],
        StaticConnector::default().with(1, db.clone()),
        sink.clone(),
    );
    let cancel = CancellationToken::new();
    let key = TableKey::new(1, "orders");

    let start = at(3, 1, 12);
    let mut now = start;
    let mut commits = 0;
    for cycle in 0..10 {
        now = start + TimeDelta::hours(6 * cycle);
        let report = orchestrator.run_cycle_at(now, &cancel).await;
        commits += report.committed();
        assert_eq!(report.failed(), 0);

        if cycle == 0 {
            // Nothing changed since seeding and the table is months behind.
            assert_eq!(
                report.table(&key),
                Some(&TableOutcome::Committed {
                    window: WatermarkWindow::new(at(1, 1, 0), at(1, 15, 0)).unwrap(),
                    rows: Some(14 * 24),
                })
            );
        } else {
            assert!(
                matches!(report.table(&key), Some(TableOutcome::Committed { .. })),
                "cycle {cycle}: {:?}",
                report.table(&key)
            );
        }

        // Still replicating: newer than the ceiling of this cycle.
        db.insert("orders", now - TimeDelta::seconds(30));
    }

    let committed = watermark(&env, "orders").await;
    assert_eq!(committed, now - BUFFER);

    let delivered = sink.delivered("orders");
    assert_no_duplicates(&delivered);
    assert_eq!(
        sink.delivered_sorted("orders"),
        db.ids_between("orders", seeded_at, committed)
    );
    // Only the seed row and the row inserted after the last cycle are left.
    assert_eq!(delivered.len(), db.rows("orders").len() - 2);
    assert_eq!(commits, 10);
}

#[tokio::test]
async fn failed_window_is_redelivered_while_sibling_keeps_going() {
    let env = TestEnv::new();
    let db = Arc::new(InMemoryDatabase::new());
    db.fill("orders", at(1, 1, 0), at(3, 1, 0), TimeDelta::hours(1));
    db.fill("events", at(1, 1, 0), at(3, 1, 0), TimeDelta::hours(1));
    seed(&env, &db).await;

    let sink = Arc::new(CollectingSink::new());
    sink.fail_run("orders", 2);
    let orchestrator = env.orchestrator(
        vec![source_connection(1)],
        StaticConnector::default().with(1, db.clone()),
        sink.clone(),
    );
    let cancel = CancellationToken::new();
    let orders = TableKey::new(1, "orders");
    let events = TableKey::new(1, "events");

    let start = at(3, 1, 12);
    let mut now = start;
    for cycle in 0..6 {
        now = start + TimeDelta::hours(6 * cycle);
        let report = orchestrator.run_cycle_at(now, &cancel).await;

        if cycle == 1 {
            assert!(matches!(
                report.table(&orders),
                Some(TableOutcome::Failed { .. })
            ));
            assert!(matches!(
                report.table(&events),
                Some(TableOutcome::Committed { .. })
            ));
            assert_eq!(watermark(&env, "orders").await, at(1, 15, 0));
            assert_eq!(watermark(&env, "events").await, at(1, 29, 0));
        }
    }

    // Both tables caught up in the end.
    let ceiling = now - BUFFER;
    assert_eq!(watermark(&env, "orders").await, ceiling);
    assert_eq!(watermark(&env, "events").await, ceiling);
    assert_eq!(sink.runs("orders"), 6);

    let events_delivered = sink.delivered("events");
    assert_no_duplicates(&events_delivered);
    assert_eq!(
        sink.delivered_sorted("events"),
        db.ids_between("events", at(1, 1, 0), ceiling)
    );

    // Orders got every row at least once; repeats come only from the
    // window whose run failed half way.
    let failed_window = WatermarkWindow::new(at(1, 15, 0), at(1, 29, 0)).unwrap();
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for id in sink.delivered("orders") {
        *counts.entry(id).or_default() += 1;
    }
    let expected = db.ids_between("orders", at(1, 1, 0), ceiling);
    assert_eq!(counts.len(), expected.len());
    assert!(expected.iter().all(|id| counts.contains_key(id)));

    let by_id: HashMap<i64, DateTime<Utc>> = db
        .rows("orders")
        .into_iter()
        .map(|r| (r.id, r.updated_at))
        .collect();
    let repeated: Vec<i64> = counts
        .iter()
        .filter(|(_, n)| **n > 1)
        .map(|(id, _)| *id)
        .collect();
    assert_eq!(repeated.len(), 14 * 24 / 2);
    assert!(
        repeated
            .iter()
            .all(|id| failed_window.contains(&by_id[id]))
    );
}

#[tokio::test]
async fn seed_provision_and_file_sink_flow() {
    let env = TestEnv::new();
    let db = Arc::new(InMemoryDatabase::new());
    db.fill("orders", at(1, 1, 0), at(1, 3, 0), TimeDelta::hours(1));
    db.fill("customers", at(1, 1, 0), at(1, 2, 0), TimeDelta::hours(6));

    let report = seed_source(&source_connection(1), db.as_ref(), env.state.as_ref())
        .await
        .unwrap();
    assert_eq!(
        report.seeded,
        vec![TableKey::new(1, "customers"), TableKey::new(1, "orders")]
    );

    let backup = seed_backup_path(&env.dir.path().join("state"));
    assert_eq!(env.state.export_jsonl(&backup).await.unwrap(), 2);
    assert_eq!(
        tokio::fs::read_to_string(&backup).await.unwrap().lines().count(),
        2
    );

    let provisioner = FileProvisioner::new(env.dir.path().join("schemas"));
    let provisioned = provision_tables(env.state.as_ref(), &provisioner, None)
        .await
        .unwrap();
    assert_eq!(
        provisioned.status(&TableKey::new(1, "orders")),
        Some(&ProvisionStatus::Created)
    );
    assert!(provisioner.schema_path("orders_cdc").exists());
    let cached = env
        .state
        .get(&TableKey::new(1, "orders"))
        .await
        .unwrap()
        .unwrap()
        .destination_schema;
    assert!(cached.is_some_and(|json| json.contains("snapshot_tm")));

    let again = provision_tables(env.state.as_ref(), &provisioner, None)
        .await
        .unwrap();
    assert_eq!(
        again.status(&TableKey::new(1, "customers")),
        Some(&ProvisionStatus::Unchanged)
    );

    let out_dir = env.dir.path().join("out");
    let engine = Arc::new(FileSinkEngine::new(out_dir.clone()));
    let orchestrator = env.orchestrator(
        vec![source_connection(1)],
        StaticConnector::default().with(1, db.clone()),
        engine.clone(),
    );
    let cycle = orchestrator
        .run_cycle_at(at(2, 1, 0), &CancellationToken::new())
        .await;
    assert_eq!(cycle.committed(), 2);
    assert_eq!(cycle.failed(), 0);

    let written = tokio::fs::read_to_string(engine.output_path("orders_cdc"))
        .await
        .unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 48);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["updated_at"], "2024-01-01 01:00:00.000000");

    let customers = tokio::fs::read_to_string(engine.output_path("customers_cdc"))
        .await
        .unwrap();
    assert_eq!(customers.lines().count(), 4);

    assert_eq!(watermark(&env, "orders").await, at(1, 15, 0));
}

#[tokio::test]
async fn dry_run_then_live_run_extracts_the_same_window() {
    let env = TestEnv::new();
    let db = Arc::new(InMemoryDatabase::new());
    db.fill("orders", at(1, 1, 0), at(1, 10, 0), TimeDelta::hours(1));
    seed(&env, &db).await;
    let key = TableKey::new(1, "orders");
    let now = at(1, 10, 12);
    let cancel = CancellationToken::new();

    let dry = env.orchestrator(
        vec![source_connection(1)],
        StaticConnector::default().with(1, db.clone()),
        Arc::new(DryRunEngine),
    );
    let first = dry.run_cycle_at(now, &cancel).await;
    let second = dry.run_cycle_at(now + TimeDelta::minutes(1), &cancel).await;
    let Some(TableOutcome::Extracted { window: first_window }) = first.table(&key).cloned() else {
        panic!("unexpected outcome {:?}", first.table(&key));
    };
    let Some(TableOutcome::Extracted { window: second_window }) = second.table(&key).cloned()
    else {
        panic!("unexpected outcome {:?}", second.table(&key));
    };
    assert_eq!(first_window.from, second_window.from);
    assert_eq!(watermark(&env, "orders").await, at(1, 1, 0));

    let sink = Arc::new(CollectingSink::new());
    let live = env.orchestrator(
        vec![source_connection(1)],
        StaticConnector::default().with(1, db.clone()),
        sink.clone(),
    );
    let report = live.run_cycle_at(now, &cancel).await;
    assert_eq!(
        report.table(&key),
        Some(&TableOutcome::Committed {
            window: first_window,
            rows: Some(9 * 24),
        })
    );
    assert_eq!(sink.delivered_sorted("orders").len(), 9 * 24);
}
