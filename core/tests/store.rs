//! Build-log store tests.

use zombie_core::{
    event::{BuildEvent, Stage},
    store::BuildStore,
};

fn open_run(store: &BuildStore, run_id: &str) {
    store.migrate().unwrap();
    store.insert_run(run_id, "0.1.0", "/data", "{}").unwrap();
}

#[test]
fn file_and_memory_logs_open_in_wal_mode() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("build_log.db");
    for target in [path.to_str().unwrap(), ":memory:"] {
        let store = BuildStore::open(target).unwrap();
        open_run(&store, "run-1");
        assert_eq!(store.run_rows_out("run-1").unwrap(), None);
    }
    assert!(path.exists());
}

#[test]
fn events_append_in_sequence_and_runs_complete() {
    let mut store = BuildStore::in_memory().unwrap();
    open_run(&store, "run-1");

    let events = vec![
        BuildEvent::RunInitialized { run_id: "run-1".into() },
        BuildEvent::row_count(Stage::Registry, "after dedup", 12),
        BuildEvent::source_skipped(Stage::Financial, "input/NCUA", "not found"),
    ];
    store.append_events("run-1", 0, &events[..2]).unwrap();
    store.append_events("run-1", 2, &events[2..]).unwrap();

    let entries = store.events_for_run("run-1").unwrap();
    assert_eq!(entries.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(entries[1].stage, "registry");
    assert_eq!(entries[2].event_type, "source_skipped");
    let decoded: BuildEvent = serde_json::from_str(&entries[1].payload).unwrap();
    assert_eq!(decoded, events[1]);
    assert_eq!(store.event_count("run-1", "row_count").unwrap(), 1);

    store.complete_run("run-1", 12).unwrap();
    assert_eq!(store.run_rows_out("run-1").unwrap(), Some(12));
}
