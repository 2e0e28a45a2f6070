//! Integration tests for the full pipeline.
//!
//! Tests the complete flow: create files in a date-sharded tree, scan and
//! sequence them against a history store, apply and revert them through a
//! loader and an execution context.

use std::fs;
use std::path::Path;

use chrono::{TimeZone, Utc};
use migtree::{
    Direction, FixedClock, HistoryStore, MigrateConfig, Migration, MigrationEngine,
    MigrationError, Outcome, Progress, Registry, Result, SqlFileLoader,
};
use migtree_store::{MemoryHistory, RecordingContext, SqliteContext, SqliteStore};
use tempfile::TempDir;

// ── Helpers ──────────────────────────────────────────────────────────

fn config_in(dir: &TempDir) -> MigrateConfig {
    MigrateConfig {
        root: dir.path().join("migrations"),
        ..MigrateConfig::default()
    }
}

fn write_migration(root: &Path, subpath: &str, identifier: &str, content: &str) {
    let dir = root.join(subpath);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{identifier}.sql")), content).unwrap();
}

fn clock() -> FixedClock {
    FixedClock(Utc.with_ymd_and_hms(2024, 3, 5, 14, 22, 1).unwrap())
}

type SqlEngine = MigrationEngine<MemoryHistory, SqlFileLoader<RecordingContext>, RecordingContext>;

fn sql_engine(config: MigrateConfig, history: MemoryHistory, ctx: RecordingContext) -> SqlEngine {
    MigrationEngine::new(config, history, SqlFileLoader::new(), ctx)
        .unwrap()
        .with_clock(clock())
}

fn pending_ids<H, L, C>(engine: &MigrationEngine<H, L, C>) -> Vec<String>
where
    H: HistoryStore,
    L: migtree::Loader<C>,
{
    engine
        .pending()
        .unwrap()
        .into_iter()
        .map(|r| r.identifier)
        .collect()
}

// ── Create ───────────────────────────────────────────────────────────

#[test]
fn create_writes_into_current_month() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let root = config.root.clone();
    let engine = sql_engine(config, MemoryHistory::new(), RecordingContext::new());

    let plan = engine.plan_create("add_users_table").unwrap();
    assert_eq!(plan.generated.identifier, "m240305_142201_add_users_table");
    assert!(!plan.file.exists());

    let file = engine.create(&plan).unwrap();
    assert_eq!(
        file,
        root.join("2024").join("03").join("m240305_142201_add_users_table.sql")
    );
    assert!(fs::read_to_string(&file)
        .unwrap()
        .contains("-- migration: m240305_142201_add_users_table"));

    // The new file is immediately visible as pending.
    assert_eq!(pending_ids(&engine), vec!["m240305_142201_add_users_table"]);
}

#[test]
fn create_namespaced_migration() {
    let dir = tempfile::tempdir().unwrap();
    let config = MigrateConfig {
        namespace_mode: true,
        namespaces: vec![r"app\migrations".to_string()],
        ..config_in(&dir)
    };
    let engine = sql_engine(config, MemoryHistory::new(), RecordingContext::new());

    let plan = engine.plan_create("createPost").unwrap();
    assert_eq!(plan.generated.identifier, "M240305142201CreatePost");
    assert_eq!(plan.generated.namespace.as_deref(), Some(r"app\migrations"));
    assert_eq!(plan.generated.qualified(), r"app\migrations\M240305142201CreatePost");

    let file = engine.create(&plan).unwrap();
    assert!(file.ends_with(Path::new("2024/03/M240305142201CreatePost.sql")));
    assert_eq!(pending_ids(&engine), vec!["M240305142201CreatePost"]);
}

#[test]
fn create_rejects_invalid_names() {
    let dir = tempfile::tempdir().unwrap();
    let engine = sql_engine(config_in(&dir), MemoryHistory::new(), RecordingContext::new());

    assert!(matches!(
        engine.plan_create("add-users"),
        Err(MigrationError::InvalidName(_))
    ));
    assert!(!dir.path().join("migrations").exists());
}

#[test]
fn create_never_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    let engine = sql_engine(config_in(&dir), MemoryHistory::new(), RecordingContext::new());

    let plan = engine.plan_create("add_users_table").unwrap();
    engine.create(&plan).unwrap();
    fs::write(&plan.file, "-- up\nSELECT 'edited';\n").unwrap();

    let again = engine.plan_create("add_users_table").unwrap();
    assert!(matches!(
        engine.create(&again),
        Err(MigrationError::AlreadyExists(_))
    ));
    assert_eq!(
        fs::read_to_string(&plan.file).unwrap(),
        "-- up\nSELECT 'edited';\n"
    );
}

// ── Discovery ────────────────────────────────────────────────────────

#[test]
fn pending_merges_months_in_timestamp_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    write_migration(&config.root, "2024/02", "m240201_000000_b", "");
    write_migration(&config.root, "2023/12", "m231231_235959_a", "");
    write_migration(&config.root, "2024/02", "M240215000000CreatePost", "");
    write_migration(&config.root, "", "m230101_000000_flat", "");
    fs::write(config.root.join("2024").join("02").join("README.md"), "notes").unwrap();

    let engine = sql_engine(config, MemoryHistory::new(), RecordingContext::new());
    assert_eq!(
        pending_ids(&engine),
        vec![
            "m230101_000000_flat",
            "m231231_235959_a",
            "m240201_000000_b",
            "M240215000000CreatePost",
        ]
    );
}

#[test]
fn pending_is_stable_and_excludes_applied() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    write_migration(&config.root, "2024/01", "m240101_000000_a", "");
    write_migration(&config.root, "2024/01", "m240102_000000_b", "");

    let history = MemoryHistory::with_applied(["m240101_000000_a"]);
    let engine = sql_engine(config, history, RecordingContext::new());

    let first = pending_ids(&engine);
    assert_eq!(first, vec!["m240102_000000_b"]);
    assert_eq!(pending_ids(&engine), first);

    let scanned = engine.scan().unwrap();
    assert_eq!(scanned.len(), 2);
    assert!(scanned
        .iter()
        .any(|r| r.identifier == "m240101_000000_a" && r.applied));
}

#[test]
fn missing_root_means_nothing_pending() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = sql_engine(config_in(&dir), MemoryHistory::new(), RecordingContext::new());

    assert!(engine.pending().unwrap().is_empty());
    let batch = engine.up(None).unwrap();
    assert_eq!(batch.planned, 0);
    assert!(batch.is_success());
}

// ── Up ───────────────────────────────────────────────────────────────

#[test]
fn up_halts_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    write_migration(&config.root, "2024/01", "m240101_000000_a", "-- up\nCREATE TABLE a (x);\n");
    write_migration(&config.root, "2024/02", "m240201_000000_b", "-- up\nBROKEN;\n");
    write_migration(&config.root, "2024/03", "m240301_000000_c", "-- up\nCREATE TABLE c (x);\n");

    let mut engine = sql_engine(
        config,
        MemoryHistory::new(),
        RecordingContext::failing_on("BROKEN"),
    );

    let mut events = Vec::new();
    let batch = engine
        .up_with(None, |p| match p {
            Progress::Started { identifier, .. } => events.push(format!("start {identifier}")),
            Progress::Finished(r) => events.push(format!("end {} {}", r.identifier, r.is_success())),
        })
        .unwrap();

    assert_eq!(batch.planned, 3);
    assert_eq!(batch.runs.len(), 2);
    assert_eq!(batch.completed(), 1);
    assert!(!batch.is_success());
    assert_eq!(batch.failure().unwrap().identifier, "m240201_000000_b");
    assert_eq!(
        events,
        vec![
            "start m240101_000000_a",
            "end m240101_000000_a true",
            "start m240201_000000_b",
            "end m240201_000000_b false",
        ]
    );

    let applied = engine.applied_set().unwrap();
    assert!(applied.contains("m240101_000000_a"));
    assert!(!applied.contains("m240201_000000_b"));
    assert_eq!(engine.history_store().len(), 1);
    assert_eq!(engine.context().executed(), ["CREATE TABLE a (x);".to_string()]);

    // The failed and the unattempted migrations are still pending.
    assert_eq!(
        pending_ids(&engine),
        vec!["m240201_000000_b", "m240301_000000_c"]
    );
}

#[test]
fn up_respects_limit() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    for id in ["m240101_000000_a", "m240102_000000_b", "m240103_000000_c"] {
        write_migration(&config.root, "2024/01", id, "-- up\nSELECT 1;\n");
    }

    let mut engine = sql_engine(config, MemoryHistory::new(), RecordingContext::new());
    let batch = engine.up(Some(2)).unwrap();

    assert!(batch.is_success());
    assert_eq!(batch.completed(), 2);
    assert_eq!(pending_ids(&engine), vec!["m240103_000000_c"]);
}

#[test]
fn file_removed_after_scan_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    write_migration(&config.root, "2024/01", "m240101_000000_a", "-- up\nSELECT 1;\n");
    let root = config.root.clone();

    let mut engine = sql_engine(config, MemoryHistory::new(), RecordingContext::new());
    let pending = engine.pending().unwrap();
    fs::remove_file(root.join("2024/01/m240101_000000_a.sql")).unwrap();

    let report = engine.apply(&pending[0]).unwrap();
    assert!(!report.is_success());
    assert!(engine.history_store().is_empty());
}

// ── Down ─────────────────────────────────────────────────────────────

#[test]
fn down_reverts_most_recent_first_using_identifier_paths() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    write_migration(
        &config.root,
        "2024/01",
        "m240101_000000_a",
        "-- up\nCREATE TABLE a (x);\n-- down\nDROP TABLE a;\n",
    );
    write_migration(
        &config.root,
        "2024/02",
        "m240201_000000_b",
        "-- up\nCREATE TABLE b (x);\n-- down\nDROP TABLE b;\n",
    );

    let history = MemoryHistory::with_applied(["m240101_000000_a", "m240201_000000_b"]);
    let mut engine = sql_engine(config, history, RecordingContext::new());

    let batch = engine.down(Some(1)).unwrap();
    assert!(batch.is_success());
    assert_eq!(batch.direction, Direction::Down);
    assert_eq!(batch.runs[0].identifier, "m240201_000000_b");
    assert_eq!(engine.context().executed(), ["DROP TABLE b;".to_string()]);
    assert_eq!(pending_ids(&engine), vec!["m240201_000000_b"]);
}

#[test]
fn down_cannot_find_file_stored_in_another_month() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    // Identifier says March, file lives in April.
    write_migration(
        &config.root,
        "2024/04",
        "m240331_235959_late",
        "-- up\nSELECT 1;\n-- down\nSELECT 2;\n",
    );

    let history = MemoryHistory::with_applied(["m240331_235959_late"]);
    let mut engine = sql_engine(config, history, RecordingContext::new());

    let batch = engine.down(None).unwrap();
    assert!(!batch.is_success());
    assert!(engine.applied_set().unwrap().contains("m240331_235959_late"));
}

#[test]
fn down_without_down_section_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    write_migration(&config.root, "2024/01", "m240101_000000_a", "-- up\nSELECT 1;\n");

    let history = MemoryHistory::with_applied(["m240101_000000_a"]);
    let mut engine = sql_engine(config, history, RecordingContext::new());

    let batch = engine.down(None).unwrap();
    match &batch.failure().unwrap().outcome {
        Outcome::Failure(reason) => assert!(reason.contains("does not support migration down")),
        Outcome::Success => panic!("expected failure"),
    }
    assert_eq!(engine.history(None).unwrap().len(), 1);
}

// ── Registry loader ──────────────────────────────────────────────────

struct Step(&'static str);

impl Migration<Vec<String>> for Step {
    fn up(&self, log: &mut Vec<String>) -> Result<()> {
        log.push(format!("up {}", self.0));
        Ok(())
    }

    fn down(&self, log: &mut Vec<String>) -> Result<()> {
        log.push(format!("down {}", self.0));
        Ok(())
    }
}

#[test]
fn registry_units_run_in_sequence_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    write_migration(&config.root, "2024/02", "m240201_000000_b", "");
    write_migration(&config.root, "2024/01", "m240101_000000_a", "");

    let mut registry: Registry<Vec<String>> = Registry::new();
    registry
        .register("m240101_000000_a", || Box::new(Step("a")))
        .register("m240201_000000_b", || Box::new(Step("b")));

    let mut engine =
        MigrationEngine::new(config, MemoryHistory::new(), registry, Vec::new()).unwrap();

    assert!(engine.up(None).unwrap().is_success());
    assert!(engine.down(None).unwrap().is_success());
    assert_eq!(engine.context(), &vec!["up a", "up b", "down b", "down a"]);
    assert!(engine.history(None).unwrap().is_empty());
}

// ── SQLite ───────────────────────────────────────────────────────────

#[test]
fn sqlite_schema_and_history_share_a_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    write_migration(
        &config.root,
        "2024/03",
        "m240305_142201_add_users_table",
        "-- up\nCREATE TABLE users (id INTEGER PRIMARY KEY);\n-- down\nDROP TABLE users;\n",
    );

    let store = SqliteStore::open(dir.path().join("app.db")).unwrap();
    let ctx = store.context();
    let loader: SqlFileLoader<SqliteContext> = SqlFileLoader::new();
    let mut engine = MigrationEngine::new(config, store, loader, ctx).unwrap();

    // The base sentinel is never reported.
    assert!(engine.history(None).unwrap().is_empty());

    assert!(engine.up(None).unwrap().is_success());
    assert_eq!(table_count(engine.context(), "users"), 1);
    assert_eq!(
        engine.history(None).unwrap()[0].identifier,
        "m240305_142201_add_users_table"
    );

    assert!(engine.down(None).unwrap().is_success());
    assert_eq!(table_count(engine.context(), "users"), 0);
    assert!(engine.history(None).unwrap().is_empty());
}

fn table_count(ctx: &SqliteContext, name: &str) -> i64 {
    ctx.with_connection(|c| {
        c.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |r| r.get(0),
        )
    })
    .unwrap()
}
