//! SQLite history backend using rusqlite.
//!
//! The same connection serves as the execution context for SQL migrations,
//! so schema changes and history land in one database.
//!
//! # Example
//!
//! ```no_run
//! use migtree::HistoryStore;
//! use migtree_store::SqliteStore;
//!
//! let mut store = SqliteStore::open("app.db").unwrap();
//! store.append("m240305_142201_add_users_table").unwrap();
//!
//! let applied = store.list_applied().unwrap();
//! assert_eq!(applied[0].identifier, "m240305_142201_add_users_table");
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use migtree::{AppliedMigration, HistoryStore, SqlExecutor, BASE_MIGRATION};
use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::debug;

use crate::memory::now_secs;

/// SQLite configuration options.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// SQLite journal mode. Defaults to WAL.
    pub journal_mode: JournalMode,
    /// Busy timeout in milliseconds. Defaults to 5000.
    pub busy_timeout_ms: u32,
    /// Name of the history table. Defaults to `migration`.
    pub history_table: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            busy_timeout_ms: 5000,
            history_table: "migration".to_string(),
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Write-Ahead Logging.
    Wal,
    /// Traditional rollback journal.
    Delete,
    /// In-memory journal (fastest, no crash recovery).
    Memory,
}

impl JournalMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
        }
    }
}

/// Error type for the SQLite backend.
#[derive(Debug, Error)]
pub enum SqliteError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("sqlite lock poisoned")]
    LockPoisoned,
    #[error("invalid history table name {0:?}")]
    InvalidTableName(String),
}

type Shared = Arc<Mutex<Connection>>;

fn lock(conn: &Shared) -> Result<MutexGuard<'_, Connection>, SqliteError> {
    conn.lock().map_err(|_| SqliteError::LockPoisoned)
}

/// SQLite migration history.
///
/// Creates the history table on open and seeds it with the base sentinel.
pub struct SqliteStore {
    conn: Shared,
    table: String,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path with default config.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SqliteError> {
        Self::open_with_config(path, SqliteConfig::default())
    }

    /// Open with custom configuration.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteConfig,
    ) -> Result<Self, SqliteError> {
        let conn = Connection::open(path)?;
        Self::init(conn, &config)
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, SqliteError> {
        Self::init(Connection::open_in_memory()?, &SqliteConfig::default())
    }

    fn init(conn: Connection, config: &SqliteConfig) -> Result<Self, SqliteError> {
        validate_table_name(&config.history_table)?;

        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {};
             PRAGMA busy_timeout = {};
             PRAGMA foreign_keys = ON;",
            config.journal_mode.as_str(),
            config.busy_timeout_ms,
        ))?;

        let table = config.history_table.clone();
        Self::create_schema(&conn, &table)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table,
        })
    }

    fn create_schema(conn: &Connection, table: &str) -> Result<(), SqliteError> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (
                version     TEXT PRIMARY KEY NOT NULL,
                apply_time  INTEGER NOT NULL
            );"
        ))?;
        conn.execute(
            &format!("INSERT OR IGNORE INTO \"{table}\" (version, apply_time) VALUES (?1, ?2)"),
            params![BASE_MIGRATION, now_secs()],
        )?;
        Ok(())
    }

    /// Execution context on the same connection.
    pub fn context(&self) -> SqliteContext {
        SqliteContext {
            conn: Arc::clone(&self.conn),
        }
    }

    /// Name of the history table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Get the current journal mode.
    pub fn journal_mode(&self) -> Result<String, SqliteError> {
        let conn = lock(&self.conn)?;
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        Ok(mode)
    }
}

impl HistoryStore for SqliteStore {
    type Error = SqliteError;

    fn list_applied(&self) -> Result<Vec<AppliedMigration>, Self::Error> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT version, apply_time FROM \"{}\" ORDER BY apply_time DESC, rowid DESC",
            self.table
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AppliedMigration {
                    identifier: row.get(0)?,
                    apply_time: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn append(&mut self, identifier: &str) -> Result<(), Self::Error> {
        let conn = lock(&self.conn)?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO \"{}\" (version, apply_time) VALUES (?1, ?2)",
                self.table
            ),
            params![identifier, now_secs()],
        )?;
        debug!(identifier, table = %self.table, "recorded migration");
        Ok(())
    }

    fn remove(&mut self, identifier: &str) -> Result<(), Self::Error> {
        let conn = lock(&self.conn)?;
        conn.execute(
            &format!("DELETE FROM \"{}\" WHERE version = ?1", self.table),
            params![identifier],
        )?;
        debug!(identifier, table = %self.table, "removed migration");
        Ok(())
    }
}

/// Runs migration SQL on a [`SqliteStore`]'s connection.
#[derive(Clone)]
pub struct SqliteContext {
    conn: Shared,
}

impl SqliteContext {
    /// Run `f` with the underlying connection, e.g. to inspect the schema.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, SqliteError> {
        let conn = lock(&self.conn)?;
        Ok(f(&conn)?)
    }
}

impl SqlExecutor for SqliteContext {
    type Error = SqliteError;

    fn execute_batch(&mut self, sql: &str) -> Result<(), Self::Error> {
        let conn = lock(&self.conn)?;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

fn validate_table_name(name: &str) -> Result<(), SqliteError> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(SqliteError::InvalidTableName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn ids(store: &SqliteStore) -> Vec<String> {
        store
            .list_applied()
            .unwrap()
            .into_iter()
            .map(|m| m.identifier)
            .collect()
    }

    #[test]
    fn seeds_base_migration() {
        let store = test_store();
        assert_eq!(ids(&store), vec![BASE_MIGRATION.to_string()]);
    }

    #[test]
    fn append_and_list_most_recent_first() {
        let mut store = test_store();
        store.append("m240101_000000_a").unwrap();
        store.append("m240102_000000_b").unwrap();

        assert_eq!(
            ids(&store),
            vec!["m240102_000000_b", "m240101_000000_a", BASE_MIGRATION]
        );
    }

    #[test]
    fn remove_forgets() {
        let mut store = test_store();
        store.append("m240101_000000_a").unwrap();
        store.remove("m240101_000000_a").unwrap();
        assert!(!store.applied_set().unwrap().contains("m240101_000000_a"));
    }

    #[test]
    fn custom_table_name() {
        let dir = tempfile::tempdir().unwrap();
        let config = SqliteConfig {
            history_table: "schema_history".to_string(),
            ..SqliteConfig::default()
        };
        let mut store = SqliteStore::open_with_config(dir.path().join("h.db"), config).unwrap();
        store.append("m240101_000000_a").unwrap();
        assert_eq!(store.table(), "schema_history");

        let count: i64 = store
            .context()
            .with_connection(|c| c.query_row("SELECT COUNT(*) FROM schema_history", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn rejects_injected_table_names() {
        let config = SqliteConfig {
            history_table: "migration\"; DROP TABLE x; --".to_string(),
            ..SqliteConfig::default()
        };
        let err = SqliteStore::open_with_config(":memory:", config).err().unwrap();
        assert!(matches!(err, SqliteError::InvalidTableName(_)));
    }

    #[test]
    fn context_shares_connection() {
        let store = test_store();
        let mut ctx = store.context();
        ctx.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY);")
            .unwrap();

        let exists: i64 = ctx
            .with_connection(|c| {
                c.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'users'",
                    [],
                    |r| r.get(0),
                )
            })
            .unwrap();
        assert_eq!(exists, 1);
    }

    #[test]
    fn context_reports_sql_errors() {
        let mut ctx = test_store().context();
        assert!(matches!(
            ctx.execute_batch("CREATE TABLEX nope;"),
            Err(SqliteError::Sqlite(_))
        ));
    }

    #[test]
    fn history_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("history.db");

        {
            let mut store = SqliteStore::open(&db_path).unwrap();
            store.append("m240101_000000_a").unwrap();
        }

        // Reopen and verify data persisted
        let store = SqliteStore::open(&db_path).unwrap();
        assert!(store.applied_set().unwrap().contains("m240101_000000_a"));
        assert_eq!(store.list_applied().unwrap().len(), 2);
    }

    #[test]
    fn wal_mode_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("wal.db")).unwrap();
        assert_eq!(store.journal_mode().unwrap().to_lowercase(), "wal");
    }
}
