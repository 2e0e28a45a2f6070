use std::convert::Infallible;
use std::time::{SystemTime, UNIX_EPOCH};

use migtree::{AppliedMigration, HistoryStore, SqlExecutor};

/// In-memory migration history.
///
/// Nothing touches disk. Ideal for testing and dry runs.
///
/// # Example
///
/// ```
/// use migtree::HistoryStore;
/// use migtree_store::MemoryHistory;
///
/// let mut history = MemoryHistory::new();
/// history.append("m240305_142201_add_users_table").unwrap();
///
/// let applied = history.applied_set().unwrap();
/// assert!(applied.contains("m240305_142201_add_users_table"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryHistory {
    /// Application order, oldest first.
    entries: Vec<AppliedMigration>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A history that already contains `identifiers`, applied in that order.
    pub fn with_applied<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let apply_time = now_secs();
        Self {
            entries: identifiers
                .into_iter()
                .map(|identifier| AppliedMigration {
                    identifier: identifier.into(),
                    apply_time,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl HistoryStore for MemoryHistory {
    type Error = Infallible;

    fn list_applied(&self) -> Result<Vec<AppliedMigration>, Self::Error> {
        Ok(self.entries.iter().rev().cloned().collect())
    }

    fn append(&mut self, identifier: &str) -> Result<(), Self::Error> {
        self.entries.retain(|m| m.identifier != identifier);
        self.entries.push(AppliedMigration {
            identifier: identifier.to_string(),
            apply_time: now_secs(),
        });
        Ok(())
    }

    fn remove(&mut self, identifier: &str) -> Result<(), Self::Error> {
        self.entries.retain(|m| m.identifier != identifier);
        Ok(())
    }
}

/// Execution context that records SQL instead of running it.
///
/// A batch containing the configured failure marker is rejected, which lets
/// tests exercise fail-fast behaviour without a database.
#[derive(Debug, Clone, Default)]
pub struct RecordingContext {
    executed: Vec<String>,
    fail_marker: Option<String>,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every batch that contains `marker`.
    pub fn failing_on(marker: impl Into<String>) -> Self {
        Self {
            executed: Vec::new(),
            fail_marker: Some(marker.into()),
        }
    }

    /// Batches executed so far, in order.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }
}

impl SqlExecutor for RecordingContext {
    type Error = String;

    fn execute_batch(&mut self, sql: &str) -> Result<(), Self::Error> {
        if let Some(marker) = &self.fail_marker {
            if sql.contains(marker.as_str()) {
                return Err(format!("rejected batch containing {marker:?}"));
            }
        }
        self.executed.push(sql.to_string());
        Ok(())
    }
}

pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
