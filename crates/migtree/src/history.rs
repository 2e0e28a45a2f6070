use std::collections::BTreeSet;
use std::fmt;

use crate::name::NAMESPACE_SEPARATOR;

/// Identifier of the sentinel entry meaning "no migrations applied yet".
///
/// Applying or reverting it always succeeds without loading anything.
pub const BASE_MIGRATION: &str = "m000000_000000_base";

/// Identifiers that have already been applied.
pub type HistorySet = BTreeSet<String>;

/// One row of migration history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    /// The migration identifier.
    pub identifier: String,
    /// When it was applied, in Unix seconds.
    pub apply_time: i64,
}

/// Persistent record of which migrations have been applied.
///
/// The engine never keeps its own copy: every run starts from
/// [`list_applied`](HistoryStore::list_applied).
pub trait HistoryStore {
    /// Error type for this backend.
    type Error: fmt::Debug + fmt::Display;

    /// All applied migrations, most recently applied first.
    fn list_applied(&self) -> Result<Vec<AppliedMigration>, Self::Error>;

    /// Record `identifier` as applied now.
    fn append(&mut self, identifier: &str) -> Result<(), Self::Error>;

    /// Forget `identifier` after it has been reverted.
    fn remove(&mut self, identifier: &str) -> Result<(), Self::Error>;

    /// Applied identifiers for membership tests, with stray namespace
    /// separators trimmed.
    fn applied_set(&self) -> Result<HistorySet, Self::Error> {
        Ok(self
            .list_applied()?
            .into_iter()
            .map(|m| m.identifier.trim_matches(NAMESPACE_SEPARATOR).to_string())
            .collect())
    }
}
