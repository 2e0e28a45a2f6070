use std::collections::BTreeMap;

use tracing::warn;

use crate::history::HistorySet;
use crate::scan::MigrationRecord;

/// Pending migrations in the order they must be applied.
pub type PendingList = Vec<MigrationRecord>;

/// Drop applied records and order the rest by `(ordering_key, identifier)`.
///
/// Records from different directories and namespaces are merged into one
/// timeline. Scan order does not matter.
pub fn sequence<I>(records: I, applied: &HistorySet) -> PendingList
where
    I: IntoIterator<Item = MigrationRecord>,
{
    let mut ordered = BTreeMap::new();

    for record in records {
        if record.applied || applied.contains(&record.identifier) {
            continue;
        }

        let key = (record.ordering_key, record.identifier.clone());
        if let Some(previous) = ordered.insert(key, record) {
            warn!(
                identifier = %previous.identifier,
                subpath = %previous.subpath,
                "duplicate migration identifier on disk"
            );
        }
    }

    ordered.into_values().collect()
}
