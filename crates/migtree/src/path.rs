//! Where migration files live.
//!
//! New migrations go into `root/YYYY/MM` for the month they are *created* in.
//! When only an identifier is known (rolling back from history), the month is
//! read from the identifier itself instead. The two rules only disagree for a
//! file that was renamed or moved after creation.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{MigrationError, Result};

/// Separator used in [`subpath`](crate::MigrationRecord::subpath) strings,
/// independent of the host platform.
pub const SUBPATH_SEPARATOR: char = '/';

/// Directory for a migration created at `now`: `root/YYYY/MM`.
pub fn creation_dir(root: &Path, now: DateTime<Utc>) -> PathBuf {
    root.join(now.format("%Y").to_string())
        .join(now.format("%m").to_string())
}

/// `20YY/MM` taken from the digits right after the leading `m`/`M`.
pub fn identifier_subpath(identifier: &str) -> Result<String> {
    let bytes = identifier.as_bytes();
    let well_formed = bytes.len() >= 5
        && matches!(bytes[0], b'm' | b'M')
        && bytes[1..5].iter().all(u8::is_ascii_digit);

    if !well_formed {
        return Err(MigrationError::InvalidIdentifier(identifier.to_string()));
    }

    Ok(format!(
        "20{}{SUBPATH_SEPARATOR}{}",
        &identifier[1..3],
        &identifier[3..5]
    ))
}

/// Join a `/`-separated subpath onto `root`. An empty subpath is the root.
pub fn join_subpath(root: &Path, subpath: &str) -> PathBuf {
    subpath
        .split(SUBPATH_SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .fold(root.to_path_buf(), |dir, segment| dir.join(segment))
}

/// Full path of a migration file: `root/subpath/identifier.ext`.
pub fn migration_file(root: &Path, subpath: &str, identifier: &str, extension: &str) -> PathBuf {
    join_subpath(root, subpath).join(format!("{identifier}.{extension}"))
}
