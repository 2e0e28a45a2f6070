//! Discovering migration files on disk.
//!
//! The scanner only looks at file *names*. Contents are read later, and only
//! for the migrations that are actually selected to run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{MigrationError, Result};
use crate::history::HistorySet;
use crate::path::{self, SUBPATH_SEPARATOR};

/// A migration file found by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// File stem, e.g. `m240305_142201_add_users_table`.
    pub identifier: String,
    /// The 12 timestamp digits of the identifier as a number.
    pub ordering_key: u64,
    /// Directory relative to the root, `/`-separated; empty for the root.
    pub subpath: String,
    /// Whether the identifier is in the history set.
    pub applied: bool,
}

impl MigrationRecord {
    /// Composite sort key `(ordering_key, identifier)`.
    pub fn sort_key(&self) -> (u64, &str) {
        (self.ordering_key, &self.identifier)
    }

    /// `subpath/identifier`, or just the identifier for files in the root.
    pub fn path_key(&self) -> String {
        if self.subpath.is_empty() {
            self.identifier.clone()
        } else {
            format!("{}{SUBPATH_SEPARATOR}{}", self.subpath, self.identifier)
        }
    }

    /// Location of the migration file under `root`.
    pub fn file(&self, root: &Path, extension: &str) -> PathBuf {
        path::migration_file(root, &self.subpath, &self.identifier, extension)
    }
}

/// One directory to search, with its subpath relative to the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPath {
    pub subpath: String,
    pub dir: PathBuf,
}

/// Walks a migration root and matches timestamp-prefixed file names.
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    pattern: Regex,
}

impl Scanner {
    /// Build a scanner for files ending in `.extension` under `root`.
    pub fn new(root: impl Into<PathBuf>, extension: &str) -> Result<Self> {
        let source = format!(
            r"(?is)^(m([0-9]{{6}}_?[0-9]{{6}})[^0-9].*?)\.{}$",
            regex::escape(extension)
        );
        let pattern = Regex::new(&source).map_err(|e| MigrationError::Config(e.to_string()))?;

        Ok(Self {
            root: root.into(),
            pattern,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Match a single file name.
    ///
    /// Returns the identifier and its ordering key.
    pub fn match_file_name(&self, file_name: &str) -> Option<(String, u64)> {
        let caps = self.pattern.captures(file_name)?;
        let identifier = caps.get(1)?.as_str().to_string();
        let ordering_key = caps.get(2)?.as_str().replace('_', "").parse().ok()?;
        Some((identifier, ordering_key))
    }

    /// The root plus every directory nested beneath it.
    ///
    /// Symlinked directories are followed. A missing root yields an empty
    /// list.
    pub fn search_paths(&self) -> Result<Vec<SearchPath>> {
        if !self.root.is_dir() {
            debug!(root = %self.root.display(), "migration root does not exist");
            return Ok(Vec::new());
        }

        let mut paths = vec![SearchPath {
            subpath: String::new(),
            dir: self.root.clone(),
        }];

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if let Some(ancestor) = err.loop_ancestor() {
                        debug!(dir = %ancestor.display(), "skipping symlink loop");
                        continue;
                    }
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    let err: io::Error = err.into();
                    if err.kind() == io::ErrorKind::NotFound {
                        debug!(dir = %path.display(), "skipping vanished directory");
                        continue;
                    }
                    return Err(MigrationError::fs(path, err));
                }
            };

            if entry.file_type().is_dir() {
                paths.push(SearchPath {
                    subpath: self.subpath_of(entry.path()),
                    dir: entry.into_path(),
                });
            }
        }

        Ok(paths)
    }

    /// Every migration file under the root, flagged against `applied`.
    ///
    /// The result is in directory order; use [`crate::sequence`] to order it.
    pub fn scan(&self, applied: &HistorySet) -> Result<Vec<MigrationRecord>> {
        let mut records = Vec::new();

        for search in self.search_paths()? {
            let entries = match fs::read_dir(&search.dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!(dir = %search.dir.display(), "skipping missing directory");
                    continue;
                }
                Err(err) => return Err(MigrationError::fs(&search.dir, err)),
            };

            for entry in entries {
                let entry = entry.map_err(|e| MigrationError::fs(&search.dir, e))?;
                if !entry.path().is_file() {
                    continue;
                }

                let file_name = entry.file_name();
                let Some(file_name) = file_name.to_str() else {
                    continue;
                };

                if let Some((identifier, ordering_key)) = self.match_file_name(file_name) {
                    let is_applied = applied.contains(&identifier);
                    records.push(MigrationRecord {
                        identifier,
                        ordering_key,
                        subpath: search.subpath.clone(),
                        applied: is_applied,
                    });
                }
            }
        }

        debug!(root = %self.root.display(), found = records.len(), "scanned migration tree");
        Ok(records)
    }

    fn subpath_of(&self, dir: &Path) -> String {
        let relative = dir.strip_prefix(&self.root).unwrap_or(dir);
        let mut subpath = String::new();
        for component in relative.components() {
            if !subpath.is_empty() {
                subpath.push(SUBPATH_SEPARATOR);
            }
            subpath.push_str(&component.as_os_str().to_string_lossy());
        }
        subpath
    }
}
