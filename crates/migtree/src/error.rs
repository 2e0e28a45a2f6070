use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while creating, discovering or running migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The user-supplied name contains characters outside `[A-Za-z0-9_\\]`,
    /// or nothing is left once the namespace separators are stripped.
    #[error(
        "invalid migration name {0:?}: the name should contain letters, digits, underscore and/or backslash characters only"
    )]
    InvalidName(String),

    /// An identifier does not carry the `mYYMMDD…` timestamp prefix.
    #[error("invalid migration identifier {0:?}")]
    InvalidIdentifier(String),

    /// A directory or file could not be created or read.
    #[error("filesystem error at {}: {source}", path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A migration file with the generated name is already on disk.
    #[error("migration file {} already exists", .0.display())]
    AlreadyExists(PathBuf),

    /// The loader has no runnable unit for this identifier.
    #[error("no migration registered for {0}")]
    UnknownMigration(String),

    /// The migration file exists but its content cannot be understood.
    #[error("malformed migration file {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    /// A unit declared failure while running.
    #[error("migration {identifier} failed: {reason}")]
    StepFailed { identifier: String, reason: String },

    /// The history store rejected a read or write.
    #[error("history store error: {0}")]
    History(String),

    /// The configuration file could not be parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl MigrationError {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileSystem {
            path: path.into(),
            source,
        }
    }

    /// Failure reported by a unit, without knowing which identifier it runs as.
    ///
    /// The runner fills in the identifier when it reports the step.
    pub fn step(reason: impl Into<String>) -> Self {
        Self::StepFailed {
            identifier: String::new(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrationError>;
