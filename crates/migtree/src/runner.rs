use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::error::{MigrationError, Result};
use crate::history::BASE_MIGRATION;
use crate::path;
use crate::scan::MigrationRecord;

/// A runnable migration.
///
/// The execution context `C` (typically a database handle) is passed into
/// every call; units never reach for a global connection.
pub trait Migration<C> {
    /// Apply the migration. An `Err` is a declared failure.
    fn up(&self, ctx: &mut C) -> Result<()>;

    /// Revert the migration.
    fn down(&self, ctx: &mut C) -> Result<()>;
}

/// Resolves an identifier (and the file it was found in) to a runnable unit.
pub trait Loader<C> {
    fn load(&self, identifier: &str, file: &Path) -> Result<Box<dyn Migration<C>>>;
}

type Factory<C> = Box<dyn Fn() -> Box<dyn Migration<C>>>;

/// A compiled-in table of migrations, keyed by identifier.
///
/// ```
/// use migtree::{Loader, Migration, Registry, Result};
///
/// struct CreateUsers;
///
/// impl Migration<Vec<String>> for CreateUsers {
///     fn up(&self, log: &mut Vec<String>) -> Result<()> {
///         log.push("create users".into());
///         Ok(())
///     }
///     fn down(&self, log: &mut Vec<String>) -> Result<()> {
///         log.push("drop users".into());
///         Ok(())
///     }
/// }
///
/// let mut registry: Registry<Vec<String>> = Registry::new();
/// registry.register("m240305_142201_create_users", || Box::new(CreateUsers));
///
/// let unit = registry
///     .load("m240305_142201_create_users", "unused".as_ref())
///     .unwrap();
/// let mut log = Vec::new();
/// unit.up(&mut log).unwrap();
/// assert_eq!(log, ["create users"]);
/// ```
pub struct Registry<C> {
    factories: BTreeMap<String, Factory<C>>,
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register a constructor for `identifier`, replacing any previous one.
    pub fn register<F>(&mut self, identifier: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Migration<C>> + 'static,
    {
        self.factories.insert(identifier.into(), Box::new(factory));
        self
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.factories.contains_key(identifier)
    }

    /// Registered identifiers in sorted order.
    pub fn identifiers(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Loader<C> for Registry<C> {
    fn load(&self, identifier: &str, _file: &Path) -> Result<Box<dyn Migration<C>>> {
        self.factories
            .get(identifier)
            .map(|factory| factory())
            .ok_or_else(|| MigrationError::UnknownMigration(identifier.to_string()))
    }
}

/// Which way a migration runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// How a single run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

/// Result of running one migration in one direction.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub identifier: String,
    pub direction: Direction,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Loads migration files and runs them, timing each run.
///
/// The runner never touches history; the caller records successes.
#[derive(Debug, Clone)]
pub struct Runner {
    root: PathBuf,
    extension: String,
}

impl Runner {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    /// Apply a scanned record.
    pub fn apply<C, L>(&self, loader: &L, ctx: &mut C, record: &MigrationRecord) -> RunReport
    where
        L: Loader<C> + ?Sized,
    {
        let file = record.file(&self.root, &self.extension);
        self.run(loader, ctx, &record.identifier, Ok(file), Direction::Up)
    }

    /// Revert a migration known only by identifier.
    ///
    /// The file is looked up under `root/20YY/MM` taken from the identifier.
    pub fn revert<C, L>(&self, loader: &L, ctx: &mut C, identifier: &str) -> RunReport
    where
        L: Loader<C> + ?Sized,
    {
        let file = self.resolve(identifier);
        self.run(loader, ctx, identifier, file, Direction::Down)
    }

    /// File location for a bare identifier.
    pub fn resolve(&self, identifier: &str) -> Result<PathBuf> {
        let subpath = path::identifier_subpath(identifier)?;
        Ok(path::migration_file(
            &self.root,
            &subpath,
            identifier,
            &self.extension,
        ))
    }

    fn run<C, L>(
        &self,
        loader: &L,
        ctx: &mut C,
        identifier: &str,
        file: Result<PathBuf>,
        direction: Direction,
    ) -> RunReport
    where
        L: Loader<C> + ?Sized,
    {
        let start = Instant::now();

        let result = if identifier == BASE_MIGRATION {
            Ok(())
        } else {
            file.and_then(|file| loader.load(identifier, &file))
                .and_then(|unit| match direction {
                    Direction::Up => unit.up(ctx),
                    Direction::Down => unit.down(ctx),
                })
        };

        let elapsed = start.elapsed();
        let outcome = match result {
            Ok(()) => {
                info!(
                    identifier,
                    %direction,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "migration finished"
                );
                Outcome::Success
            }
            Err(err) => {
                let reason = match err {
                    MigrationError::StepFailed { reason, .. } => reason,
                    other => other.to_string(),
                };
                error!(
                    identifier,
                    %direction,
                    elapsed_ms = elapsed.as_millis() as u64,
                    reason = %reason,
                    "migration failed"
                );
                Outcome::Failure(reason)
            }
        };

        RunReport {
            identifier: identifier.to_string(),
            direction,
            outcome,
            elapsed,
        }
    }
}
