use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::MigrateConfig;
use crate::error::{MigrationError, Result};
use crate::history::{AppliedMigration, HistorySet, HistoryStore, BASE_MIGRATION};
use crate::name::{self, GeneratedName};
use crate::path;
use crate::runner::{Direction, Loader, RunReport, Runner};
use crate::scan::{MigrationRecord, Scanner};
use crate::sequence::{sequence, PendingList};
use crate::sql::render_template;

/// A migration that `create` is about to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMigration {
    /// The name as the user typed it.
    pub name: String,
    pub generated: GeneratedName,
    /// `root/YYYY/MM` for the creation date.
    pub directory: PathBuf,
    /// The file that will be written.
    pub file: PathBuf,
    pub created: DateTime<Utc>,
}

/// Progress notifications for a batch, in execution order.
#[derive(Debug, Clone, Copy)]
pub enum Progress<'a> {
    /// A unit is about to run.
    Started {
        identifier: &'a str,
        direction: Direction,
    },
    /// A unit finished, successfully or not.
    Finished(&'a RunReport),
}

/// What happened during an `up` or `down` batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub direction: Direction,
    /// Number of migrations selected for the batch.
    pub planned: usize,
    /// Runs in execution order. A failure is always the last entry.
    pub runs: Vec<RunReport>,
}

impl BatchReport {
    fn new(direction: Direction, planned: usize) -> Self {
        Self {
            direction,
            planned,
            runs: Vec::with_capacity(planned),
        }
    }

    /// True when every planned migration ran successfully.
    pub fn is_success(&self) -> bool {
        self.runs.len() == self.planned && self.runs.iter().all(RunReport::is_success)
    }

    /// Number of successful runs.
    pub fn completed(&self) -> usize {
        self.runs.iter().filter(|r| r.is_success()).count()
    }

    /// The run that halted the batch, if any.
    pub fn failure(&self) -> Option<&RunReport> {
        self.runs.iter().find(|r| !r.is_success())
    }
}

/// Creates, discovers and runs migrations over an injected history store,
/// loader and execution context.
///
/// Runs are strictly sequential and fail-fast: the first failure stops the
/// batch and leaves history untouched for it and everything after it.
/// Migrations applied earlier in the same batch stay applied.
pub struct MigrationEngine<H, L, C> {
    config: MigrateConfig,
    clock: Box<dyn Clock>,
    scanner: Scanner,
    runner: Runner,
    history: H,
    loader: L,
    context: C,
}

impl<H, L, C> MigrationEngine<H, L, C>
where
    H: HistoryStore,
    L: Loader<C>,
{
    pub fn new(config: MigrateConfig, history: H, loader: L, context: C) -> Result<Self> {
        let scanner = Scanner::new(config.root.clone(), &config.extension)?;
        let runner = Runner::new(config.root.clone(), config.extension.clone());

        Ok(Self {
            config,
            clock: Box::new(SystemClock),
            scanner,
            runner,
            history,
            loader,
            context,
        })
    }

    /// Replace the clock used for identifiers and creation directories.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    pub fn history_store(&self) -> &H {
        &self.history
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Validate `name` and work out where its file goes. No I/O.
    pub fn plan_create(&self, name: &str) -> Result<NewMigration> {
        let now = self.clock.now();
        let generated = name::generate(
            name,
            self.config.namespace_mode,
            &self.config.namespaces,
            now,
        )?;

        let directory = path::creation_dir(&self.config.root, now);
        let file = directory.join(format!("{}.{}", generated.identifier, self.config.extension));

        Ok(NewMigration {
            name: name.to_string(),
            generated,
            directory,
            file,
            created: now,
        })
    }

    /// Write the planned migration file, creating directories as needed.
    ///
    /// An existing file is never overwritten.
    pub fn create(&self, plan: &NewMigration) -> Result<PathBuf> {
        fs::create_dir_all(&plan.directory).map_err(|e| MigrationError::fs(&plan.directory, e))?;

        let content = render_template(
            &plan.generated.identifier,
            plan.generated.namespace.as_deref(),
            plan.created,
        );

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&plan.file)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => MigrationError::AlreadyExists(plan.file.clone()),
                _ => MigrationError::fs(&plan.file, e),
            })?;
        file.write_all(content.as_bytes())
            .map_err(|e| MigrationError::fs(&plan.file, e))?;

        info!(
            identifier = %plan.generated.identifier,
            file = %plan.file.display(),
            "created migration"
        );
        Ok(plan.file.clone())
    }

    /// Applied identifiers, as read from the history store right now.
    pub fn applied_set(&self) -> Result<HistorySet> {
        self.history.applied_set().map_err(history_error)
    }

    /// Every migration file on disk, flagged applied or not.
    pub fn scan(&self) -> Result<Vec<MigrationRecord>> {
        let applied = self.applied_set()?;
        self.scanner.scan(&applied)
    }

    /// Migrations not yet applied, in application order.
    pub fn pending(&self) -> Result<PendingList> {
        let applied = self.applied_set()?;
        let records = self.scanner.scan(&applied)?;
        Ok(sequence(records, &applied))
    }

    /// Apply one record and record it in history on success.
    pub fn apply(&mut self, record: &MigrationRecord) -> Result<RunReport> {
        let report = self
            .runner
            .apply(&self.loader, &mut self.context, record);
        if report.is_success() {
            self.history
                .append(&report.identifier)
                .map_err(history_error)?;
        }
        Ok(report)
    }

    /// Apply up to `limit` pending migrations (all when `None`).
    pub fn up(&mut self, limit: Option<usize>) -> Result<BatchReport> {
        self.up_with(limit, |_| {})
    }

    /// [`up`](Self::up), reporting progress to `observer`.
    pub fn up_with<F>(&mut self, limit: Option<usize>, mut observer: F) -> Result<BatchReport>
    where
        F: FnMut(Progress<'_>),
    {
        let selected = take(self.pending()?, limit);
        let mut batch = BatchReport::new(Direction::Up, selected.len());

        for record in &selected {
            observer(Progress::Started {
                identifier: &record.identifier,
                direction: Direction::Up,
            });
            let report = self.apply(record)?;
            observer(Progress::Finished(&report));

            let halted = !report.is_success();
            batch.runs.push(report);
            if halted {
                break;
            }
        }

        log_batch(&batch);
        Ok(batch)
    }

    /// The migrations `down(limit)` would revert, most recent first.
    pub fn revertible(&self, limit: Option<usize>) -> Result<Vec<AppliedMigration>> {
        self.history(limit)
    }

    /// Revert the `limit` most recently applied migrations (all when `None`).
    pub fn down(&mut self, limit: Option<usize>) -> Result<BatchReport> {
        self.down_with(limit, |_| {})
    }

    /// [`down`](Self::down), reporting progress to `observer`.
    pub fn down_with<F>(&mut self, limit: Option<usize>, mut observer: F) -> Result<BatchReport>
    where
        F: FnMut(Progress<'_>),
    {
        let selected = self.revertible(limit)?;
        let mut batch = BatchReport::new(Direction::Down, selected.len());

        for applied in &selected {
            observer(Progress::Started {
                identifier: &applied.identifier,
                direction: Direction::Down,
            });
            let report = self
                .runner
                .revert(&self.loader, &mut self.context, &applied.identifier);
            if report.is_success() {
                self.history
                    .remove(&applied.identifier)
                    .map_err(history_error)?;
            }
            observer(Progress::Finished(&report));

            let halted = !report.is_success();
            batch.runs.push(report);
            if halted {
                break;
            }
        }

        log_batch(&batch);
        Ok(batch)
    }

    /// Applied migrations, most recent first, without the base sentinel.
    pub fn history(&self, limit: Option<usize>) -> Result<Vec<AppliedMigration>> {
        let applied = self
            .history
            .list_applied()
            .map_err(history_error)?
            .into_iter()
            .filter(|m| m.identifier != BASE_MIGRATION)
            .collect();
        Ok(take(applied, limit))
    }
}

fn take<T>(items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    match limit {
        Some(n) => items.into_iter().take(n).collect(),
        None => items,
    }
}

fn history_error<E: fmt::Display>(err: E) -> MigrationError {
    MigrationError::History(err.to_string())
}

fn log_batch(batch: &BatchReport) {
    match batch.failure() {
        None => info!(
            direction = %batch.direction,
            completed = batch.completed(),
            "migration batch finished"
        ),
        Some(failed) => warn!(
            direction = %batch.direction,
            completed = batch.completed(),
            planned = batch.planned,
            halted_at = %failed.identifier,
            "migration batch halted"
        ),
    }
}
