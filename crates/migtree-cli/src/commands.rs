use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, Utc};
use console::style;
use inquire::Confirm;
use migtree::{
    AppliedMigration, BatchReport, Direction, MigrateConfig, MigrationEngine, MigrationRecord,
    Outcome, Progress, Registry, SqlFileLoader,
};
use migtree_store::{MemoryHistory, SqliteConfig, SqliteContext, SqliteStore};
use serde::Serialize;
use tracing::debug;

/// `Ok(false)` means the command ran but a batch failed.
type Result = anyhow::Result<bool>;

type Engine = MigrationEngine<SqliteStore, SqlFileLoader<SqliteContext>, SqliteContext>;

/// Global options shared by every command.
pub struct Settings {
    pub config: PathBuf,
    pub root: Option<PathBuf>,
    pub database: Option<PathBuf>,
}

impl Settings {
    fn load(&self) -> anyhow::Result<MigrateConfig> {
        let mut config = MigrateConfig::load(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
        debug!(
            root = %config.root.display(),
            database = %config.database.display(),
            "loaded configuration"
        );
        Ok(config)
    }

    fn open(&self) -> anyhow::Result<Engine> {
        let config = self.load()?;
        let store = SqliteStore::open_with_config(
            &config.database,
            SqliteConfig {
                history_table: config.history_table.clone(),
                ..SqliteConfig::default()
            },
        )
        .with_context(|| format!("failed to open {}", config.database.display()))?;
        let ctx = store.context();

        Ok(MigrationEngine::new(config, store, SqlFileLoader::new(), ctx)?)
    }
}

/// A positive count, or `all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    All,
    Count(usize),
}

impl Limit {
    fn get(self) -> Option<usize> {
        match self {
            Self::All => None,
            Self::Count(n) => Some(n),
        }
    }
}

impl FromStr for Limit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        match s.parse::<usize>() {
            Ok(n) if n > 0 => Ok(Self::Count(n)),
            _ => Err(format!("expected a positive number or `all`, got {s:?}")),
        }
    }
}

/// `migtree create <name>`: write one new migration file.
pub fn create(settings: &Settings, name: &str, yes: bool) -> Result {
    // Creating a file never needs the history database.
    let engine = MigrationEngine::new(
        settings.load()?,
        MemoryHistory::new(),
        Registry::<()>::new(),
        (),
    )?;
    let plan = engine.plan_create(name)?;

    if !confirm(
        &format!("Create new migration '{}'?", plan.file.display()),
        yes,
    )? {
        return Ok(true);
    }

    let file = engine.create(&plan)?;
    println!(
        "{} {}",
        style("New migration created successfully:").green(),
        file.display()
    );
    Ok(true)
}

/// `migtree up [count]`: apply pending migrations in order.
pub fn up(settings: &Settings, count: Limit, yes: bool) -> Result {
    let mut engine = settings.open()?;
    let pending = engine.pending()?;

    if pending.is_empty() {
        println!(
            "{}",
            style("No new migrations found. Your system is up-to-date.").green()
        );
        return Ok(true);
    }

    let total = pending.len();
    let selected = limited(&pending, count);
    if selected.len() == total {
        println!("Total {total} new migration(s) to be applied:");
    } else {
        println!(
            "Total {} out of {total} new migration(s) to be applied:",
            selected.len()
        );
    }
    for record in selected {
        println!("    {}", record.identifier);
    }
    println!();

    if !confirm("Apply the above migration(s)?", yes)? {
        return Ok(true);
    }

    let batch = engine.up_with(count.get(), print_progress)?;
    Ok(summarize(&batch))
}

/// `migtree down [count]`: revert the most recent migrations.
pub fn down(settings: &Settings, count: Limit, yes: bool) -> Result {
    let mut engine = settings.open()?;
    let selected = engine.revertible(count.get())?;

    if selected.is_empty() {
        println!("{}", style("No migration has been done before.").yellow());
        return Ok(true);
    }

    println!("Total {} migration(s) to be reverted:", selected.len());
    for applied in &selected {
        println!("    {}", applied.identifier);
    }
    println!();

    if !confirm("Revert the above migration(s)?", yes)? {
        return Ok(true);
    }

    let batch = engine.down_with(count.get(), print_progress)?;
    Ok(summarize(&batch))
}

/// `migtree history [limit]`: applied migrations, newest first.
pub fn history(settings: &Settings, limit: Limit, json: bool) -> Result {
    let engine = settings.open()?;
    let applied = engine.history(limit.get())?;

    if json {
        let rows: Vec<HistoryRow> = applied.iter().map(HistoryRow::from).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(true);
    }

    if applied.is_empty() {
        println!("{}", style("No migration has been done before.").yellow());
        return Ok(true);
    }

    match limit {
        Limit::All => println!(
            "Total {} migration(s) have been applied before:",
            applied.len()
        ),
        Limit::Count(_) => println!("Showing the last {} applied migration(s):", applied.len()),
    }
    for m in &applied {
        println!("    ({}) {}", format_time(m.apply_time), m.identifier);
    }
    println!();
    Ok(true)
}

/// `migtree new [limit]`: migrations not applied yet, in application order.
pub fn new(settings: &Settings, limit: Limit, json: bool) -> Result {
    let engine = settings.open()?;
    let pending = engine.pending()?;
    let shown = limited(&pending, limit);

    if json {
        let rows: Vec<PendingRow> = shown.iter().map(PendingRow::from).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(true);
    }

    if pending.is_empty() {
        println!(
            "{}",
            style("No new migrations found. Your system is up-to-date.").green()
        );
        return Ok(true);
    }

    if shown.len() == pending.len() {
        println!("Found {} new migration(s):", pending.len());
    } else {
        println!(
            "Showing {} out of {} new migration(s):",
            shown.len(),
            pending.len()
        );
    }
    for record in shown {
        if record.subpath.is_empty() {
            println!("    {}", record.identifier);
        } else {
            println!(
                "    {}  {}",
                record.identifier,
                style(format!("({})", record.subpath)).dim()
            );
        }
    }
    println!();
    Ok(true)
}

// ── Helpers ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HistoryRow<'a> {
    identifier: &'a str,
    apply_time: i64,
    applied_at: String,
}

impl<'a> From<&'a AppliedMigration> for HistoryRow<'a> {
    fn from(m: &'a AppliedMigration) -> Self {
        Self {
            identifier: &m.identifier,
            apply_time: m.apply_time,
            applied_at: format_time(m.apply_time),
        }
    }
}

#[derive(Serialize)]
struct PendingRow<'a> {
    identifier: &'a str,
    subpath: &'a str,
    ordering_key: u64,
}

impl<'a> From<&'a MigrationRecord> for PendingRow<'a> {
    fn from(r: &'a MigrationRecord) -> Self {
        Self {
            identifier: &r.identifier,
            subpath: &r.subpath,
            ordering_key: r.ordering_key,
        }
    }
}

fn confirm(message: &str, yes: bool) -> anyhow::Result<bool> {
    if yes {
        return Ok(true);
    }
    Confirm::new(message)
        .with_default(true)
        .prompt()
        .context("failed to read confirmation")
}

fn limited<T>(items: &[T], limit: Limit) -> &[T] {
    match limit.get() {
        Some(n) if n < items.len() => &items[..n],
        _ => items,
    }
}

fn verbs(direction: Direction) -> (&'static str, &'static str, &'static str) {
    match direction {
        Direction::Up => ("apply", "applying", "applied"),
        Direction::Down => ("revert", "reverting", "reverted"),
    }
}

fn print_progress(progress: Progress<'_>) {
    match progress {
        Progress::Started {
            identifier,
            direction,
        } => {
            let (_, doing, _) = verbs(direction);
            println!("{}", style(format!("*** {doing} {identifier}")).yellow());
        }
        Progress::Finished(run) => {
            let (verb, _, done) = verbs(run.direction);
            let time = format!("(time: {:.3}s)", run.elapsed.as_secs_f64());
            match &run.outcome {
                Outcome::Success => println!(
                    "{}",
                    style(format!("*** {done} {} {time}", run.identifier)).green()
                ),
                Outcome::Failure(reason) => {
                    println!(
                        "{}",
                        style(format!("*** failed to {verb} {} {time}", run.identifier)).red()
                    );
                    eprintln!("    {reason}");
                }
            }
        }
    }
}

fn summarize(batch: &BatchReport) -> bool {
    let (_, _, done) = verbs(batch.direction);
    println!();

    if batch.is_success() {
        println!("{} migration(s) were {done}.", batch.completed());
        println!("{}", style(format!("Migrated {} successfully.", batch.direction)).green());
        return true;
    }

    println!(
        "{} from {} migration(s) were {done}.",
        batch.completed(),
        batch.planned
    );
    println!(
        "{}",
        style("Migration failed. The rest of the migrations are canceled.").red()
    );
    false
}

fn format_time(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_limits() {
        assert_eq!("all".parse::<Limit>(), Ok(Limit::All));
        assert_eq!("ALL".parse::<Limit>(), Ok(Limit::All));
        assert_eq!("3".parse::<Limit>(), Ok(Limit::Count(3)));
        assert!("0".parse::<Limit>().is_err());
        assert!("-1".parse::<Limit>().is_err());
        assert!("few".parse::<Limit>().is_err());
    }

    #[test]
    fn limited_caps_slices() {
        let items = [1, 2, 3];
        assert_eq!(limited(&items, Limit::Count(2)), &[1, 2]);
        assert_eq!(limited(&items, Limit::Count(5)), &[1, 2, 3]);
        assert_eq!(limited(&items, Limit::All), &[1, 2, 3]);
    }

    #[test]
    fn formats_apply_time() {
        assert_eq!(format_time(1_709_648_521), "2024-03-05 14:22:01");
    }
}
