//! # migtree
//!
//! Schema migrations organised in a date-sharded tree.
//!
//! ```text
//! migrations/
//!   2024/
//!     03/
//!       m240305_142201_add_users_table.sql
//!       M240318090000CreatePost.sql
//! ```
//!
//! ## How It Works
//!
//! 1. `create` turns a name such as `add_users_table` (or
//!    `app\migrations\createPost`) into a timestamped identifier and writes a
//!    new file under `root/YYYY/MM` for the current month.
//! 2. The **scanner** walks the whole tree and picks up every file whose name
//!    starts with `m` + a 12-digit timestamp. File contents are not read.
//! 3. The **sequencer** drops what the history store says is applied and
//!    sorts the rest by timestamp, then identifier.
//! 4. The **runner** loads each pending migration through a [`Loader`] and
//!    runs it against an explicit execution context, one at a time. The first
//!    failure stops the batch.
//!
//! ## Key Concepts
//!
//! - **The tree is the source of truth**: nothing is cached between runs.
//! - **History is external**: anything implementing [`HistoryStore`].
//! - **Loaders are pluggable**: a compiled-in [`Registry`] or plain SQL files
//!   via [`SqlFileLoader`].

mod clock;
mod config;
mod engine;
mod error;
mod history;
mod runner;
mod scan;
mod sequence;
mod sql;

pub mod name;
pub mod path;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{MigrateConfig, CONFIG_FILE};
pub use engine::{BatchReport, MigrationEngine, NewMigration, Progress};
pub use error::{MigrationError, Result};
pub use history::{AppliedMigration, HistorySet, HistoryStore, BASE_MIGRATION};
pub use name::GeneratedName;
pub use runner::{Direction, Loader, Migration, Outcome, Registry, RunReport, Runner};
pub use scan::{MigrationRecord, Scanner, SearchPath};
pub use sequence::{sequence, PendingList};
pub use sql::{render_template, SqlExecutor, SqlFileLoader, SqlMigration};
