//! Plain SQL migration files.
//!
//! A file holds an `-- up` section and an optional `-- down` section:
//!
//! ```text
//! -- migration: m240305_142201_add_users_table
//! -- created: 2024-03-05 14:22:01 UTC
//!
//! -- up
//! CREATE TABLE users (id INTEGER PRIMARY KEY);
//!
//! -- down
//! DROP TABLE users;
//! ```

use std::fmt;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::{MigrationError, Result};
use crate::runner::{Loader, Migration};

const UP_MARKER: &str = "-- up";
const DOWN_MARKER: &str = "-- down";

/// An execution context that can run a batch of SQL statements.
pub trait SqlExecutor {
    type Error: fmt::Display;

    fn execute_batch(&mut self, sql: &str) -> std::result::Result<(), Self::Error>;
}

/// The up and down SQL of one migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    pub up_sql: String,
    pub down_sql: String,
}

impl SqlMigration {
    /// Split file content into up and down SQL.
    ///
    /// Comment-only and blank lines are dropped. Without an `-- up` marker,
    /// everything before `-- down` is the up section.
    pub fn parse(content: &str) -> Self {
        let mut up = Vec::new();
        let mut down = Vec::new();
        let has_up_marker = content.lines().any(|l| is_marker(l, UP_MARKER));

        let mut section = if has_up_marker {
            Section::Header
        } else {
            Section::Up
        };

        for line in content.lines() {
            if is_marker(line, UP_MARKER) {
                section = Section::Up;
                continue;
            }
            if is_marker(line, DOWN_MARKER) {
                section = Section::Down;
                continue;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            }

            match section {
                Section::Header => {}
                Section::Up => up.push(line),
                Section::Down => down.push(line),
            }
        }

        Self {
            up_sql: up.join("\n").trim().to_string(),
            down_sql: down.join("\n").trim().to_string(),
        }
    }

    fn execute<C: SqlExecutor>(ctx: &mut C, sql: &str) -> Result<()> {
        ctx.execute_batch(sql)
            .map_err(|e| MigrationError::step(e.to_string()))
    }
}

#[derive(Clone, Copy)]
enum Section {
    Header,
    Up,
    Down,
}

fn is_marker(line: &str, marker: &str) -> bool {
    line.trim().eq_ignore_ascii_case(marker)
}

impl<C: SqlExecutor> Migration<C> for SqlMigration {
    fn up(&self, ctx: &mut C) -> Result<()> {
        if self.up_sql.is_empty() {
            return Ok(());
        }
        Self::execute(ctx, &self.up_sql)
    }

    fn down(&self, ctx: &mut C) -> Result<()> {
        if self.down_sql.is_empty() {
            return Err(MigrationError::step("this migration does not support migration down"));
        }
        Self::execute(ctx, &self.down_sql)
    }
}

/// Loads [`SqlMigration`]s straight from the migration tree.
pub struct SqlFileLoader<C> {
    _ctx: PhantomData<fn(&mut C)>,
}

impl<C> SqlFileLoader<C> {
    pub fn new() -> Self {
        Self { _ctx: PhantomData }
    }
}

impl<C> Default for SqlFileLoader<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: SqlExecutor + 'static> Loader<C> for SqlFileLoader<C> {
    fn load(&self, identifier: &str, file: &Path) -> Result<Box<dyn Migration<C>>> {
        let content = fs::read_to_string(file).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                MigrationError::UnknownMigration(format!("{identifier} ({})", file.display()))
            }
            io::ErrorKind::InvalidData => MigrationError::Malformed {
                path: file.to_path_buf(),
                reason: "not valid UTF-8".to_string(),
            },
            _ => MigrationError::fs(file, e),
        })?;

        Ok(Box::new(SqlMigration::parse(&content)))
    }
}

/// Content of a freshly created migration file.
pub fn render_template(identifier: &str, namespace: Option<&str>, created: DateTime<Utc>) -> String {
    let mut out = format!("-- migration: {identifier}\n");
    if let Some(ns) = namespace {
        out.push_str(&format!("-- namespace: {ns}\n"));
    }
    out.push_str(&format!(
        "-- created: {}\n\n{UP_MARKER}\n\n\n{DOWN_MARKER}\n\n",
        created.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out
}
