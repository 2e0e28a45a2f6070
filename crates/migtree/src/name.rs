//! Turning a user-supplied migration name into an identifier.
//!
//! Two identifier shapes exist:
//!
//! - flat: `m240305_142201_add_users_table`
//! - namespaced: `M240305142201AddUsersTable`, tied to a namespace such as
//!   `app\migrations`
//!
//! The timestamp is always UTC at second resolution.

use chrono::{DateTime, Utc};

use crate::error::{MigrationError, Result};

/// Separator between namespace segments in a migration name.
pub const NAMESPACE_SEPARATOR: char = '\\';

/// The outcome of name generation for one `create` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedName {
    /// Namespace the migration belongs to, if any.
    pub namespace: Option<String>,
    /// The identifier, which is also the file stem on disk.
    pub identifier: String,
}

impl GeneratedName {
    /// `namespace\identifier`, or the bare identifier for flat names.
    pub fn qualified(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}{NAMESPACE_SEPARATOR}{}", self.identifier),
            None => self.identifier.clone(),
        }
    }
}

/// Check a raw name against `^[A-Za-z0-9_\\]+$`.
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == NAMESPACE_SEPARATOR);

    if valid {
        Ok(())
    } else {
        Err(MigrationError::InvalidName(name.to_string()))
    }
}

/// Derive the namespace and identifier for a new migration.
///
/// A namespace embedded in `name` always wins; the last separator splits
/// namespace from slug. Without one, `namespace_mode` picks the first entry
/// of `default_namespaces` (if there is one).
pub fn generate(
    name: &str,
    namespace_mode: bool,
    default_namespaces: &[String],
    now: DateTime<Utc>,
) -> Result<GeneratedName> {
    validate_name(name)?;

    let trimmed = name.trim_matches(NAMESPACE_SEPARATOR);
    if trimmed.is_empty() {
        return Err(MigrationError::InvalidName(name.to_string()));
    }

    let (namespace, slug) = match trimmed.rfind(NAMESPACE_SEPARATOR) {
        Some(idx) => (
            Some(trimmed[..idx].to_string()),
            &trimmed[idx + NAMESPACE_SEPARATOR.len_utf8()..],
        ),
        None if namespace_mode => (default_namespaces.first().cloned(), trimmed),
        None => (None, trimmed),
    };

    let identifier = match namespace {
        None => format!("m{}_{slug}", now.format("%y%m%d_%H%M%S")),
        Some(_) => format!("M{}{}", now.format("%y%m%d%H%M%S"), upper_first(slug)),
    };

    Ok(GeneratedName {
        namespace,
        identifier,
    })
}

fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => {
            let mut out = String::with_capacity(s.len());
            out.push(first.to_ascii_uppercase());
            out.push_str(chars.as_str());
            out
        }
        None => String::new(),
    }
}
