use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{MigrationError, Result};

/// Default name of the configuration file.
pub const CONFIG_FILE: &str = "migtree.toml";

/// Settings read from `migtree.toml`. Every key is optional.
///
/// ```
/// use migtree::MigrateConfig;
///
/// let config = MigrateConfig::from_toml_str(r#"
/// root = "db/migrations"
/// namespace_mode = true
/// namespaces = ['app\migrations']
/// "#).unwrap();
///
/// assert_eq!(config.root.to_str(), Some("db/migrations"));
/// assert_eq!(config.extension, "sql");
/// assert_eq!(config.namespaces, vec![r"app\migrations".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrateConfig {
    /// Root of the migration tree.
    pub root: PathBuf,
    /// Extension of migration files, without the dot.
    pub extension: String,
    /// Resolve bare names into the first default namespace.
    pub namespace_mode: bool,
    /// Default namespaces, in priority order.
    pub namespaces: Vec<String>,
    /// SQLite database holding the history table.
    pub database: PathBuf,
    /// Name of the history table.
    pub history_table: String,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("migrations"),
            extension: "sql".to_string(),
            namespace_mode: false,
            namespaces: Vec::new(),
            database: PathBuf::from("migtree.db"),
            history_table: "migration".to_string(),
        }
    }
}

impl MigrateConfig {
    /// Read a config file. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(MigrationError::fs(path, err)),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| MigrationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let ext = self.extension.as_str();
        if ext.is_empty() || ext.starts_with('.') || ext.contains(|c: char| c == '/' || c == '\\') {
            return Err(MigrationError::Config(format!(
                "extension must be a bare file extension, got {ext:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(MigrateConfig::from_toml_str("").unwrap(), MigrateConfig::default());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MigrateConfig::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, MigrateConfig::default());
    }

    #[test]
    fn reads_every_key() {
        let config = MigrateConfig::from_toml_str(
            r#"
            root = "db"
            extension = "psql"
            namespace_mode = true
            namespaces = ['a\b', 'c']
            database = "app.db"
            history_table = "schema_history"
            "#,
        )
        .unwrap();

        assert_eq!(config.root, PathBuf::from("db"));
        assert_eq!(config.extension, "psql");
        assert!(config.namespace_mode);
        assert_eq!(config.namespaces, vec![r"a\b".to_string(), "c".to_string()]);
        assert_eq!(config.database, PathBuf::from("app.db"));
        assert_eq!(config.history_table, "schema_history");
    }

    #[test]
    fn rejects_unknown_keys_and_bad_extensions() {
        assert!(matches!(
            MigrateConfig::from_toml_str("migration_path = \"x\""),
            Err(MigrationError::Config(_))
        ));
        assert!(matches!(
            MigrateConfig::from_toml_str("extension = \".sql\""),
            Err(MigrationError::Config(_))
        ));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "root = \"elsewhere\"\n").unwrap();
        assert_eq!(MigrateConfig::load(&path).unwrap().root, PathBuf::from("elsewhere"));
    }
}
