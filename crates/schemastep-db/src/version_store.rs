use std::fmt;

use schemastep_common::{Error, Result};
use schemastep_config::DatabaseConfig;
use tracing::debug;

use crate::backend::SqlExecutor;

/// Version recorded when nothing is applied.
pub const ZERO_VERSION: &str = "0";

/// What a target's tracking table says about its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentVersion {
    /// The tracking table does not exist yet.
    Unmanaged,
    /// The table exists but holds no row.
    Missing,
    At(String),
}

impl CurrentVersion {
    pub fn as_deref(&self) -> Option<&str> {
        match self {
            CurrentVersion::At(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn is_managed(&self) -> bool {
        !matches!(self, CurrentVersion::Unmanaged)
    }
}

impl fmt::Display for CurrentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurrentVersion::Unmanaged => write!(f, "(unmanaged)"),
            CurrentVersion::Missing => write!(f, "(none)"),
            CurrentVersion::At(v) => write!(f, "{v}"),
        }
    }
}

/// Reads and writes the single-row version table of one target.
#[derive(Debug, Clone)]
pub struct VersionStore {
    table: String,
    table_options: Option<String>,
}

impl VersionStore {
    pub fn new(table: impl Into<String>, table_options: Option<String>) -> Result<Self> {
        let table = table.into();
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
        if !valid {
            return Err(Error::Config(format!(
                "invalid schema version table name `{table}`"
            )));
        }
        Ok(Self {
            table,
            table_options,
        })
    }

    pub fn for_target(db: &DatabaseConfig) -> Result<Self> {
        Self::new(db.schema_version_table.clone(), db.table_options.clone())
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn current_version(&self, db: &mut dyn SqlExecutor) -> Result<CurrentVersion> {
        if !db.table_exists(&self.table)? {
            debug!(
                "table [{}] is not found; this schema is not managed yet",
                self.table
            );
            return Ok(CurrentVersion::Unmanaged);
        }

        let result = db.execute(&format!("SELECT version FROM {}", self.table))?;
        let version = result
            .rows
            .first()
            .and_then(|row| row.get("version").or_else(|| row.first()));
        Ok(match version {
            Some(v) => CurrentVersion::At(v.to_string()),
            None => CurrentVersion::Missing,
        })
    }

    /// Record `version`, creating the table and its row first if needed.
    /// Every step runs on every call.
    pub fn commit(&self, db: &mut dyn SqlExecutor, version: &str) -> Result<()> {
        let version = if version.is_empty() {
            ZERO_VERSION
        } else {
            version
        };

        if !db.table_exists(&self.table)? {
            debug!("creating version table [{}]", self.table);
            db.execute(&self.create_table_sql())?;
        }

        let rows = db.execute(&format!("SELECT version FROM {}", self.table))?;
        if rows.is_empty() {
            db.execute_with(
                &format!("INSERT INTO {} (version) VALUES (?)", self.table),
                &[version],
            )?;
        }

        db.execute_with(&format!("UPDATE {} SET version = ?", self.table), &[version])?;
        debug!("schema version of [{}] set to {version}", self.table);
        Ok(())
    }

    pub fn create_table_sql(&self) -> String {
        let mut sql = format!(
            "CREATE TABLE {} (\n  version VARCHAR(255) NOT NULL,\n  PRIMARY KEY (version)\n)",
            self.table
        );
        if let Some(options) = self.table_options.as_deref().filter(|o| !o.trim().is_empty()) {
            sql.push(' ');
            sql.push_str(options.trim());
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DirectConnection;

    fn store() -> VersionStore {
        VersionStore::new("schema_version", None).unwrap()
    }

    fn row_count(db: &mut DirectConnection) -> usize {
        db.execute("SELECT version FROM schema_version").unwrap().len()
    }

    #[test]
    fn unmanaged_differs_from_zero() {
        let mut db = DirectConnection::in_memory().unwrap();
        let store = store();
        assert_eq!(store.current_version(&mut db).unwrap(), CurrentVersion::Unmanaged);

        store.commit(&mut db, ZERO_VERSION).unwrap();
        assert_eq!(
            store.current_version(&mut db).unwrap(),
            CurrentVersion::At("0".into())
        );
    }

    #[test]
    fn empty_table_reports_missing() {
        let mut db = DirectConnection::in_memory().unwrap();
        let store = store();
        db.execute(&store.create_table_sql()).unwrap();
        assert_eq!(store.current_version(&mut db).unwrap(), CurrentVersion::Missing);
    }

    #[test]
    fn commit_is_idempotent() {
        let mut db = DirectConnection::in_memory().unwrap();
        let store = store();
        store.commit(&mut db, "20240101000000").unwrap();
        store.commit(&mut db, "20240101000000").unwrap();

        assert_eq!(row_count(&mut db), 1);
        assert_eq!(
            store.current_version(&mut db).unwrap().as_deref(),
            Some("20240101000000")
        );
    }

    #[test]
    fn commit_overwrites_the_single_row() {
        let mut db = DirectConnection::in_memory().unwrap();
        let store = store();
        for v in ["20240101000000", "20240102000000", "20240101000000"] {
            store.commit(&mut db, v).unwrap();
            assert_eq!(row_count(&mut db), 1);
        }
        assert_eq!(
            store.current_version(&mut db).unwrap().as_deref(),
            Some("20240101000000")
        );
    }

    #[test]
    fn commit_seeds_an_emptied_table() {
        let mut db = DirectConnection::in_memory().unwrap();
        let store = store();
        store.commit(&mut db, "20240101000000").unwrap();
        db.execute("DELETE FROM schema_version").unwrap();

        store.commit(&mut db, "20240102000000").unwrap();
        assert_eq!(row_count(&mut db), 1);
        assert_eq!(
            store.current_version(&mut db).unwrap().as_deref(),
            Some("20240102000000")
        );
    }

    #[test]
    fn empty_version_commits_zero() {
        let mut db = DirectConnection::in_memory().unwrap();
        let store = store();
        store.commit(&mut db, "").unwrap();
        assert_eq!(store.current_version(&mut db).unwrap().as_deref(), Some("0"));
    }

    #[test]
    fn table_options_are_appended() {
        let store = VersionStore::new(
            "schema_version",
            Some("ENGINE = InnoDB COLLATE = utf8_bin".into()),
        )
        .unwrap();
        let sql = store.create_table_sql();
        assert!(sql.starts_with("CREATE TABLE schema_version ("));
        assert!(sql.contains("version VARCHAR(255) NOT NULL"));
        assert!(sql.ends_with(") ENGINE = InnoDB COLLATE = utf8_bin"));
    }

    #[test]
    fn rejects_unsafe_table_names() {
        assert!(VersionStore::new("schema_version; DROP TABLE x", None).is_err());
        assert!(VersionStore::new("", None).is_err());
        assert!(VersionStore::new("versions_v2", None).is_ok());
    }
}
