use std::collections::HashSet;
use std::path::PathBuf;

use schemastep_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_VERSION_TABLE: &str = "schema_version";
const MASK: &str = "********";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,

    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            migrations_dir: default_migrations_dir(),
            databases: Vec::new(),
        }
    }
}

/// One migration target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,

    #[serde(default = "default_version_table")]
    pub schema_version_table: String,

    /// Appended to the tracking table DDL, e.g. engine and collation clauses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_options: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct: Option<DirectConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectConfig {
    /// SQLite database file, or `:memory:`.
    pub path: String,
}

/// Settings for running SQL through an external `mysql`-compatible client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_client_command")]
    pub command: String,

    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub database: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: default_client_command(),
            host: String::new(),
            user: String::new(),
            password: String::new(),
            database: String::new(),
            options: Vec::new(),
            temp_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    DirectConnection,
    ExternalProcess,
}

impl DatabaseConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema_version_table: default_version_table(),
            table_options: None,
            direct: None,
            client: None,
        }
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        match &self.client {
            Some(client) if client.enabled => ExecutionMode::ExternalProcess,
            _ => ExecutionMode::DirectConnection,
        }
    }
}

impl ClientConfig {
    /// Every connection setting the client needs must be present before
    /// anything is executed.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("user", &self.user),
            ("host", &self.host),
            ("password", &self.password),
            ("database", &self.database),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Config(format!(
                    "the external client is enabled, so [client.{key}] is required"
                )));
            }
        }
        if self.command.trim().is_empty() {
            return Err(Error::Config("[client.command] cannot be empty".into()));
        }
        Ok(())
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl AppConfig {
    pub fn database(&self, name: &str) -> Option<&DatabaseConfig> {
        self.databases.iter().find(|db| db.name == name)
    }

    pub fn database_names(&self) -> Vec<&str> {
        self.databases.iter().map(|db| db.name.as_str()).collect()
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for db in &self.databases {
            if db.name.trim().is_empty() {
                return Err(Error::Config("database name cannot be empty".into()));
            }
            if !seen.insert(db.name.as_str()) {
                return Err(Error::Config(format!(
                    "database '{}' is defined more than once",
                    db.name
                )));
            }
            if db.schema_version_table.trim().is_empty() {
                return Err(Error::Config(format!(
                    "database '{}' has an empty schema_version_table",
                    db.name
                )));
            }
        }
        Ok(())
    }

    /// Every setting as a `(dotted.key, value)` pair, sorted by key.
    /// Passwords are masked.
    pub fn flatten(&self) -> Result<Vec<(String, String)>> {
        let mut root = serde_json::Map::new();
        root.insert(
            "migrations_dir".into(),
            Value::String(self.migrations_dir.display().to_string()),
        );
        let mut databases = serde_json::Map::new();
        for db in &self.databases {
            databases.insert(db.name.clone(), serde_json::to_value(db)?);
        }
        root.insert("databases".into(), Value::Object(databases));

        let mut out = Vec::new();
        flatten_value("", &Value::Object(root), &mut out);
        Ok(out)
    }
}

fn flatten_value(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_value(&path, child, out);
            }
        }
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            out.push((prefix.to_string(), joined));
        }
        Value::Null => {}
        Value::String(s) if prefix.ends_with("password") && !s.is_empty() => {
            out.push((prefix.to_string(), MASK.to_string()));
        }
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_version_table() -> String {
    DEFAULT_VERSION_TABLE.to_string()
}

fn default_client_command() -> String {
    "mysql".to_string()
}
