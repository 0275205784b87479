//! SQL execution backends.
//!
//! Every database target runs its SQL through one [`SqlExecutor`], chosen
//! once from the target's configuration by [`open_executor`]. The version
//! store and the runner only ever talk to the trait.

pub mod direct;
pub mod external;

use schemastep_common::{Error, Result};
use schemastep_config::{DatabaseConfig, ExecutionMode};
use tracing::debug;

pub use direct::DirectConnection;
pub use external::ExternalProcess;

/// One output row: `(column, value)` pairs in column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<(String, String)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.columns.push((column.into(), value.into()));
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn first(&self) -> Option<&str> {
        self.columns.first().map(|(_, value)| value.as_str())
    }

    pub fn columns(&self) -> &[(String, String)] {
        &self.columns
    }
}

/// Rows produced by a successful execution. Failures are reported as
/// [`Error::Execution`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub rows: Vec<Row>,
}

impl ExecutionResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row.
    pub fn first_value(&self) -> Option<&str> {
        self.rows.first().and_then(Row::first)
    }
}

pub trait SqlExecutor {
    /// Run `sql`, binding `params` to its `?` placeholders in order.
    fn execute_with(&mut self, sql: &str, params: &[&str]) -> Result<ExecutionResult>;

    fn execute(&mut self, sql: &str) -> Result<ExecutionResult> {
        self.execute_with(sql, &[])
    }

    /// Whether `table` exists, decided by the number of rows a table probe
    /// returns.
    fn table_exists(&mut self, table: &str) -> Result<bool>;
}

/// Open the backend a target is configured for. Client settings are checked
/// here, before anything runs against the target.
pub fn open_executor(db: &DatabaseConfig) -> Result<Box<dyn SqlExecutor>> {
    match db.execution_mode() {
        ExecutionMode::ExternalProcess => {
            let client = db.client.clone().unwrap_or_default();
            client.validate()?;
            debug!("[{}] executing through `{}`", db.name, client.command);
            Ok(Box::new(ExternalProcess::new(&db.name, client)))
        }
        ExecutionMode::DirectConnection => {
            let direct = db.direct.as_ref().ok_or_else(|| {
                Error::Config(format!(
                    "database '{}' has neither [direct] nor an enabled [client] section",
                    db.name
                ))
            })?;
            debug!("[{}] opening direct connection to {}", db.name, direct.path);
            Ok(Box::new(DirectConnection::open(&direct.path)?))
        }
    }
}
