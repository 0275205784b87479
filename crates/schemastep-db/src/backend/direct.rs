use rusqlite::types::ValueRef;
use rusqlite::{Batch, Connection, Statement, params_from_iter};
use schemastep_common::{Error, Result};
use tracing::{debug, info};

use super::{ExecutionResult, Row, SqlExecutor};

const IN_MEMORY: &str = ":memory:";

/// Runs SQL over a live SQLite connection held for the life of the runner.
pub struct DirectConnection {
    conn: Connection,
}

impl DirectConnection {
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == IN_MEMORY {
            Connection::open_in_memory()
        } else {
            info!("opening database at {path}");
            Connection::open(path)
        }
        .map_err(|e| Error::Database(format!("failed to open database {path}: {e}")))?;

        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(IN_MEMORY)
    }
}

fn execution_error(sql: &str, e: rusqlite::Error) -> Error {
    Error::Execution {
        statement: sql.to_string(),
        output: e.to_string(),
    }
}

fn value_to_string(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
    }
}

/// Step one prepared statement, collecting its rows if it produces any.
fn run_statement(
    stmt: &mut Statement<'_>,
    params: &[&str],
    out: &mut Vec<Row>,
) -> rusqlite::Result<()> {
    if stmt.column_count() == 0 {
        stmt.execute(params_from_iter(params.iter()))?;
        return Ok(());
    }

    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    while let Some(row) = rows.next()? {
        let mut out_row = Row::new();
        for (idx, name) in names.iter().enumerate() {
            out_row.push(name.clone(), value_to_string(row.get_ref(idx)?));
        }
        out.push(out_row);
    }
    Ok(())
}

impl SqlExecutor for DirectConnection {
    fn execute_with(&mut self, sql: &str, params: &[&str]) -> Result<ExecutionResult> {
        debug!("executing sql:\n{sql}");
        let mut rows = Vec::new();

        if params.is_empty() {
            // Scripts may hold several statements; run them in order.
            let mut batch = Batch::new(&self.conn, sql);
            while let Some(mut stmt) = batch.next().map_err(|e| execution_error(sql, e))? {
                run_statement(&mut stmt, &[], &mut rows).map_err(|e| execution_error(sql, e))?;
            }
        } else {
            let mut stmt = self
                .conn
                .prepare(sql)
                .map_err(|e| execution_error(sql, e))?;
            run_statement(&mut stmt, params, &mut rows).map_err(|e| execution_error(sql, e))?;
        }

        Ok(ExecutionResult { rows })
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        let result = self.execute_with(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[table],
        )?;
        Ok(!result.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_multi_statement_scripts() {
        let mut db = DirectConnection::in_memory().unwrap();
        db.execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO users (name) VALUES ('alice');
             INSERT INTO users (name) VALUES ('bob');",
        )
        .unwrap();

        let result = db.execute("SELECT id, name FROM users ORDER BY id").unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.rows[0].get("id"), Some("1"));
        assert_eq!(result.rows[1].get("name"), Some("bob"));
    }

    #[test]
    fn binds_parameters() {
        let mut db = DirectConnection::in_memory().unwrap();
        db.execute("CREATE TABLE t (v VARCHAR(255))").unwrap();
        db.execute_with("INSERT INTO t (v) VALUES (?)", &["it's"]).unwrap();

        let result = db
            .execute_with("SELECT v FROM t WHERE v = ?", &["it's"])
            .unwrap();
        assert_eq!(result.first_value(), Some("it's"));
    }

    #[test]
    fn null_values_become_empty_strings() {
        let mut db = DirectConnection::in_memory().unwrap();
        let result = db.execute("SELECT NULL AS n, 1.5 AS r").unwrap();
        assert_eq!(result.rows[0].get("n"), Some(""));
        assert_eq!(result.rows[0].get("r"), Some("1.5"));
    }

    #[test]
    fn errors_carry_the_statement() {
        let mut db = DirectConnection::in_memory().unwrap();
        match db.execute("SELEC 1") {
            Err(Error::Execution { statement, output }) => {
                assert_eq!(statement, "SELEC 1");
                assert!(output.contains("syntax error"), "output: {output}");
            }
            other => panic!("expected execution error, got {other:?}"),
        }
    }

    #[test]
    fn table_probe() {
        let mut db = DirectConnection::in_memory().unwrap();
        assert!(!db.table_exists("schema_version").unwrap());
        db.execute("CREATE TABLE schema_version (version VARCHAR(255))")
            .unwrap();
        assert!(db.table_exists("schema_version").unwrap());
        assert!(!db.table_exists("schema_versions").unwrap());
    }
}
