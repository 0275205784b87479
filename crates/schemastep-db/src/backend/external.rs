use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use ring::digest::{SHA256, digest};
use schemastep_common::{Error, Result};
use schemastep_config::ClientConfig;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{ExecutionResult, Row, SqlExecutor};

const ARTIFACT_PREFIX: &str = "schemastep";

/// Runs SQL by feeding it to an external `mysql`-compatible client.
///
/// Each statement is written to a temporary file that is piped to the client
/// on stdin and removed once the client exits, whatever the outcome.
pub struct ExternalProcess {
    target: String,
    client: ClientConfig,
}

impl ExternalProcess {
    pub fn new(target: &str, client: ClientConfig) -> Self {
        Self {
            target: target.to_string(),
            client,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.client.command);
        cmd.arg(format!("-u{}", self.client.user))
            .arg(format!("-p{}", self.client.password))
            .arg(format!("-h{}", self.client.host))
            .arg("--batch")
            .arg("-N")
            .args(&self.client.options)
            .arg(&self.client.database);
        cmd
    }

    /// The command line as logged, with the password masked.
    pub fn display_command(&self) -> String {
        let mut parts = vec![
            self.client.command.clone(),
            format!("-u{}", self.client.user),
            "-p********".to_string(),
            format!("-h{}", self.client.host),
            "--batch".to_string(),
            "-N".to_string(),
        ];
        parts.extend(self.client.options.iter().cloned());
        parts.push(self.client.database.clone());
        parts.join(" ")
    }
}

impl SqlExecutor for ExternalProcess {
    fn execute_with(&mut self, sql: &str, params: &[&str]) -> Result<ExecutionResult> {
        let sql = bind_literals(sql, params)?;
        debug!("executing sql:\n{sql}");

        let artifact = write_artifact(&self.client.temp_dir(), &self.target, &sql)?;
        let stdin = artifact.reopen()?;

        debug!("executing command [{} < {}]", self.display_command(), artifact.path().display());
        let output = self
            .command()
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::Execution {
                statement: sql.clone(),
                output: format!("failed to spawn {}: {e}", self.client.command),
            })?;
        if let Err(e) = artifact.close() {
            warn!("failed to remove temporary sql file: {e}");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut combined = String::new();
            for line in stdout.lines().chain(stderr.lines()) {
                combined.push_str(line);
                combined.push('\n');
            }
            if combined.is_empty() {
                combined = format!("{} exited with {}", self.client.command, output.status);
            }
            return Err(Error::Execution {
                statement: sql,
                output: combined,
            });
        }

        Ok(parse_rows(&stdout))
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        let result = self.execute(&format!("SHOW TABLES LIKE '{}'", like_literal(table)))?;
        Ok(!result.is_empty())
    }
}

/// Each non-empty line is a row of tab-separated columns keyed by position.
fn parse_rows(stdout: &str) -> ExecutionResult {
    let rows = stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut row = Row::new();
            for (idx, value) in line.split('\t').enumerate() {
                row.push(idx.to_string(), value);
            }
            row
        })
        .collect();
    ExecutionResult { rows }
}

/// Quote a value as a single-quoted SQL string literal.
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

/// Escape a table name for use inside a `LIKE '...'` pattern.
fn like_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '_' => out.push_str("\\_"),
            '%' => out.push_str("\\%"),
            _ => out.push(ch),
        }
    }
    out
}

/// Replace each `?` outside quotes and identifiers with the next parameter
/// as a string literal. The client has no way to bind parameters.
pub fn bind_literals(sql: &str, params: &[&str]) -> Result<String> {
    if params.is_empty() {
        return Ok(sql.to_string());
    }

    let mut out = String::with_capacity(sql.len() + params.iter().map(|p| p.len() + 2).sum::<usize>());
    let mut remaining = params.iter();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in sql.chars() {
        match quote {
            Some(q) => {
                out.push(ch);
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' | '`' => {
                    quote = Some(ch);
                    out.push(ch);
                }
                '?' => {
                    let value = remaining.next().ok_or_else(|| Error::Execution {
                        statement: sql.to_string(),
                        output: format!("statement has more placeholders than the {} bound values", params.len()),
                    })?;
                    out.push_str(&quote_literal(value));
                }
                _ => out.push(ch),
            },
        }
    }

    if remaining.next().is_some() {
        return Err(Error::Execution {
            statement: sql.to_string(),
            output: format!("statement has fewer placeholders than the {} bound values", params.len()),
        });
    }
    Ok(out)
}

/// Write `sql` to a fresh file in `dir`. The file is removed when the
/// returned handle is closed or dropped.
fn write_artifact(dir: &Path, target: &str, sql: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(&artifact_prefix(target, sql))
        .suffix(".sql")
        .tempfile_in(dir)?;
    file.write_all(sql.as_bytes())?;
    file.flush()?;
    debug!("created temporary sql file [{}]", file.path().display());
    Ok(file)
}

/// `<prefix>.<target>_<sha256 of sql>.`; the temp file adds a random suffix.
fn artifact_prefix(target: &str, sql: &str) -> String {
    let target: String = target
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let hash = hex::encode(digest(&SHA256, sql.as_bytes()));
    format!("{ARTIFACT_PREFIX}.{target}_{hash}.")
}
