#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use schemastep_common::Error;
use schemastep_config::{ClientConfig, DatabaseConfig};
use schemastep_db::{
    CurrentVersion, ExternalProcess, MigrationCatalog, Migrator, SqlExecutor, TaskRegistry,
};
use serial_test::serial;
use tempfile::TempDir;

/// Stands in for the `mysql` client. The version row lives in a state file
/// named by the last argument (the database); every other statement is
/// appended to `<state>.log`.
const FAKE_CLIENT: &str = r#"#!/bin/sh
for last; do :; done
state="$last"
sql=$(cat)
case "$sql" in
  *FAIL*)
    echo "partial output"
    echo "boom" >&2
    exit 1
    ;;
  "SHOW TABLES LIKE"*)
    [ -f "$state" ] && echo "schema_version"
    ;;
  "CREATE TABLE schema_version"*)
    : > "$state"
    ;;
  "SELECT version"*)
    [ -s "$state" ] && cat "$state"
    ;;
  "INSERT INTO schema_version"*|"UPDATE schema_version"*)
    echo "$sql" | cut -d"'" -f2 > "$state"
    ;;
  "SELECT ROWS"*)
    printf 'a\tb\nc\td\n'
    ;;
  *)
    echo "$sql" >> "$state.log"
    ;;
esac
exit 0
"#;

struct Fixture {
    dir: TempDir,
    temp: TempDir,
    script: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-mysql");
        std::fs::write(&script, FAKE_CLIENT).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, temp, script }
    }

    fn state(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    fn client(&self) -> ClientConfig {
        ClientConfig {
            enabled: true,
            command: self.script.display().to_string(),
            host: "localhost".into(),
            user: "app".into(),
            password: "secret".into(),
            database: self.state().display().to_string(),
            options: Vec::new(),
            temp_dir: Some(self.temp.path().to_path_buf()),
        }
    }

    fn executed(&self) -> String {
        let log = self.dir.path().join("state.log");
        std::fs::read_to_string(log).unwrap_or_default()
    }

    fn leftover_artifacts(&self) -> usize {
        std::fs::read_dir(self.temp.path()).unwrap().count()
    }
}

fn write(dir: &Path, name: &str, body: &str) {
    std::fs::write(dir.join(name), body).unwrap();
}

#[test]
#[serial]
fn rows_come_back_keyed_by_position() {
    let fx = Fixture::new();
    let mut client = ExternalProcess::new("legacy", fx.client());

    let result = client.execute("SELECT ROWS").unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result.rows[0].get("0"), Some("a"));
    assert_eq!(result.rows[1].get("1"), Some("d"));
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[test]
#[serial]
fn failed_client_reports_its_output() {
    let fx = Fixture::new();
    let mut client = ExternalProcess::new("legacy", fx.client());

    let err = client.execute("SELECT 'FAIL'").unwrap_err();
    match err {
        Error::Execution { statement, output } => {
            assert_eq!(statement, "SELECT 'FAIL'");
            assert!(output.contains("partial output"), "{output}");
            assert!(output.contains("boom"), "{output}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[test]
#[serial]
fn missing_client_binary_is_an_execution_error() {
    let fx = Fixture::new();
    let mut config = fx.client();
    config.command = fx.dir.path().join("no-such-client").display().to_string();
    let mut client = ExternalProcess::new("legacy", config);

    let err = client.execute("SELECT 1").unwrap_err();
    assert!(matches!(err, Error::Execution { .. }));
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[test]
#[serial]
fn migrates_up_and_down_through_the_client() {
    let fx = Fixture::new();
    let migrations = tempfile::tempdir().unwrap();
    write(
        migrations.path(),
        "20240101000000_create_users.sql",
        "-- up\nCREATE TABLE users (id INT);\n-- down\nDROP TABLE users;\n",
    );
    write(
        migrations.path(),
        "20240102000000_create_posts.sql",
        "-- up\nCREATE TABLE posts (id INT);\n-- down\nDROP TABLE posts;\n",
    );

    let mut db = DatabaseConfig::new("legacy");
    db.client = Some(fx.client());
    let catalog = MigrationCatalog::scan(migrations.path(), TaskRegistry::new()).unwrap();
    let mut migrator = Migrator::new(vec![db], catalog);

    let report = migrator.migrate(&[]).unwrap().remove(0);
    assert_eq!(report.from, CurrentVersion::Unmanaged);
    assert_eq!(report.to.as_deref(), Some("20240102000000"));
    assert_eq!(
        std::fs::read_to_string(fx.state()).unwrap().trim(),
        "20240102000000"
    );
    assert_eq!(
        migrator.current_version("legacy").unwrap(),
        CurrentVersion::At("20240102000000".into())
    );

    let report = migrator.step_down(&[]).unwrap().remove(0);
    assert_eq!(report.to.as_deref(), Some("20240101000000"));

    let executed = fx.executed();
    let users = executed.find("CREATE TABLE users").unwrap();
    let posts = executed.find("CREATE TABLE posts").unwrap();
    let drop = executed.find("DROP TABLE posts").unwrap();
    assert!(users < posts && posts < drop);
    assert!(!executed.contains("DROP TABLE users"));
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[test]
#[serial]
fn failing_script_stops_before_commit() {
    let fx = Fixture::new();
    let migrations = tempfile::tempdir().unwrap();
    write(
        migrations.path(),
        "20240101000000_create_users.sql",
        "-- up\nCREATE TABLE users (id INT);\n",
    );
    write(
        migrations.path(),
        "20240102000000_broken.sql",
        "-- up\nFAIL;\n",
    );

    let mut db = DatabaseConfig::new("legacy");
    db.client = Some(fx.client());
    let catalog = MigrationCatalog::scan(migrations.path(), TaskRegistry::new()).unwrap();
    let mut migrator = Migrator::new(vec![db], catalog);

    let err = migrator.migrate(&[]).unwrap_err();
    assert!(matches!(err.root(), Error::Execution { .. }));
    assert_eq!(
        migrator.current_version("legacy").unwrap(),
        CurrentVersion::At("20240101000000".into())
    );
    assert_eq!(fx.leftover_artifacts(), 0);
}
