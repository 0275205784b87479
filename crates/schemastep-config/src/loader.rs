use std::path::{Path, PathBuf};

use schemastep_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

pub const DEFAULT_CONFIG_FILE: &str = "schemastep.yml";

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# schemastep configuration
migrations_dir: migrations

databases:
  - name: yourdatabase
    schema_version_table: schema_version

    # Direct connection (SQLite).
    direct:
      path: yourdatabase.sqlite3

    # Run SQL through the mysql client instead of a direct connection.
    # client:
    #   enabled: true
    #   command: /usr/bin/mysql
    #   host: localhost
    #   user: user
    #   password: password
    #   database: yourdatabase
    #   options: ["--default-character-set=utf8"]
    #   temp_dir: /tmp
    # table_options: "ENGINE = InnoDB DEFAULT CHARACTER SET = utf8 COLLATE = utf8_bin"
"#;

/// Reads `AppConfig` from YAML or TOML files.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    pub fn load(path: &Path) -> Result<AppConfig> {
        debug!("loading config from {}", path.display());
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let config = Self::parse(path, &contents)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(path: &Path, contents: &str) -> Result<AppConfig> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => {
                toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
            }
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }

    /// Write a starter config file. Refuses to overwrite.
    pub fn write_default(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(Error::Config(format!("{} already exists", path.display())));
        }
        std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;
        info!("config written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecutionMode;

    #[test]
    fn loads_yaml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schemastep.yml");
        std::fs::write(
            &path,
            "databases:\n  - name: main\n    direct:\n      path: ':memory:'\n  - name: legacy\n    client:\n      enabled: true\n      host: db\n      user: u\n      password: p\n      database: legacy\n",
        )
        .unwrap();

        let config = ConfigLoader::load(&path).unwrap();
        assert_eq!(config.migrations_dir, PathBuf::from("."));
        assert_eq!(config.database_names(), vec!["main", "legacy"]);

        let main = config.database("main").unwrap();
        assert_eq!(main.schema_version_table, "schema_version");
        assert_eq!(main.execution_mode(), ExecutionMode::DirectConnection);

        let legacy = config.database("legacy").unwrap();
        assert_eq!(legacy.execution_mode(), ExecutionMode::ExternalProcess);
        assert_eq!(legacy.client.as_ref().unwrap().command, "mysql");
    }

    #[test]
    fn loads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schemastep.toml");
        std::fs::write(
            &path,
            "migrations_dir = \"db/migrations\"\n\n[[databases]]\nname = \"main\"\nschema_version_table = \"versions\"\n\n[databases.direct]\npath = \"main.sqlite3\"\n",
        )
        .unwrap();

        let config = ConfigLoader::load(&path).unwrap();
        assert_eq!(config.migrations_dir, PathBuf::from("db/migrations"));
        assert_eq!(config.databases[0].schema_version_table, "versions");
        assert_eq!(
            config.databases[0].direct.as_ref().unwrap().path,
            "main.sqlite3"
        );
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schemastep.ini");
        std::fs::write(&path, "x=1").unwrap();
        let err = ConfigLoader::load(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported config extension"));
    }

    #[test]
    fn default_template_parses_and_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        ConfigLoader::write_default(&path).unwrap();

        let config = ConfigLoader::load(&path).unwrap();
        assert_eq!(config.database_names(), vec!["yourdatabase"]);

        assert!(ConfigLoader::write_default(&path).is_err());
    }
}
