use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use schemastep_common::{Error, Result};
use tracing::debug;

use crate::task::{MigrationTask, SqlFileTask, TaskRegistry};

/// Extension of migrations written as plain SQL scripts.
pub const SQL_EXTENSION: &str = "sql";

static SOURCE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)_(.+)\.([A-Za-z0-9]+)$").expect("source name pattern is valid")
});

/// Where a migration's task comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    File(PathBuf),
    Registered(String),
}

/// One discovered migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDefinition {
    /// Leading digit run of the source name, compared as a string.
    pub identifier: String,
    pub name: String,
    pub task_key: String,
    /// File name, e.g. `20240101000000_add_users.sql`.
    pub source: String,
    pub locator: SourceLocator,
}

impl MigrationDefinition {
    /// Build a definition from a source name of the form `<digits>_<name>.<ext>`.
    pub fn parse(source: &str, locator: SourceLocator) -> Option<Self> {
        let caps = SOURCE_NAME.captures(source)?;
        let identifier = caps[1].to_string();
        let name = caps[2].to_string();
        Some(Self {
            task_key: task_key(&name),
            identifier,
            name,
            source: source.to_string(),
            locator,
        })
    }
}

/// Canonical task name: delimiters dropped and each word capitalised, so
/// `add_users`, `add-users` and `addUsers` all become `AddUsers`.
pub fn task_key(name: &str) -> String {
    name.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Ordered set of migrations shared by every database target.
pub struct MigrationCatalog {
    definitions: Vec<MigrationDefinition>,
    registry: TaskRegistry,
}

impl MigrationCatalog {
    /// Catalog made only of compiled-in tasks.
    pub fn from_registry(registry: TaskRegistry) -> Result<Self> {
        let mut sources: Vec<(String, SourceLocator)> = registry
            .source_names()
            .map(|name| (name.to_string(), SourceLocator::Registered(name.to_string())))
            .collect();
        sources.sort_by(|a, b| a.0.cmp(&b.0));
        Self::build(sources, registry)
    }

    /// Scan `dir` for `<digits>_<name>.sql` files and merge them with the
    /// registered tasks. A file whose name is registered is backed by the
    /// registered task.
    pub fn scan(dir: &Path, registry: TaskRegistry) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Catalog(format!(
                "failed to read migrations directory {}: {e}",
                dir.display()
            ))
        })?;

        let mut sources: HashMap<String, SourceLocator> = registry
            .source_names()
            .map(|name| (name.to_string(), SourceLocator::Registered(name.to_string())))
            .collect();

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let is_sql = path.extension().is_some_and(|ext| ext == SQL_EXTENSION);
            if !is_sql && !registry.contains(file_name) {
                debug!("skipping {}: not a migration source", path.display());
                continue;
            }
            sources.insert(file_name.to_string(), SourceLocator::File(path.clone()));
        }

        let mut sources: Vec<_> = sources.into_iter().collect();
        sources.sort_by(|a, b| a.0.cmp(&b.0));
        Self::build(sources, registry)
    }

    fn build(sources: Vec<(String, SourceLocator)>, registry: TaskRegistry) -> Result<Self> {
        let mut seen: HashMap<String, String> = HashMap::new();
        let mut definitions = Vec::with_capacity(sources.len());

        for (source, locator) in sources {
            let Some(definition) = MigrationDefinition::parse(&source, locator.clone()) else {
                if matches!(locator, SourceLocator::Registered(_)) {
                    return Err(Error::Catalog(format!(
                        "registered task `{source}` must be named <digits>_<name>.<ext>"
                    )));
                }
                debug!("skipping {source}: name does not match <digits>_<name>.<ext>");
                continue;
            };

            if let Some(first) = seen.get(&definition.task_key) {
                return Err(Error::DuplicateTask {
                    task_key: definition.task_key.clone(),
                    first: first.clone(),
                    second: definition.source.clone(),
                });
            }
            seen.insert(definition.task_key.clone(), definition.source.clone());
            definitions.push(definition);
        }

        definitions.sort_by(|a, b| {
            a.identifier
                .cmp(&b.identifier)
                .then_with(|| a.source.cmp(&b.source))
        });
        debug!("catalog holds {} migrations", definitions.len());

        Ok(Self {
            definitions,
            registry,
        })
    }

    /// All migrations, ascending by identifier.
    pub fn definitions(&self) -> &[MigrationDefinition] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Migrations newer than `current`, ascending. A missing version compares
    /// as the empty string, so everything is pending.
    pub fn filter_up(&self, current: Option<&str>) -> Vec<&MigrationDefinition> {
        let current = current.unwrap_or("");
        self.definitions
            .iter()
            .filter(|def| def.identifier.as_str() > current)
            .collect()
    }

    /// Migrations at or below `current`, descending. The head is the one to
    /// revert and the next element, if any, is the version to fall back to.
    pub fn filter_down(&self, current: Option<&str>) -> Vec<&MigrationDefinition> {
        let current = current.unwrap_or("");
        self.definitions
            .iter()
            .rev()
            .filter(|def| def.identifier.as_str() <= current)
            .collect()
    }

    pub fn find_task_key(&self, key: &str) -> Option<&MigrationDefinition> {
        self.definitions.iter().find(|def| def.task_key == key)
    }

    /// Resolve the task behind a definition.
    pub fn load_task(&self, definition: &MigrationDefinition) -> Result<Arc<dyn MigrationTask>> {
        if let Some(task) = self.registry.get(&definition.source) {
            return Ok(task);
        }
        match &definition.locator {
            SourceLocator::File(path) => Ok(Arc::new(SqlFileTask::load(path)?)),
            SourceLocator::Registered(name) => Err(Error::Catalog(format!(
                "no task registered for {name}"
            ))),
        }
    }
}
