use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use schemastep_common::{Error, Result};

use crate::backend::SqlExecutor;

/// A single migration step.
///
/// `up_sql` and `down_sql` return the script to run for each direction; an
/// empty script only moves the tracked version. The four hooks default to
/// no-ops and run once each, around the script, against the same target.
pub trait MigrationTask {
    fn pre_up(&self, _db: &mut dyn SqlExecutor) -> Result<()> {
        Ok(())
    }

    fn up_sql(&self) -> String;

    fn post_up(&self, _db: &mut dyn SqlExecutor) -> Result<()> {
        Ok(())
    }

    fn pre_down(&self, _db: &mut dyn SqlExecutor) -> Result<()> {
        Ok(())
    }

    fn down_sql(&self) -> String;

    fn post_down(&self, _db: &mut dyn SqlExecutor) -> Result<()> {
        Ok(())
    }
}

/// Migration tasks compiled into the binary, keyed by the source name they
/// stand for (e.g. `20240101000000_add_users.rs`).
#[derive(Default, Clone)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn MigrationTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        source_name: impl Into<String>,
        task: impl MigrationTask + 'static,
    ) -> &mut Self {
        self.tasks.insert(source_name.into(), Arc::new(task));
        self
    }

    pub fn get(&self, source_name: &str) -> Option<Arc<dyn MigrationTask>> {
        self.tasks.get(source_name).cloned()
    }

    pub fn contains(&self, source_name: &str) -> bool {
        self.tasks.contains_key(source_name)
    }

    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// A migration written as a plain `.sql` file with `-- up` and `-- down`
/// sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlFileTask {
    up: String,
    down: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

impl SqlFileTask {
    pub fn new(up: impl Into<String>, down: impl Into<String>) -> Self {
        Self {
            up: up.into(),
            down: down.into(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Catalog(format!(
                "failed to read migration file {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self::parse(&content))
    }

    /// Split a script on its section markers. Text before the first marker
    /// and comment-only lines are dropped.
    pub fn parse(content: &str) -> Self {
        let mut up = Vec::new();
        let mut down = Vec::new();
        let mut section = Section::Preamble;

        for line in content.lines() {
            if let Some(marker) = section_marker(line) {
                section = marker;
                continue;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            }

            match section {
                Section::Up => up.push(line),
                Section::Down => down.push(line),
                Section::Preamble => {}
            }
        }

        Self {
            up: up.join("\n").trim().to_string(),
            down: down.join("\n").trim().to_string(),
        }
    }
}

fn section_marker(line: &str) -> Option<Section> {
    let body = line.trim().strip_prefix("--")?;
    let words: Vec<String> = body
        .split_whitespace()
        .map(|w| w.to_ascii_lowercase())
        .collect();
    match words.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["up"] | ["up", "migration"] => Some(Section::Up),
        ["down"] | ["down", "migration"] => Some(Section::Down),
        _ => None,
    }
}

impl MigrationTask for SqlFileTask {
    fn up_sql(&self) -> String {
        self.up.clone()
    }

    fn down_sql(&self) -> String {
        self.down.clone()
    }
}
