//! Applies and reverts migrations across database targets.
//!
//! Targets are processed one after another in the order given (or the
//! configured order when none are named). The first error stops the whole
//! run; targets already migrated keep their new version.
//!
//! Within a target every migration runs pre hook, script, post hook and then
//! commits its own version, so a failure leaves the version table at the
//! last migration that completed. A crash between a script and its commit
//! leaves the table one step behind the schema; nothing here reconciles that.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

use schemastep_common::{Error, Result};
use schemastep_config::DatabaseConfig;
use tracing::info;

use crate::backend::{self, SqlExecutor};
use crate::catalog::{MigrationCatalog, MigrationDefinition};
use crate::task::MigrationTask;
use crate::version_store::{CurrentVersion, VersionStore, ZERO_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Pending migrations of one target.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub target: String,
    pub current: CurrentVersion,
    pub pending: Vec<MigrationDefinition>,
}

/// What a migrate, up or down run did to one target.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub target: String,
    pub direction: Direction,
    pub from: CurrentVersion,
    /// Version committed last, `None` when nothing ran.
    pub to: Option<String>,
    pub migrations: Vec<MigrationDefinition>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Owns the configured targets, the shared catalog and one executor per
/// target, opened on first use.
pub struct Migrator {
    databases: Vec<DatabaseConfig>,
    catalog: MigrationCatalog,
    executors: HashMap<String, Box<dyn SqlExecutor>>,
}

impl Migrator {
    pub fn new(databases: Vec<DatabaseConfig>, catalog: MigrationCatalog) -> Self {
        Self {
            databases,
            catalog,
            executors: HashMap::new(),
        }
    }

    /// Use `executor` for `target` instead of opening one from its settings.
    pub fn with_executor(mut self, target: &str, executor: Box<dyn SqlExecutor>) -> Self {
        self.executors.insert(target.to_string(), executor);
        self
    }

    /// The named targets in the order given, or every configured target when
    /// `names` is empty.
    pub fn resolve_targets(&self, names: &[String]) -> Result<Vec<DatabaseConfig>> {
        if names.is_empty() {
            if self.databases.is_empty() {
                return Err(Error::Config("no databases are configured".into()));
            }
            return Ok(self.databases.clone());
        }

        names
            .iter()
            .map(|name| {
                self.databases
                    .iter()
                    .find(|db| &db.name == name)
                    .cloned()
                    .ok_or_else(|| Error::UnknownTarget(name.clone()))
            })
            .collect()
    }

    pub fn current_version(&mut self, target: &str) -> Result<CurrentVersion> {
        let db = self.find_target(target)?;
        let store = VersionStore::for_target(&db)?;
        let executor = executor_for(&mut self.executors, &db)?;
        store
            .current_version(executor)
            .map_err(|e| e.in_target(target))
    }

    pub fn status(&mut self, names: &[String]) -> Result<Vec<StatusReport>> {
        let targets = self.resolve_targets(names)?;
        let mut reports = Vec::with_capacity(targets.len());
        for db in &targets {
            let report = self.status_target(db).map_err(|e| e.in_target(&db.name))?;
            reports.push(report);
        }
        Ok(reports)
    }

    /// Apply every pending migration on each target.
    pub fn migrate(&mut self, names: &[String]) -> Result<Vec<MigrationReport>> {
        self.for_each_target(names, |m, db| m.up_target(db, None))
    }

    /// Apply the next pending migration on each target.
    pub fn step_up(&mut self, names: &[String]) -> Result<Vec<MigrationReport>> {
        self.for_each_target(names, |m, db| m.up_target(db, Some(1)))
    }

    /// Revert the current migration on each target.
    pub fn step_down(&mut self, names: &[String]) -> Result<Vec<MigrationReport>> {
        self.for_each_target(names, |m, db| m.down_target(db))
    }

    fn for_each_target<F>(&mut self, names: &[String], mut run: F) -> Result<Vec<MigrationReport>>
    where
        F: FnMut(&mut Self, &DatabaseConfig) -> Result<MigrationReport>,
    {
        let targets = self.resolve_targets(names)?;
        let mut reports = Vec::with_capacity(targets.len());
        for db in &targets {
            let report = run(self, db).map_err(|e| e.in_target(&db.name))?;
            reports.push(report);
        }
        Ok(reports)
    }

    fn find_target(&self, name: &str) -> Result<DatabaseConfig> {
        self.databases
            .iter()
            .find(|db| db.name == name)
            .cloned()
            .ok_or_else(|| Error::UnknownTarget(name.to_string()))
    }

    fn resolve_version(
        &mut self,
        db: &DatabaseConfig,
    ) -> Result<(VersionStore, CurrentVersion)> {
        let store = VersionStore::for_target(db)?;
        let executor = executor_for(&mut self.executors, db)?;
        let current = store.current_version(executor)?;
        if let CurrentVersion::At(version) = &current {
            info!("[{}] current schema version is {version}", db.name);
        }
        Ok((store, current))
    }

    fn status_target(&mut self, db: &DatabaseConfig) -> Result<StatusReport> {
        let (_, current) = self.resolve_version(db)?;
        let pending: Vec<MigrationDefinition> = self
            .catalog
            .filter_up(current.as_deref())
            .into_iter()
            .cloned()
            .collect();
        Ok(StatusReport {
            target: db.name.clone(),
            current,
            pending,
        })
    }

    fn up_target(&mut self, db: &DatabaseConfig, limit: Option<usize>) -> Result<MigrationReport> {
        let (store, current) = self.resolve_version(db)?;
        let mut report = MigrationReport {
            target: db.name.clone(),
            direction: Direction::Up,
            from: current.clone(),
            to: None,
            migrations: Vec::new(),
        };

        let mut candidates = self.catalog.filter_up(current.as_deref());
        if candidates.is_empty() {
            info!("[{}] already up to date", db.name);
            return Ok(report);
        }
        if let Some(limit) = limit {
            candidates.truncate(limit);
        }

        let executor = executor_for(&mut self.executors, db)?;
        for definition in candidates {
            info!("[{}] processing migrate up by {}", db.name, definition.source);
            let task = self.catalog.load_task(definition)?;
            run_task(Direction::Up, task.as_ref(), executor)?;
            store.commit(executor, &definition.identifier)?;

            report.to = Some(definition.identifier.clone());
            report.migrations.push(definition.clone());
        }
        Ok(report)
    }

    fn down_target(&mut self, db: &DatabaseConfig) -> Result<MigrationReport> {
        let (store, current) = self.resolve_version(db)?;
        let mut report = MigrationReport {
            target: db.name.clone(),
            direction: Direction::Down,
            from: current.clone(),
            to: None,
            migrations: Vec::new(),
        };

        let candidates = self.catalog.filter_down(current.as_deref());
        let Some(definition) = candidates.first().copied() else {
            info!(
                "[{}] no migration older than the current schema version",
                db.name
            );
            return Ok(report);
        };
        let previous = candidates
            .get(1)
            .map(|def| def.identifier.clone())
            .unwrap_or_else(|| ZERO_VERSION.to_string());

        info!(
            "[{}] processing migrate down to version {previous} by {}",
            db.name, definition.source
        );
        let executor = executor_for(&mut self.executors, db)?;
        let task = self.catalog.load_task(definition)?;
        run_task(Direction::Down, task.as_ref(), executor)?;
        store.commit(executor, &previous)?;

        report.to = Some(previous);
        report.migrations.push(definition.clone());
        Ok(report)
    }
}

/// The cached executor for `db`, opened on first use.
fn executor_for<'a>(
    executors: &'a mut HashMap<String, Box<dyn SqlExecutor>>,
    db: &DatabaseConfig,
) -> Result<&'a mut dyn SqlExecutor> {
    let executor = match executors.entry(db.name.clone()) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => entry.insert(backend::open_executor(db)?),
    };
    Ok(executor.as_mut())
}

fn run_task(
    direction: Direction,
    task: &dyn MigrationTask,
    db: &mut dyn SqlExecutor,
) -> Result<()> {
    match direction {
        Direction::Up => {
            task.pre_up(db)?;
            execute_payload(db, &task.up_sql())?;
            task.post_up(db)?;
        }
        Direction::Down => {
            task.pre_down(db)?;
            execute_payload(db, &task.down_sql())?;
            task.post_down(db)?;
        }
    }
    Ok(())
}

fn execute_payload(db: &mut dyn SqlExecutor, sql: &str) -> Result<()> {
    if sql.trim().is_empty() {
        return Ok(());
    }
    db.execute(sql)?;
    Ok(())
}
