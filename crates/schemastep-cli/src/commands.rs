use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use schemastep_config::{AppConfig, ConfigLoader};
use schemastep_db::{
    MigrationCatalog, MigrationReport, Migrator, StatusReport, TaskRegistry, scaffold,
};
use tracing::debug;

pub fn init(config_path: &Path) -> Result<()> {
    ConfigLoader::write_default(config_path)
        .with_context(|| format!("failed to initialize {}", config_path.display()))?;
    println!("Created {}", config_path.display());
    println!("Edit it, then run `schemastep status` to check the connection.");
    Ok(())
}

pub fn show_config(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    println!("config file: {}", config_path.display());
    for (key, value) in config.flatten()? {
        println!("{key} = {value}");
    }
    Ok(())
}

pub fn status(config_path: &Path, databases: &[String]) -> Result<()> {
    let mut migrator = build_migrator(config_path)?;
    for report in migrator.status(databases)? {
        print_status(&report);
    }
    Ok(())
}

pub fn create(config_path: &Path, name: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let dir = migrations_dir(config_path, &config);

    let catalog = if dir.is_dir() {
        MigrationCatalog::scan(&dir, TaskRegistry::new())?
    } else {
        MigrationCatalog::from_registry(TaskRegistry::new())?
    };
    let identifier = scaffold::new_identifier();
    let path = scaffold::create_migration(&dir, name, &identifier, &catalog)?;
    println!("Created {}", path.display());
    Ok(())
}

pub fn migrate(config_path: &Path, databases: &[String]) -> Result<()> {
    let mut migrator = build_migrator(config_path)?;
    let reports = migrator.migrate(databases)?;
    print_reports(&reports);
    Ok(())
}

pub fn up(config_path: &Path, databases: &[String]) -> Result<()> {
    let mut migrator = build_migrator(config_path)?;
    let reports = migrator.step_up(databases)?;
    print_reports(&reports);
    Ok(())
}

pub fn down(config_path: &Path, databases: &[String]) -> Result<()> {
    let mut migrator = build_migrator(config_path)?;
    let reports = migrator.step_down(databases)?;
    print_reports(&reports);
    Ok(())
}

fn load_config(config_path: &Path) -> Result<AppConfig> {
    ConfigLoader::load(config_path).with_context(|| {
        format!(
            "failed to load {} (run `schemastep init` to create one)",
            config_path.display()
        )
    })
}

/// A relative migrations dir is taken from the config file's directory.
fn migrations_dir(config_path: &Path, config: &AppConfig) -> PathBuf {
    if config.migrations_dir.is_absolute() {
        return config.migrations_dir.clone();
    }
    config_path
        .parent()
        .map(|parent| parent.join(&config.migrations_dir))
        .unwrap_or_else(|| config.migrations_dir.clone())
}

fn build_migrator(config_path: &Path) -> Result<Migrator> {
    let config = load_config(config_path)?;
    let dir = migrations_dir(config_path, &config);
    debug!("scanning migrations in {}", dir.display());

    let catalog = MigrationCatalog::scan(&dir, TaskRegistry::new())
        .with_context(|| format!("failed to read migrations from {}", dir.display()))?;
    Ok(Migrator::new(config.databases, catalog))
}

fn print_status(report: &StatusReport) {
    println!("[{}] current version: {}", report.target, report.current);
    if report.pending.is_empty() {
        println!("  up to date");
        return;
    }
    println!("  {} pending:", report.pending.len());
    for definition in &report.pending {
        println!("    {}", definition.source);
    }
}

fn print_reports(reports: &[MigrationReport]) {
    for report in reports {
        match &report.to {
            None => println!("[{}] nothing to do at {}", report.target, report.from),
            Some(to) => {
                println!(
                    "[{}] migrated {} from {} to {}",
                    report.target,
                    report.direction,
                    report.from,
                    to
                );
                for definition in &report.migrations {
                    println!("    {}", definition.source);
                }
            }
        }
    }
}
