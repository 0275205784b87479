use std::path::{Path, PathBuf};

use chrono::Local;
use schemastep_common::{Error, Result};
use tracing::info;

use crate::catalog::{MigrationCatalog, SQL_EXTENSION, task_key};

/// A fresh 14-digit identifier from the local clock.
pub fn new_identifier() -> String {
    Local::now().format("%Y%m%d%H%M%S").to_string()
}

/// Write an empty `<identifier>_<name>.sql` migration into `dir`.
pub fn create_migration(
    dir: &Path,
    name: &str,
    identifier: &str,
    catalog: &MigrationCatalog,
) -> Result<PathBuf> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(Error::Catalog(format!(
            "migration name `{name}` may only contain letters, digits, '_' and '-'"
        )));
    }

    let file_name = format!("{identifier}_{name}.{SQL_EXTENSION}");
    let key = task_key(name);
    if let Some(existing) = catalog.find_task_key(&key) {
        return Err(Error::DuplicateTask {
            task_key: key,
            first: existing.source.clone(),
            second: file_name,
        });
    }

    std::fs::create_dir_all(dir)?;
    let path = dir.join(&file_name);
    if path.exists() {
        return Err(Error::Catalog(format!("{} already exists", path.display())));
    }

    let template = format!(
        "-- Migration: {name}\n\
         -- Created: {created}\n\
         \n\
         -- up\n\
         \n\
         \n\
         -- down\n\
         \n",
        created = Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    std::fs::write(&path, template)?;
    info!("created {}", path.display());
    Ok(path)
}
