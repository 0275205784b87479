pub mod backend;
pub mod catalog;
pub mod runner;
pub mod scaffold;
pub mod task;
pub mod version_store;

pub use backend::{DirectConnection, ExecutionResult, ExternalProcess, Row, SqlExecutor};
pub use catalog::{MigrationCatalog, MigrationDefinition, SourceLocator};
pub use runner::{Direction, MigrationReport, Migrator, StatusReport};
pub use task::{MigrationTask, SqlFileTask, TaskRegistry};
pub use version_store::{CurrentVersion, VersionStore, ZERO_VERSION};
