pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{AppConfig, ClientConfig, DatabaseConfig, DirectConfig, ExecutionMode};
