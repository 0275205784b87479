use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error(
        "can't use the same task name for two migrations: duplicate task [{task_key}] in {first} and {second}"
    )]
    DuplicateTask {
        task_key: String,
        first: String,
        second: String,
    },

    #[error("execution error in `{statement}`: {output}")]
    Execution { statement: String, output: String },

    #[error("hook error in {migration}: {message}")]
    Hook { migration: String, message: String },

    #[error("database '{0}' is not defined")]
    UnknownTarget(String),

    #[error("[{target}] {source}")]
    Target {
        target: String,
        #[source]
        source: Box<Error>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Attach the name of the database target the error occurred on.
    pub fn in_target(self, target: &str) -> Self {
        match self {
            Error::Target { .. } => self,
            other => Error::Target {
                target: target.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with any target wrapper removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::Target { source, .. } => source.root(),
            other => other,
        }
    }
}
