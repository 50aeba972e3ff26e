//! Error types for SysTools

use std::path::PathBuf;
use thiserror::Error;

use crate::disposition::DispositionError;

/// Main error type for SysTools operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("No plugins found in {}", dir.display())]
    NoPluginsFound { dir: PathBuf },

    #[error("No plugins selected")]
    EmptySelection,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Disposition(#[from] DispositionError),
}

/// Errors raised when starting or joining a batch
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("A batch is already running")]
    AlreadyRunning,

    #[error("Refusing to start an empty batch")]
    EmptyBatch,

    #[error("Failed to spawn batch worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Batch worker panicked")]
    WorkerPanicked,
}

impl Error {
    /// Process exit status for errors that end an unattended run
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Disposition(_) => 2,
            _ => 1,
        }
    }
}

/// Result type alias for SysTools operations
pub type Result<T> = std::result::Result<T, Error>;
