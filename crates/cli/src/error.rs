use crate::shutdown::ExitCode;
use connectors::sql::base::error::{ConnectorError, DbError};
use engine_config::error::SettingsError;
use engine_core::error::StateError;
use engine_runtime::error::{EngineError, GuardError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Failed to open state store at {path}: {source}")]
    StateStore {
        path: PathBuf,
        #[source]
        source: StateError,
    },

    #[error("State store error: {0}")]
    State(#[from] StateError),

    #[error("{0}")]
    Guard(#[from] GuardError),

    #[error("Engine error: {0}")]
    Engine(EngineError),

    #[error("Connection error: {0}")]
    Connector(#[from] ConnectorError),

    /// PostgreSQL query error.
    #[error("PostgreSQL error: {0}")]
    Database(#[from] DbError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown requested")]
    ShutdownRequested,
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ShutdownRequested => CliError::ShutdownRequested,
            other => CliError::Engine(other),
        }
    }
}

impl CliError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Settings(_) => ExitCode::Config,
            CliError::StateStore { .. } => ExitCode::StateStoreUnavailable,
            CliError::Guard(GuardError::AlreadyRunning { .. }) => ExitCode::AlreadyRunning,
            CliError::ShutdownRequested => ExitCode::ShutdownRequested,
            _ => ExitCode::GeneralError,
        }
    }
}
