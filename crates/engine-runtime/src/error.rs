use connectors::sql::base::error::{ConnectorError, DbError};
use engine_core::error::StateError;
use model::core::identifiers::SourceId;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors reported by a pipeline engine for one job.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Source error: {0}")]
    Source(#[from] DbError),

    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The job task panicked or was aborted.
    #[error("Job task failed: {0}")]
    Join(String),

    #[error("Pipeline failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Provisioning I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode destination schema: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Another instance is already running on {addr} (pid {pid})")]
    AlreadyRunning { addr: SocketAddr, pid: u32 },

    #[error("Address {addr} is taken but did not report a process id: {reason}")]
    Unreachable { addr: SocketAddr, reason: String },
}

/// Top-level errors of the extraction engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to connect to source {source_id}: {error}")]
    Connect {
        source_id: SourceId,
        #[source]
        error: ConnectorError,
    },

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("State store error: {0}")]
    State(#[from] StateError),

    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Shutdown requested")]
    ShutdownRequested,
}
