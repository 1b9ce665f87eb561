use chrono::{DateTime, Utc};
use model::core::identifiers::TableKey;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("State storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Failed to encode or decode tracked table: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Failed to export state: {0}")]
    Export(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Table {0} is not tracked")]
    NotTracked(TableKey),

    #[error("Refusing to move watermark of {key} backwards from {current} to {proposed}")]
    WatermarkRegression {
        key: TableKey,
        current: DateTime<Utc>,
        proposed: DateTime<Utc>,
    },
}
