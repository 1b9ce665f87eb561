use crate::sql::base::{adapter::SourceAdapter, error::ConnectorError};
use async_trait::async_trait;
use model::source::SourceConnection;
use std::sync::Arc;

/// Opens adapters for configured sources.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn connect(
        &self,
        connection: &SourceConnection,
    ) -> Result<Arc<dyn SourceAdapter>, ConnectorError>;
}
