use crate::sql::{
    base::{adapter::SourceAdapter, error::ConnectorError, source::SourceConnector},
    postgres::adapter::{PgAdapter, PgConnectOptions},
};
use async_trait::async_trait;
use model::source::SourceConnection;
use std::{sync::Arc, time::Duration};
use tracing::info;

/// Connector producing pooled Postgres adapters.
#[derive(Debug, Clone)]
pub struct PgConnector {
    pub pool_size: usize,
    pub statement_timeout: Option<Duration>,
}

impl PgConnector {
    pub fn new(pool_size: usize, statement_timeout: Option<Duration>) -> Self {
        Self {
            pool_size: pool_size.max(1),
            statement_timeout,
        }
    }
}

#[async_trait]
impl SourceConnector for PgConnector {
    async fn connect(
        &self,
        connection: &SourceConnection,
    ) -> Result<Arc<dyn SourceAdapter>, ConnectorError> {
        let options = PgConnectOptions {
            pool_size: self.pool_size,
            statement_timeout: self.statement_timeout,
        };
        let adapter = PgAdapter::connect(&connection.url, options).await?;
        info!(
            source = %connection.id,
            url = %connection.redacted_url(),
            pool_size = self.pool_size,
            "Postgres source connected"
        );
        Ok(Arc::new(adapter))
    }
}
