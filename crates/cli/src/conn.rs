use crate::error::CliError;
use async_trait::async_trait;
use connectors::sql::{
    base::adapter::SourceAdapter,
    postgres::adapter::{PgAdapter, PgConnectOptions},
};
use tracing::{error, info};

/// Trait for "pinging" a data source
#[async_trait]
pub trait ConnectionPinger {
    /// Attempts to ping; returns Err if unreachable
    async fn ping(&self) -> Result<(), CliError>;
}

/// Postgres pinger
pub struct PostgresConnectionPinger {
    pub conn_str: String,
}

#[async_trait]
impl ConnectionPinger for PostgresConnectionPinger {
    async fn ping(&self) -> Result<(), CliError> {
        let options = PgConnectOptions {
            pool_size: 1,
            statement_timeout: None,
        };
        let adapter = PgAdapter::connect(&self.conn_str, options)
            .await
            .inspect_err(|e| error!(error = %e, "Postgres connection failed"))?;

        adapter
            .ping()
            .await
            .inspect_err(|e| error!(error = %e, "Postgres ping query failed"))?;

        info!("Postgres ping succeeded");
        Ok(())
    }
}
