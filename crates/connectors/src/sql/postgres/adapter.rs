use crate::sql::{
    base::{
        adapter::{DatabaseKind, SourceAdapter},
        error::{ConnectorError, DbError},
    },
    postgres::utils::connect_client,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, TryStreamExt, stream::BoxStream};
use model::{core::utils::parse_timestamp, tracking::ColumnMetadata};
use planner::query::dialect::{self, Dialect};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio_postgres::Client;
use tracing::debug;

const QUERY_WATERMARK_TABLES_SQL: &str = include_str!("sql/watermark_tables.sql");
const QUERY_UNLOGGED_TABLES_SQL: &str = include_str!("sql/unlogged_tables.sql");
const QUERY_TABLE_COLUMNS_SQL: &str = include_str!("sql/table_columns.sql");
const QUERY_PRIMARY_KEY_SQL: &str = include_str!("sql/primary_key.sql");
const QUERY_ROW_COUNT_SQL: &str = include_str!("sql/row_count.sql");

#[derive(Debug, Clone)]
pub struct PgConnectOptions {
    pub pool_size: usize,
    pub statement_timeout: Option<Duration>,
}

/// Postgres source backed by a small round-robin pool of clients shared by
/// every job running against the source.
#[derive(Clone)]
pub struct PgAdapter {
    clients: Arc<Vec<Client>>,
    next: Arc<AtomicUsize>,
    dialect: dialect::Postgres,
}

impl PgAdapter {
    pub async fn connect(url: &str, options: PgConnectOptions) -> Result<Self, ConnectorError> {
        let mut clients = Vec::with_capacity(options.pool_size.max(1));
        for _ in 0..options.pool_size.max(1) {
            clients.push(connect_client(url, options.statement_timeout).await?);
        }
        Ok(PgAdapter {
            clients: Arc::new(clients),
            next: Arc::new(AtomicUsize::new(0)),
            dialect: dialect::Postgres,
        })
    }

    fn client(&self) -> &Client {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        &self.clients[idx]
    }

    /// Wraps an extraction query so each row comes back as one JSON text value.
    pub fn json_rows_query(query: &str) -> String {
        let inner = query.trim().trim_end_matches(';');
        format!("SELECT row_to_json(t)::text FROM ({inner}) AS t")
    }
}

#[async_trait]
impl SourceAdapter for PgAdapter {
    async fn ping(&self) -> Result<(), DbError> {
        let row = self.client().query_one("SELECT 1", &[]).await?;
        let val: i32 = row.get(0);
        if val != 1 {
            return Err(DbError::InvalidValue {
                column: "ping".into(),
                value: val.to_string(),
            });
        }
        Ok(())
    }

    async fn watermark_tables(
        &self,
        schema: &str,
        watermark_column: &str,
    ) -> Result<Vec<String>, DbError> {
        let rows = self
            .client()
            .query(QUERY_WATERMARK_TABLES_SQL, &[&schema, &watermark_column])
            .await?;
        let tables = rows
            .iter()
            .map(|row| row.try_get::<_, String>("table_name"))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tables)
    }

    async fn unlogged_tables(&self, schema: &str) -> Result<Vec<String>, DbError> {
        let rows = self
            .client()
            .query(QUERY_UNLOGGED_TABLES_SQL, &[&schema])
            .await?;
        let tables = rows
            .iter()
            .map(|row| row.try_get::<_, String>("table_name"))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tables)
    }

    async fn table_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnMetadata>, DbError> {
        let rows = self
            .client()
            .query(QUERY_TABLE_COLUMNS_SQL, &[&schema, &table])
            .await?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get("column_name")?;
                let udt_name: String = row.try_get("udt_name")?;
                let ordinal: i32 = row.try_get("ordinal_position")?;
                let is_nullable: bool = row.try_get("is_nullable")?;
                let precision: Option<i32> = row.try_get("numeric_precision")?;
                let scale: Option<i32> = row.try_get("numeric_scale")?;

                let mut column = ColumnMetadata::new(name, udt_name, ordinal.max(0) as u32)
                    .with_numeric(
                        precision.map(|p| p.max(0) as u32),
                        scale.map(|s| s.max(0) as u32),
                    );
                column.is_nullable = is_nullable;
                Ok(column)
            })
            .collect()
    }

    async fn primary_key(&self, schema: &str, table: &str) -> Result<Option<String>, DbError> {
        let row = self
            .client()
            .query_one(QUERY_PRIMARY_KEY_SQL, &[&schema, &table])
            .await?;
        Ok(row.try_get::<_, Option<String>>("primary_key")?)
    }

    async fn row_count(&self, schema: &str, table: &str) -> Result<i64, DbError> {
        let row = self
            .client()
            .query_opt(QUERY_ROW_COUNT_SQL, &[&schema, &table])
            .await?;
        match row {
            Some(row) => Ok(row.try_get::<_, i64>("row_count")?),
            None => Err(DbError::Unknown(format!(
                "relation {schema}.{table} not found in pg_class"
            ))),
        }
    }

    async fn min_watermark(
        &self,
        schema: &str,
        table: &str,
        column: &str,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let sql = format!(
            "SELECT to_char(MIN({col}), 'YYYY-MM-DD HH24:MI:SS.US') FROM {table}",
            col = self.dialect.quote_identifier(column),
            table = self.dialect.quote_qualified(schema, table),
        );
        debug!(%sql, "Seed watermark query");

        let row = self.client().query_one(sql.as_str(), &[]).await?;
        let raw: Option<String> = row.try_get(0)?;
        match raw {
            None => Ok(None),
            Some(raw) => parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| DbError::InvalidValue {
                    column: column.to_string(),
                    value: raw,
                }),
        }
    }

    async fn json_rows(
        &self,
        query: &str,
    ) -> Result<BoxStream<'static, Result<String, DbError>>, DbError> {
        let sql = Self::json_rows_query(query);
        let params: [&str; 0] = [];
        let rows = self.client().query_raw(sql.as_str(), params).await?;

        let stream = rows
            .map_err(DbError::from)
            .and_then(|row| async move { Ok(row.try_get::<_, String>(0)?) })
            .boxed();
        Ok(stream)
    }

    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }
}
