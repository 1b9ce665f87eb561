//! Extraction query synthesis.
//!
//! Builds the bounded `SELECT` for one table and one watermark window. Every
//! column is projected in ordinal order, collection-typed columns are turned
//! into JSON text, timestamp columns are optionally munged and a literal
//! snapshot column is appended last.

use crate::{
    literal,
    query::{
        ast::expr::{BinaryOperator, Expr, Literal},
        builder::select::SelectBuilder,
        dialect::{Dialect, Postgres},
        ident,
        renderer::{Render, Renderer},
    },
    table_ref,
};
use chrono::{DateTime, Utc};
use model::{
    core::window::WatermarkWindow, destination::SNAPSHOT_COLUMN, tracking::ColumnMetadata,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// How out-of-range timestamp values are rewritten during extraction.
///
/// The modes are mutually exclusive and chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "floor", rename_all = "snake_case")]
pub enum TimestampMunging {
    #[default]
    Off,
    /// Values before the floor are replaced by `NULL`.
    NullBefore(DateTime<Utc>),
    /// Values before the floor are replaced by the floor itself.
    FloorBefore(DateTime<Utc>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("table {0} has no cached columns")]
    NoColumns(String),

    #[error("watermark column `{column}` not found on table {table}")]
    WatermarkColumnMissing { table: String, column: String },
}

/// Everything needed to extract one window of one table.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionRequest<'a> {
    pub schema: &'a str,
    pub table: &'a str,
    pub columns: &'a [ColumnMetadata],
    pub watermark_column: &'a str,
    pub window: WatermarkWindow,
    pub snapshot_at: DateTime<Utc>,
}

pub struct QuerySynthesizer {
    munging: TimestampMunging,
    dialect: Box<dyn Dialect>,
}

impl QuerySynthesizer {
    pub fn new(munging: TimestampMunging) -> Self {
        Self {
            munging,
            dialect: Box::new(Postgres),
        }
    }

    pub fn munging(&self) -> TimestampMunging {
        self.munging
    }

    pub fn synthesize(&self, request: &ExtractionRequest<'_>) -> Result<String, SynthesisError> {
        if request.columns.is_empty() {
            return Err(SynthesisError::NoColumns(request.table.to_string()));
        }
        if !request
            .columns
            .iter()
            .any(|c| c.name == request.watermark_column)
        {
            return Err(SynthesisError::WatermarkColumnMissing {
                table: request.table.to_string(),
                column: request.watermark_column.to_string(),
            });
        }

        let mut columns: Vec<&ColumnMetadata> = request.columns.iter().collect();
        columns.sort_by_key(|c| c.ordinal);

        let mut projections: Vec<Expr> = columns.iter().map(|c| self.project(c)).collect();
        projections.push(
            literal!(Literal::Timestamp(request.snapshot_at))
                .cast("timestamptz")
                .alias(SNAPSHOT_COLUMN),
        );

        let watermark = || ident(request.watermark_column);
        let ast = SelectBuilder::new()
            .select(projections)
            .from(table_ref!(request.schema, request.table))
            .and_where(Expr::binary(
                watermark(),
                BinaryOperator::Gt,
                literal!(Literal::Timestamp(request.window.from)),
            ))
            .and_where(Expr::binary(
                watermark(),
                BinaryOperator::LtEq,
                literal!(Literal::Timestamp(request.window.to)),
            ))
            .build();

        let mut renderer = Renderer::new(self.dialect.as_ref());
        ast.render(&mut renderer);
        let sql = renderer.finish();

        debug!(table = request.table, %sql, "Synthesized extraction query");
        Ok(sql)
    }

    fn project(&self, column: &ColumnMetadata) -> Expr {
        let name = column.name.as_str();

        if column.source_type.is_collection() {
            return Expr::function("array_to_json", vec![ident(name)]).alias(name);
        }

        if column.source_type.is_timestamp() {
            let (floor, replacement) = match self.munging {
                TimestampMunging::Off => return ident(name),
                TimestampMunging::NullBefore(floor) => (floor, literal!(Literal::Null)),
                TimestampMunging::FloorBefore(floor) => (
                    floor,
                    literal!(Literal::Timestamp(floor)).cast(&column.udt_name),
                ),
            };
            return Expr::Case {
                when: Box::new(Expr::binary(
                    ident(name),
                    BinaryOperator::Lt,
                    literal!(Literal::Timestamp(floor)),
                )),
                then: Box::new(replacement),
                otherwise: Box::new(ident(name)),
            }
            .alias(name);
        }

        ident(name)
    }
}
