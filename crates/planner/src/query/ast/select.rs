//! Defines the Abstract Syntax Tree (AST) for a SELECT query.

use crate::query::ast::{common::TableRef, expr::Expr};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Select {
    /// The list of columns or expressions to be returned.
    pub columns: Vec<Expr>,

    /// The table the rows are read from.
    pub from: Option<TableRef>,

    /// The WHERE clause condition.
    pub where_clause: Option<Expr>,
}
