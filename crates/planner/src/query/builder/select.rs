use crate::query::ast::{
    common::TableRef,
    expr::{BinaryOperator, Expr},
    select::Select,
};

#[derive(Debug, Clone, Default)]
pub struct SelectBuilder {
    ast: Select,
}

impl SelectBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, columns: Vec<Expr>) -> Self {
        self.ast.columns = columns;
        self
    }

    pub fn column(mut self, column: Expr) -> Self {
        self.ast.columns.push(column);
        self
    }

    pub fn from(mut self, table: TableRef) -> Self {
        self.ast.from = Some(table);
        self
    }

    /// Adds a predicate, AND-ing it with any existing one.
    pub fn and_where(mut self, condition: Expr) -> Self {
        self.ast.where_clause = Some(match self.ast.where_clause.take() {
            Some(existing) => Expr::binary(existing, BinaryOperator::And, condition),
            None => condition,
        });
        self
    }

    pub fn build(self) -> Select {
        self.ast
    }
}
