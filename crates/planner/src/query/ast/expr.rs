//! Expression nodes used by SELECT projections and predicates.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Identifier(Ident),
    Literal(Literal),
    /// e.g. `array_to_json("tags")`
    Function { name: String, args: Vec<Expr> },
    BinaryOp(Box<BinaryOp>),
    /// `CASE WHEN <when> THEN <then> ELSE <otherwise> END`
    Case {
        when: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// `<expr>::<type_name>`
    Cast { expr: Box<Expr>, type_name: String },
    /// `<expr> AS <alias>`
    Alias { expr: Box<Expr>, alias: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub qualifier: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Text(String),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryOp {
    pub left: Expr,
    pub op: BinaryOperator,
    pub right: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Gt,
    GtEq,
    Lt,
    LtEq,
    Eq,
    And,
}

impl Expr {
    pub fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Self {
        Expr::BinaryOp(Box::new(BinaryOp { left, op, right }))
    }

    pub fn alias(self, alias: &str) -> Self {
        Expr::Alias {
            expr: Box::new(self),
            alias: alias.to_string(),
        }
    }

    pub fn cast(self, type_name: &str) -> Self {
        Expr::Cast {
            expr: Box::new(self),
            type_name: type_name.to_string(),
        }
    }

    pub fn function(name: &str, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.to_string(),
            args,
        }
    }
}
