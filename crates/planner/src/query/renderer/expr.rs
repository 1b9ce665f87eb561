use crate::query::{
    ast::expr::{BinaryOperator, Expr, Literal},
    renderer::{Render, Renderer},
};
use model::core::utils::format_sql_timestamp;

impl Render for Expr {
    fn render(&self, r: &mut Renderer) {
        match self {
            Expr::Identifier(ident) => {
                if let Some(qualifier) = &ident.qualifier {
                    let q = r.dialect.quote_identifier(qualifier);
                    r.sql.push_str(&q);
                    r.sql.push('.');
                }
                let name = r.dialect.quote_identifier(&ident.name);
                r.sql.push_str(&name);
            }
            Expr::Literal(literal) => literal.render(r),
            Expr::Function { name, args } => {
                r.sql.push_str(name);
                r.sql.push('(');
                r.render_list(args);
                r.sql.push(')');
            }
            Expr::BinaryOp(op) => {
                op.left.render(r);
                r.sql.push(' ');
                r.sql.push_str(op.op.as_sql());
                r.sql.push(' ');
                op.right.render(r);
            }
            Expr::Case {
                when,
                then,
                otherwise,
            } => {
                r.sql.push_str("CASE WHEN ");
                when.render(r);
                r.sql.push_str(" THEN ");
                then.render(r);
                r.sql.push_str(" ELSE ");
                otherwise.render(r);
                r.sql.push_str(" END");
            }
            Expr::Cast { expr, type_name } => {
                expr.render(r);
                r.sql.push_str("::");
                r.sql.push_str(type_name);
            }
            Expr::Alias { expr, alias } => {
                expr.render(r);
                r.sql.push_str(" AS ");
                let alias = r.dialect.quote_identifier(alias);
                r.sql.push_str(&alias);
            }
        }
    }
}

impl Render for Literal {
    fn render(&self, r: &mut Renderer) {
        match self {
            Literal::Null => r.sql.push_str("NULL"),
            Literal::Text(text) => {
                let quoted = r.dialect.quote_literal(text);
                r.sql.push_str(&quoted);
            }
            Literal::Timestamp(ts) => {
                let quoted = r.dialect.quote_literal(&format_sql_timestamp(ts));
                r.sql.push_str(&quoted);
            }
        }
    }
}

impl BinaryOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Eq => "=",
            BinaryOperator::And => "AND",
        }
    }
}
