//! parsed SELECT statement, independent of the SQL parser that produced it.

use crate::expression::{BinaryOperator, LiteralValue, UnaryOperator};
use crate::plan::JoinKind;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStatement {
    pub fields: Vec<SelectField>,
    pub from: Option<TableRef>,
    pub selection: Option<AstExpr>,
    pub group_by: Vec<AstExpr>,
    pub having: Option<AstExpr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<AstExpr>,
    pub offset: Option<AstExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectField {
    Wildcard { qualifier: Option<String> },
    Expr { expr: AstExpr, alias: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    Table {
        name: String,
        alias: Option<String>,
    },
    Derived {
        query: Box<SelectStatement>,
        alias: Option<String>,
    },
    Join {
        kind: JoinKind,
        left: Box<TableRef>,
        right: Box<TableRef>,
        on: Option<AstExpr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: AstExpr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstExpr {
    // leaf nodes
    Column { table: Option<String>, name: String },
    Literal(LiteralValue),
    Wildcard,

    BinaryOp {
        op: BinaryOperator,
        left: Box<AstExpr>,
        right: Box<AstExpr>,
    },
    Unary {
        op: UnaryOperator,
        expr: Box<AstExpr>,
    },
    Function {
        name: String,
        args: Vec<AstExpr>,
    },
}

impl AstExpr {
    pub fn column(name: impl Into<String>) -> Self {
        AstExpr::Column {
            table: None,
            name: name.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        AstExpr::Column {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    pub fn binary(op: BinaryOperator, left: AstExpr, right: AstExpr) -> Self {
        AstExpr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}
