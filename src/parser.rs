use crate::ast::{AstExpr, OrderByExpr, SelectField, SelectStatement, TableRef};
use crate::expression::{BinaryOperator, LiteralValue, UnaryOperator};
use crate::plan::JoinKind;
use sqlparser::ast as sql_ast;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("SQL syntax error: {0}")]
    Syntax(String),
    #[error("unsupported SQL feature: {0}")]
    Unsupported(String),
    #[error("invalid literal: {0}")]
    InvalidLiteral(String),
    #[error("only SELECT statements can be planned")]
    NotASelect,
    #[error("expected exactly one statement, found {0}")]
    StatementCount(usize),
}

impl From<sqlparser::parser::ParserError> for ParseError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        ParseError::Syntax(err.to_string())
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// adapter from SQL text to a `SelectStatement`
pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, sql: &str) -> ParseResult<SelectStatement> {
        let mut statements = SqlParser::parse_sql(&GenericDialect {}, sql)?;
        if statements.len() != 1 {
            return Err(ParseError::StatementCount(statements.len()));
        }
        match statements.remove(0) {
            sql_ast::Statement::Query(query) => self.transform_query(*query),
            _ => Err(ParseError::NotASelect),
        }
    }

    fn transform_query(&self, query: sql_ast::Query) -> ParseResult<SelectStatement> {
        if query.with.is_some() {
            return Err(ParseError::Unsupported("WITH".to_string()));
        }
        let select = match *query.body {
            sql_ast::SetExpr::Select(select) => *select,
            other => {
                return Err(ParseError::Unsupported(format!("query body: {}", other)));
            }
        };
        if select.distinct.is_some() {
            return Err(ParseError::Unsupported("SELECT DISTINCT".to_string()));
        }

        let fields = select
            .projection
            .into_iter()
            .map(|item| self.transform_select_item(item))
            .collect::<ParseResult<Vec<_>>>()?;

        // comma separated FROM items are cross joined left to right
        let mut from = None;
        for item in select.from {
            let right = self.transform_table_with_joins(item)?;
            from = Some(match from {
                None => right,
                Some(left) => TableRef::Join {
                    kind: JoinKind::Cross,
                    left: Box::new(left),
                    right: Box::new(right),
                    on: None,
                },
            });
        }

        let selection = select
            .selection
            .map(|expr| self.transform_expr(expr))
            .transpose()?;

        let group_by = match select.group_by {
            sql_ast::GroupByExpr::Expressions(exprs) => exprs
                .into_iter()
                .map(|expr| self.transform_expr(expr))
                .collect::<ParseResult<Vec<_>>>()?,
            sql_ast::GroupByExpr::All => {
                return Err(ParseError::Unsupported("GROUP BY ALL".to_string()));
            }
        };

        let having = select
            .having
            .map(|expr| self.transform_expr(expr))
            .transpose()?;

        let order_by = query
            .order_by
            .into_iter()
            .map(|item| {
                Ok(OrderByExpr {
                    expr: self.transform_expr(item.expr)?,
                    descending: item.asc == Some(false),
                })
            })
            .collect::<ParseResult<Vec<_>>>()?;

        let limit = query
            .limit
            .map(|expr| self.transform_expr(expr))
            .transpose()?;
        let offset = query
            .offset
            .map(|offset| self.transform_expr(offset.value))
            .transpose()?;

        Ok(SelectStatement {
            fields,
            from,
            selection,
            group_by,
            having,
            order_by,
            limit,
            offset,
        })
    }

    fn transform_select_item(&self, item: sql_ast::SelectItem) -> ParseResult<SelectField> {
        match item {
            sql_ast::SelectItem::UnnamedExpr(expr) => Ok(SelectField::Expr {
                expr: self.transform_expr(expr)?,
                alias: None,
            }),
            sql_ast::SelectItem::ExprWithAlias { expr, alias } => Ok(SelectField::Expr {
                expr: self.transform_expr(expr)?,
                alias: Some(alias.value),
            }),
            sql_ast::SelectItem::Wildcard(_) => Ok(SelectField::Wildcard { qualifier: None }),
            sql_ast::SelectItem::QualifiedWildcard(name, _) => Ok(SelectField::Wildcard {
                qualifier: name.0.last().map(|ident| ident.value.clone()),
            }),
        }
    }

    fn transform_table_with_joins(&self, table: sql_ast::TableWithJoins) -> ParseResult<TableRef> {
        let mut result = self.transform_table_factor(table.relation)?;

        for join in table.joins {
            let right = self.transform_table_factor(join.relation)?;
            let (kind, constraint) = match join.join_operator {
                sql_ast::JoinOperator::Inner(constraint) => (JoinKind::Inner, Some(constraint)),
                sql_ast::JoinOperator::LeftOuter(constraint) => (JoinKind::Left, Some(constraint)),
                sql_ast::JoinOperator::RightOuter(constraint) => {
                    (JoinKind::Right, Some(constraint))
                }
                sql_ast::JoinOperator::FullOuter(constraint) => {
                    (JoinKind::Full, Some(constraint))
                }
                sql_ast::JoinOperator::CrossJoin => (JoinKind::Cross, None),
                other => {
                    return Err(ParseError::Unsupported(format!("join operator {:?}", other)));
                }
            };
            let on = match constraint {
                Some(sql_ast::JoinConstraint::On(expr)) => Some(self.transform_expr(expr)?),
                Some(sql_ast::JoinConstraint::None) | None => None,
                Some(other) => {
                    return Err(ParseError::Unsupported(format!("join constraint {:?}", other)));
                }
            };

            result = TableRef::Join {
                kind,
                left: Box::new(result),
                right: Box::new(right),
                on,
            };
        }

        Ok(result)
    }

    fn transform_table_factor(&self, factor: sql_ast::TableFactor) -> ParseResult<TableRef> {
        match factor {
            sql_ast::TableFactor::Table { name, alias, .. } => Ok(TableRef::Table {
                name: name
                    .0
                    .iter()
                    .map(|ident| ident.value.as_str())
                    .collect::<Vec<_>>()
                    .join("."),
                alias: alias.map(|alias| alias.name.value),
            }),
            sql_ast::TableFactor::Derived {
                subquery, alias, ..
            } => Ok(TableRef::Derived {
                query: Box::new(self.transform_query(*subquery)?),
                alias: alias.map(|alias| alias.name.value),
            }),
            sql_ast::TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.transform_table_with_joins(*table_with_joins),
            other => Err(ParseError::Unsupported(format!("table factor {}", other))),
        }
    }

    fn transform_expr(&self, expr: sql_ast::Expr) -> ParseResult<AstExpr> {
        match expr {
            sql_ast::Expr::Identifier(ident) => Ok(AstExpr::column(ident.value)),
            sql_ast::Expr::CompoundIdentifier(mut idents) => {
                // schema.table.column keeps only the last two parts
                let name = idents
                    .pop()
                    .map(|ident| ident.value)
                    .ok_or_else(|| ParseError::Syntax("empty identifier".to_string()))?;
                match idents.pop() {
                    Some(table) => Ok(AstExpr::qualified(table.value, name)),
                    None => Ok(AstExpr::column(name)),
                }
            }
            sql_ast::Expr::Value(value) => Ok(AstExpr::Literal(self.transform_value(value)?)),
            sql_ast::Expr::Nested(inner) => self.transform_expr(*inner),
            sql_ast::Expr::BinaryOp { left, op, right } => Ok(AstExpr::binary(
                self.transform_binary_operator(op)?,
                self.transform_expr(*left)?,
                self.transform_expr(*right)?,
            )),
            sql_ast::Expr::UnaryOp { op, expr } => {
                let operand = self.transform_expr(*expr)?;
                match op {
                    sql_ast::UnaryOperator::Plus => Ok(operand),
                    sql_ast::UnaryOperator::Minus => Ok(match operand {
                        AstExpr::Literal(LiteralValue::Integer(v)) => {
                            AstExpr::Literal(LiteralValue::Integer(-v))
                        }
                        AstExpr::Literal(LiteralValue::Float(v)) => {
                            AstExpr::Literal(LiteralValue::Float(-v))
                        }
                        other => AstExpr::Unary {
                            op: UnaryOperator::Negate,
                            expr: Box::new(other),
                        },
                    }),
                    sql_ast::UnaryOperator::Not => Ok(AstExpr::Unary {
                        op: UnaryOperator::Not,
                        expr: Box::new(operand),
                    }),
                    other => Err(ParseError::Unsupported(format!("unary operator {}", other))),
                }
            }
            sql_ast::Expr::IsNull(expr) => Ok(AstExpr::Unary {
                op: UnaryOperator::IsNull,
                expr: Box::new(self.transform_expr(*expr)?),
            }),
            sql_ast::Expr::IsNotNull(expr) => Ok(AstExpr::Unary {
                op: UnaryOperator::IsNotNull,
                expr: Box::new(self.transform_expr(*expr)?),
            }),
            sql_ast::Expr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                // x BETWEEN a AND b  →  x >= a AND x <= b
                let operand = self.transform_expr(*expr)?;
                let range = AstExpr::binary(
                    BinaryOperator::And,
                    AstExpr::binary(
                        BinaryOperator::GtEq,
                        operand.clone(),
                        self.transform_expr(*low)?,
                    ),
                    AstExpr::binary(BinaryOperator::LtEq, operand, self.transform_expr(*high)?),
                );
                if negated {
                    Ok(AstExpr::Unary {
                        op: UnaryOperator::Not,
                        expr: Box::new(range),
                    })
                } else {
                    Ok(range)
                }
            }
            sql_ast::Expr::Like {
                negated,
                expr,
                pattern,
                ..
            } => Ok(AstExpr::binary(
                if negated {
                    BinaryOperator::NotLike
                } else {
                    BinaryOperator::Like
                },
                self.transform_expr(*expr)?,
                self.transform_expr(*pattern)?,
            )),
            sql_ast::Expr::Function(func) => {
                if func.over.is_some() {
                    return Err(ParseError::Unsupported("window function".to_string()));
                }
                if func.distinct {
                    return Err(ParseError::Unsupported(format!("{}(DISTINCT ...)", func.name)));
                }
                let args = func
                    .args
                    .into_iter()
                    .map(|arg| match arg {
                        sql_ast::FunctionArg::Unnamed(sql_ast::FunctionArgExpr::Expr(e))
                        | sql_ast::FunctionArg::Named {
                            arg: sql_ast::FunctionArgExpr::Expr(e),
                            ..
                        } => self.transform_expr(e),
                        sql_ast::FunctionArg::Unnamed(sql_ast::FunctionArgExpr::Wildcard) => {
                            Ok(AstExpr::Wildcard)
                        }
                        other => Err(ParseError::Unsupported(format!("function argument {}", other))),
                    })
                    .collect::<ParseResult<Vec<_>>>()?;
                Ok(AstExpr::Function {
                    name: func.name.to_string(),
                    args,
                })
            }
            other => Err(ParseError::Unsupported(format!("expression {}", other))),
        }
    }

    fn transform_binary_operator(&self, op: sql_ast::BinaryOperator) -> ParseResult<BinaryOperator> {
        match op {
            sql_ast::BinaryOperator::Eq => Ok(BinaryOperator::Eq),
            sql_ast::BinaryOperator::NotEq => Ok(BinaryOperator::NotEq),
            sql_ast::BinaryOperator::Lt => Ok(BinaryOperator::Lt),
            sql_ast::BinaryOperator::LtEq => Ok(BinaryOperator::LtEq),
            sql_ast::BinaryOperator::Gt => Ok(BinaryOperator::Gt),
            sql_ast::BinaryOperator::GtEq => Ok(BinaryOperator::GtEq),
            sql_ast::BinaryOperator::And => Ok(BinaryOperator::And),
            sql_ast::BinaryOperator::Or => Ok(BinaryOperator::Or),
            sql_ast::BinaryOperator::Plus => Ok(BinaryOperator::Plus),
            sql_ast::BinaryOperator::Minus => Ok(BinaryOperator::Minus),
            sql_ast::BinaryOperator::Multiply => Ok(BinaryOperator::Multiply),
            sql_ast::BinaryOperator::Divide => Ok(BinaryOperator::Divide),
            sql_ast::BinaryOperator::Modulo => Ok(BinaryOperator::Modulo),
            sql_ast::BinaryOperator::StringConcat => Ok(BinaryOperator::Concat),
            other => Err(ParseError::Unsupported(format!("binary operator {}", other))),
        }
    }

    fn transform_value(&self, value: sql_ast::Value) -> ParseResult<LiteralValue> {
        match value {
            sql_ast::Value::Number(text, _) => {
                if let Ok(v) = text.parse::<i64>() {
                    Ok(LiteralValue::Integer(v))
                } else {
                    text.parse::<f64>()
                        .map(LiteralValue::Float)
                        .map_err(|_| ParseError::InvalidLiteral(text))
                }
            }
            sql_ast::Value::SingleQuotedString(s) | sql_ast::Value::DoubleQuotedString(s) => {
                Ok(LiteralValue::String(s))
            }
            sql_ast::Value::Boolean(b) => Ok(LiteralValue::Boolean(b)),
            sql_ast::Value::Null => Ok(LiteralValue::Null),
            other => Err(ParseError::Unsupported(format!("literal {}", other))),
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}
