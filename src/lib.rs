pub mod ast;
pub mod config;
pub mod expression;
pub mod optimizer;
pub mod parser;
pub mod plan;
pub mod translator;

pub use ast::{AstExpr, SelectField, SelectStatement, TableRef};
pub use config::OptimizerConfig;
pub use expression::{BinaryOperator, ColumnName, Expr, LiteralValue, UnaryOperator};
pub use optimizer::{
    DiagnosticsSink, DriverState, OptimizeOutcome, Optimizer, RewriteRule, RuleTrace,
};
pub use parser::{ParseError, Parser};
pub use plan::{JoinKind, NodeId, OrderByItem, PlanError, PlanNode, PlanTree, TableName};
pub use translator::{TranslateError, Translator};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// build the plan of a SELECT and rewrite it with the default optimizer
pub fn optimize_sql(sql: &str) -> Result<(PlanTree, OptimizeOutcome)> {
    let statement = Parser::new().parse(sql)?;
    let mut tree = Translator::new().translate(&statement)?;
    let outcome = Optimizer::new().optimize(&mut tree)?;
    Ok((tree, outcome))
}
