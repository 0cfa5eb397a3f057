use std::collections::BTreeMap;
use std::fmt;

/// aggregate functions; a call to any of these makes an expression non-deterministic
pub const AGGREGATE_FUNCTIONS: [&str; 5] = ["count", "sum", "avg", "max", "min"];

/// a column as written in the query plus the name it resolves to.
///
/// `display_*` is what the query text used (the alias-visible name), `original_*`
/// is the name resolved against the underlying source. an empty `original_table`
/// means the reference could not be tied to a single source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ColumnName {
    pub original_table: String,
    pub original_column: String,
    pub display_table: String,
    pub display_column: String,
}

impl ColumnName {
    /// a column whose display name and resolved name are the same
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        let table = table.into();
        let column = column.into();
        Self {
            original_table: table.clone(),
            original_column: column.clone(),
            display_table: table,
            display_column: column,
        }
    }

    /// an unqualified name that did not resolve to any source
    pub fn unresolved(column: impl Into<String>) -> Self {
        let column = column.into();
        Self {
            original_table: String::new(),
            original_column: column.clone(),
            display_table: String::new(),
            display_column: column,
        }
    }

    /// key used in referenced-column sets: `table.column` or just `column`
    pub fn qualified_name(&self) -> String {
        if self.display_table.is_empty() {
            self.display_column.clone()
        } else {
            format!("{}.{}", self.display_table, self.display_column)
        }
    }

    /// the table this column belongs to, preferring the name the query used
    pub fn table_qualifier(&self) -> Option<&str> {
        if !self.display_table.is_empty() {
            Some(&self.display_table)
        } else if !self.original_table.is_empty() {
            Some(&self.original_table)
        } else {
            None
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.original_table.is_empty()
    }

    /// same column, displayed under its resolved column name
    pub fn to_original(&self) -> ColumnName {
        let mut column = self.clone();
        if !column.original_column.is_empty() {
            column.display_column = column.original_column.clone();
        }
        column
    }
}

impl fmt::Display for ColumnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Integer(v) => write!(f, "{}", v),
            LiteralValue::Float(v) => write!(f, "{}", v),
            LiteralValue::String(v) => write!(f, "'{}'", v),
            LiteralValue::Boolean(true) => f.write_str("TRUE"),
            LiteralValue::Boolean(false) => f.write_str("FALSE"),
            LiteralValue::Null => f.write_str("NULL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Concat,
    Like,
    NotLike,
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Plus => "+",
            BinaryOperator::Minus => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Concat => "||",
            BinaryOperator::Like => "LIKE",
            BinaryOperator::NotLike => "NOT LIKE",
        };
        f.write_str(op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Not,
    Negate,
    IsNull,
    IsNotNull,
}

/// scalar expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    ColumnRef(ColumnName),
    Literal(LiteralValue),
    BinaryOp {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    /// `*` or `t.*`, in a select list or as the argument of `COUNT(*)`
    Wildcard {
        qualifier: Option<String>,
    },
    Alias {
        expr: Box<Expr>,
        name: String,
    },
}

impl Expr {
    pub fn column(column: ColumnName) -> Self {
        Expr::ColumnRef(column)
    }

    pub fn int(value: i64) -> Self {
        Expr::Literal(LiteralValue::Integer(value))
    }

    pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            name: name.into(),
            args,
        }
    }

    pub fn with_alias(self, name: impl Into<String>) -> Self {
        Expr::Alias {
            expr: Box::new(self.unaliased().clone()),
            name: name.into(),
        }
    }

    pub fn alias(&self) -> Option<&str> {
        match self {
            Expr::Alias { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn unaliased(&self) -> &Expr {
        match self {
            Expr::Alias { expr, .. } => expr.unaliased(),
            other => other,
        }
    }

    /// name this expression produces in a select list, if it has one
    pub fn output_name(&self) -> Option<&str> {
        match self {
            Expr::Alias { name, .. } => Some(name),
            Expr::ColumnRef(column) => Some(&column.display_column),
            _ => None,
        }
    }

    /// false iff an aggregate call appears anywhere in the subtree
    pub fn is_deterministic(&self) -> bool {
        match self {
            Expr::ColumnRef(_) | Expr::Literal(_) | Expr::Wildcard { .. } => true,
            Expr::BinaryOp { left, right, .. } => {
                left.is_deterministic() && right.is_deterministic()
            }
            Expr::Unary { expr, .. } | Expr::Alias { expr, .. } => expr.is_deterministic(),
            Expr::Call { name, args } => {
                !is_aggregate_function(name) && args.iter().all(Expr::is_deterministic)
            }
        }
    }

    /// every column referenced in the subtree, keyed by qualified display name
    pub fn referenced_columns(&self) -> BTreeMap<String, ColumnName> {
        let mut columns = BTreeMap::new();
        self.collect_columns(&mut columns);
        columns
    }

    fn collect_columns(&self, columns: &mut BTreeMap<String, ColumnName>) {
        match self {
            Expr::ColumnRef(column) => {
                columns
                    .entry(column.qualified_name())
                    .or_insert_with(|| column.clone());
            }
            Expr::Literal(_) | Expr::Wildcard { .. } => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_columns(columns);
                right.collect_columns(columns);
            }
            Expr::Unary { expr, .. } | Expr::Alias { expr, .. } => expr.collect_columns(columns),
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_columns(columns);
                }
            }
        }
    }

    /// rebuild the tree, replacing every column reference with `f(column)`
    pub fn map_columns<F>(self, f: &mut F) -> Expr
    where
        F: FnMut(ColumnName) -> Expr,
    {
        match self {
            Expr::ColumnRef(column) => f(column),
            Expr::BinaryOp { op, left, right } => Expr::BinaryOp {
                op,
                left: Box::new(left.map_columns(f)),
                right: Box::new(right.map_columns(f)),
            },
            Expr::Unary { op, expr } => Expr::Unary {
                op,
                expr: Box::new(expr.map_columns(f)),
            },
            Expr::Alias { expr, name } => Expr::Alias {
                expr: Box::new(expr.map_columns(f)),
                name,
            },
            Expr::Call { name, args } => Expr::Call {
                name,
                args: args.into_iter().map(|arg| arg.map_columns(f)).collect(),
            },
            leaf @ (Expr::Literal(_) | Expr::Wildcard { .. }) => leaf,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.unaliased() {
            Expr::Literal(LiteralValue::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    /// flatten top-level ANDs into a predicate list; anything else is a single leaf
    pub fn split_conjunction(self) -> Vec<Expr> {
        let mut predicates = Vec::new();
        self.split_into(&mut predicates);
        predicates
    }

    fn split_into(self, predicates: &mut Vec<Expr>) {
        match self {
            Expr::BinaryOp {
                op: BinaryOperator::And,
                left,
                right,
            } => {
                left.split_into(predicates);
                right.split_into(predicates);
            }
            other => predicates.push(other),
        }
    }
}

pub fn is_aggregate_function(name: &str) -> bool {
    AGGREGATE_FUNCTIONS
        .iter()
        .any(|agg| agg.eq_ignore_ascii_case(name))
}

/// a column list is deterministic iff every member is
pub fn all_deterministic(exprs: &[Expr]) -> bool {
    exprs.iter().all(Expr::is_deterministic)
}

/// write a comma separated list
pub fn fmt_list(f: &mut fmt::Formatter<'_>, exprs: &[Expr], separator: &str) -> fmt::Result {
    for (i, expr) in exprs.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{}", expr)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::ColumnRef(column) => write!(f, "{}", column),
            Expr::Literal(value) => write!(f, "{}", value),
            Expr::BinaryOp { op, left, right } => {
                fmt_operand(f, left)?;
                write!(f, " {} ", op)?;
                fmt_operand(f, right)
            }
            Expr::Unary { op, expr } => match op {
                UnaryOperator::Not => {
                    f.write_str("NOT ")?;
                    fmt_operand(f, expr)
                }
                UnaryOperator::Negate => {
                    f.write_str("-")?;
                    fmt_operand(f, expr)
                }
                UnaryOperator::IsNull => {
                    fmt_operand(f, expr)?;
                    f.write_str(" IS NULL")
                }
                UnaryOperator::IsNotNull => {
                    fmt_operand(f, expr)?;
                    f.write_str(" IS NOT NULL")
                }
            },
            Expr::Call { name, args } => {
                write!(f, "{}(", name)?;
                fmt_list(f, args, ", ")?;
                f.write_str(")")
            }
            Expr::Wildcard { qualifier: None } => f.write_str("*"),
            Expr::Wildcard {
                qualifier: Some(table),
            } => write!(f, "{}.*", table),
            Expr::Alias { expr, name } => write!(f, "{} AS {}", expr, name),
        }
    }
}

// nested operators are parenthesised so the rendering is unambiguous
fn fmt_operand(f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
    match expr {
        Expr::BinaryOp { .. } | Expr::Unary { .. } => write!(f, "({})", expr),
        other => write!(f, "{}", other),
    }
}
