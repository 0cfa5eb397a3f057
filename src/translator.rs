use crate::ast::{AstExpr, SelectField, SelectStatement, TableRef};
use crate::expression::{ColumnName, Expr, LiteralValue, all_deterministic};
use crate::plan::{NodeId, OrderByItem, PlanError, PlanNode, PlanTree, TableName};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranslateError {
    #[error("SELECT without FROM cannot be planned")]
    MissingFrom,
    #[error("unsupported table source: {0}")]
    UnsupportedTableSource(String),
    #[error("unknown table or alias '{0}'")]
    UnknownTable(String),
    #[error("OFFSET requires LIMIT")]
    OffsetWithoutLimit,
    #[error("position {0} does not name a select-list expression")]
    InvalidPosition(i64),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

pub type TranslateResult<T> = Result<T, TranslateError>;

/// a table source visible to column references
#[derive(Debug, Clone)]
struct Source {
    /// alias, or the base name when unaliased
    visible: String,
    /// base table name, or the alias of a derived table
    resolved: String,
    /// output names of a derived table; `None` for base tables or `SELECT *`
    outputs: Option<Vec<String>>,
}

impl Source {
    fn output_named(&self, name: &str) -> Option<&str> {
        self.outputs
            .as_ref()?
            .iter()
            .find(|output| output.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
struct Scope {
    sources: Vec<Source>,
    // select-list aliases, visible to HAVING and ORDER BY only
    output_aliases: Vec<String>,
}

impl Scope {
    fn source(&self, qualifier: &str) -> Option<&Source> {
        self.sources
            .iter()
            .find(|source| source.visible.eq_ignore_ascii_case(qualifier))
    }

    fn resolve_column(&self, table: Option<&str>, name: &str) -> TranslateResult<ColumnName> {
        if let Some(qualifier) = table {
            let source = self
                .source(qualifier)
                .ok_or_else(|| TranslateError::UnknownTable(qualifier.to_string()))?;
            return Ok(ColumnName {
                original_table: source.resolved.clone(),
                original_column: source.output_named(name).unwrap_or(name).to_string(),
                display_table: qualifier.to_string(),
                display_column: name.to_string(),
            });
        }

        if self
            .output_aliases
            .iter()
            .any(|alias| alias.eq_ignore_ascii_case(name))
        {
            return Ok(ColumnName::unresolved(name));
        }

        // base tables and `SELECT *` subqueries may hold any column
        let mut candidates = self.sources.iter().filter(|source| match &source.outputs {
            Some(_) => source.output_named(name).is_some(),
            None => true,
        });
        let source = match (candidates.next(), candidates.next()) {
            (Some(source), None) => Some(source),
            _ => None,
        };
        Ok(match source {
            Some(source) => ColumnName {
                original_table: source.resolved.clone(),
                original_column: source.output_named(name).unwrap_or(name).to_string(),
                display_table: String::new(),
                display_column: name.to_string(),
            },
            None => ColumnName::unresolved(name),
        })
    }

    fn resolve_expr(&self, expr: &AstExpr) -> TranslateResult<Expr> {
        match expr {
            AstExpr::Column { table, name } => {
                Ok(Expr::ColumnRef(self.resolve_column(table.as_deref(), name)?))
            }
            AstExpr::Literal(value) => Ok(Expr::Literal(value.clone())),
            AstExpr::Wildcard => Ok(Expr::Wildcard { qualifier: None }),
            AstExpr::BinaryOp { op, left, right } => Ok(Expr::binary(
                *op,
                self.resolve_expr(left)?,
                self.resolve_expr(right)?,
            )),
            AstExpr::Unary { op, expr } => Ok(Expr::Unary {
                op: *op,
                expr: Box::new(self.resolve_expr(expr)?),
            }),
            AstExpr::Function { name, args } => Ok(Expr::Call {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|arg| self.resolve_expr(arg))
                    .collect::<TranslateResult<Vec<_>>>()?,
            }),
        }
    }

    fn resolve_predicates(&self, expr: &AstExpr) -> TranslateResult<Vec<Expr>> {
        Ok(self.resolve_expr(expr)?.split_conjunction())
    }
}

/// builds the initial plan tree of a SELECT statement
pub struct Translator;

impl Translator {
    pub fn new() -> Self {
        Self
    }

    pub fn translate(&self, statement: &SelectStatement) -> TranslateResult<PlanTree> {
        let mut tree = PlanTree::new();
        let root = self.translate_select(&mut tree, statement)?;
        tree.set_root(root);
        tree.validate()?;
        debug!(nodes = tree.preorder().len(), "translated statement");
        Ok(tree)
    }

    fn translate_select(&self, tree: &mut PlanTree, stmt: &SelectStatement) -> TranslateResult<NodeId> {
        let from = stmt.from.as_ref().ok_or(TranslateError::MissingFrom)?;
        if stmt.offset.is_some() && stmt.limit.is_none() {
            return Err(TranslateError::OffsetWithoutLimit);
        }

        // step 1: table sources
        let mut scope = Scope::default();
        let source = self.translate_table_ref(tree, from, &mut scope)?;

        // step 2: projection, or aggregate when the select list calls an aggregate
        let projection = stmt
            .fields
            .iter()
            .map(|field| self.translate_field(field, &scope))
            .collect::<TranslateResult<Vec<_>>>()?;
        let group_keys = stmt
            .group_by
            .iter()
            .map(|key| match position(key) {
                Some(position) => {
                    let key = select_item_at(&projection, position)?.unaliased();
                    if !key.is_deterministic() {
                        return Err(TranslateError::InvalidPosition(position));
                    }
                    Ok(key.clone())
                }
                None => scope.resolve_expr(key),
            })
            .collect::<TranslateResult<Vec<_>>>()?;

        let output_aliases: Vec<String> = projection
            .iter()
            .filter_map(|expr| expr.alias().map(str::to_string))
            .collect();

        // ORDER BY positions are read after the projection moves into the plan
        let select_list = projection.clone();

        let mut root = if all_deterministic(&projection) {
            let mut below = source;
            if !group_keys.is_empty() {
                below = stack(tree, PlanNode::GroupBy { keys: group_keys }, below)?;
            }
            stack(tree, PlanNode::Project { columns: projection }, below)?
        } else {
            stack(
                tree,
                PlanNode::Aggregate {
                    projection,
                    group_keys,
                },
                source,
            )?
        };

        // step 3: WHERE sits directly above the projection
        if let Some(selection) = &stmt.selection {
            let predicates = scope.resolve_predicates(selection)?;
            root = stack(tree, PlanNode::Filter { predicates }, root)?;
        }

        // HAVING and ORDER BY may name select-list aliases
        scope.output_aliases = output_aliases;

        if let Some(having) = &stmt.having {
            let predicates = scope.resolve_predicates(having)?;
            root = stack(tree, PlanNode::HavingFilter { predicates }, root)?;
        }

        if !stmt.order_by.is_empty() {
            let items = stmt
                .order_by
                .iter()
                .map(|item| {
                    let expr = match position(&item.expr) {
                        Some(position) => ordered_output(&select_list, position)?,
                        None => scope.resolve_expr(&item.expr)?,
                    };
                    Ok(OrderByItem {
                        expr,
                        descending: item.descending,
                    })
                })
                .collect::<TranslateResult<Vec<_>>>()?;
            root = stack(tree, PlanNode::OrderBy { items }, root)?;
        }

        if let Some(limit) = &stmt.limit {
            let count = scope.resolve_expr(limit)?;
            let offset = stmt
                .offset
                .as_ref()
                .map(|offset| scope.resolve_expr(offset))
                .transpose()?;
            root = stack(tree, PlanNode::Limit { count, offset }, root)?;
        }

        Ok(root)
    }

    fn translate_field(&self, field: &SelectField, scope: &Scope) -> TranslateResult<Expr> {
        match field {
            SelectField::Wildcard { qualifier } => {
                if let Some(qualifier) = qualifier {
                    if scope.source(qualifier).is_none() {
                        return Err(TranslateError::UnknownTable(qualifier.clone()));
                    }
                }
                Ok(Expr::Wildcard {
                    qualifier: qualifier.clone(),
                })
            }
            SelectField::Expr { expr, alias } => {
                let expr = scope.resolve_expr(expr)?;
                Ok(match alias {
                    Some(alias) => expr.with_alias(alias.clone()),
                    None => expr,
                })
            }
        }
    }

    fn translate_table_ref(
        &self,
        tree: &mut PlanTree,
        table_ref: &TableRef,
        scope: &mut Scope,
    ) -> TranslateResult<NodeId> {
        match table_ref {
            TableRef::Table { name, alias } => {
                scope.sources.push(Source {
                    visible: alias.clone().unwrap_or_else(|| name.clone()),
                    resolved: name.clone(),
                    outputs: None,
                });
                Ok(tree.add_node(PlanNode::Table {
                    table: TableName::base(name.clone(), alias.clone()),
                }))
            }
            TableRef::Derived { query, alias } => {
                let alias = alias.as_ref().ok_or_else(|| {
                    TranslateError::UnsupportedTableSource("derived table without alias".to_string())
                })?;
                // the subquery gets a scope of its own
                let subquery = self.translate_select(tree, query)?;
                let table = tree.add_node(PlanNode::Table {
                    table: TableName::derived(alias.clone()),
                });
                tree.add_child(table, subquery)?;
                scope.sources.push(Source {
                    visible: alias.clone(),
                    resolved: alias.clone(),
                    outputs: derived_outputs(query),
                });
                Ok(table)
            }
            TableRef::Join {
                kind,
                left,
                right,
                on,
            } => {
                let left = self.translate_table_ref(tree, left, scope)?;
                let right = self.translate_table_ref(tree, right, scope)?;
                let on = match on {
                    Some(on) => scope.resolve_predicates(on)?,
                    None => Vec::new(),
                };
                let join = tree.add_node(PlanNode::Join { kind: *kind, on });
                tree.add_child(join, left)?;
                tree.add_child(join, right)?;
                Ok(join)
            }
        }
    }
}

impl Default for Translator {
    fn default() -> Self {
        Self::new()
    }
}

/// add `node` above the subtree rooted at `child`
fn stack(tree: &mut PlanTree, node: PlanNode, child: NodeId) -> TranslateResult<NodeId> {
    let id = tree.add_node(node);
    tree.add_child(id, child)?;
    Ok(id)
}

// an integer literal in ORDER BY or GROUP BY is a 1-based select-list position
fn position(expr: &AstExpr) -> Option<i64> {
    match expr {
        AstExpr::Literal(LiteralValue::Integer(position)) => Some(*position),
        _ => None,
    }
}

fn select_item_at(projection: &[Expr], position: i64) -> TranslateResult<&Expr> {
    usize::try_from(position)
        .ok()
        .and_then(|position| position.checked_sub(1))
        .and_then(|index| projection.get(index))
        .filter(|expr| !matches!(expr, Expr::Wildcard { .. }))
        .ok_or(TranslateError::InvalidPosition(position))
}

/// the ordering key a position names: the alias when the output has one,
/// else the output expression itself
fn ordered_output(projection: &[Expr], position: i64) -> TranslateResult<Expr> {
    let item = select_item_at(projection, position)?;
    Ok(match item.alias() {
        Some(alias) => Expr::column(ColumnName::unresolved(alias)),
        None => item.clone(),
    })
}

// output names a derived table exposes; unknown when it selects `*`
fn derived_outputs(query: &SelectStatement) -> Option<Vec<String>> {
    let mut outputs = Vec::new();
    for field in &query.fields {
        match field {
            SelectField::Wildcard { .. } => return None,
            SelectField::Expr {
                alias: Some(alias), ..
            } => outputs.push(alias.clone()),
            SelectField::Expr {
                expr: AstExpr::Column { name, .. },
                alias: None,
            } => outputs.push(name.clone()),
            SelectField::Expr { .. } => {}
        }
    }
    Some(outputs)
}
