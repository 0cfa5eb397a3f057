//! helpers shared by the pushdown rules.

use crate::expression::{ColumnName, Expr};
use crate::plan::{NodeId, PlanNode, PlanTree};
use std::collections::BTreeMap;

/// rewrite an expression evaluated above `projection` so it evaluates below it.
///
/// an unresolved, unqualified column naming a projection alias is replaced by
/// the aliased expression; every other column is displayed under its resolved name.
pub fn rewrite_through_projection(expr: Expr, projection: &[Expr]) -> Expr {
    expr.map_columns(&mut |column| {
        if !column.is_resolved() && column.display_table.is_empty() {
            if let Some(aliased) = find_alias(projection, &column.display_column) {
                return aliased.unaliased().clone();
            }
        }
        Expr::ColumnRef(column.to_original())
    })
}

fn find_alias<'a>(projection: &'a [Expr], name: &str) -> Option<&'a Expr> {
    projection.iter().find(|expr| {
        expr.alias()
            .is_some_and(|alias| alias.eq_ignore_ascii_case(name))
    })
}

/// aliases of the aggregate (non-deterministic) outputs of a projection
pub fn aggregate_output_aliases(projection: &[Expr]) -> Vec<String> {
    projection
        .iter()
        .filter(|expr| !expr.is_deterministic())
        .filter_map(|expr| expr.alias().map(str::to_string))
        .collect()
}

/// whether a table named `qualifier` is visible in the subtree at `node`.
///
/// a `Table` matches by alias (or base name when unaliased) and is not
/// descended into; a `Project` matches when one of its outputs has that alias.
pub fn subtree_provides(tree: &PlanTree, node: NodeId, qualifier: &str) -> bool {
    match tree.node(node) {
        PlanNode::Table { table } => return table.visible_name().eq_ignore_ascii_case(qualifier),
        // translated join sides bottom out at a Table first; a Project is only
        // met in trees built by hand, and its aliases may shadow a table name
        PlanNode::Project { columns } if find_alias(columns, qualifier).is_some() => return true,
        _ => {}
    }
    tree.children(node)
        .iter()
        .any(|&child| subtree_provides(tree, child, qualifier))
}

/// whether every column resolves within the subtree at `node`; a column
/// without any table qualifier resolves nowhere
pub fn columns_resolve_in(
    tree: &PlanTree,
    node: NodeId,
    columns: &BTreeMap<String, ColumnName>,
) -> bool {
    columns.values().all(|column| {
        column
            .table_qualifier()
            .is_some_and(|qualifier| subtree_provides(tree, node, qualifier))
    })
}

/// columns referenced by any of `exprs`
pub fn referenced_columns<'a, I>(exprs: I) -> BTreeMap<String, ColumnName>
where
    I: IntoIterator<Item = &'a Expr>,
{
    let mut columns = BTreeMap::new();
    for expr in exprs {
        columns.extend(expr.referenced_columns());
    }
    columns
}
