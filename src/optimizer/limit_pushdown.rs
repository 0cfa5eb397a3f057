use super::RewriteRule;
use super::rewrite::{columns_resolve_in, referenced_columns, rewrite_through_projection};
use crate::expression::{Expr, LiteralValue, all_deterministic};
use crate::plan::{JoinKind, NodeId, OrderByItem, PlanNode, PlanResult, PlanTree};
use tracing::{debug, trace};

/// moves `Limit` (with its `OrderBy`) below projections and copies it into
/// the preserved side of outer joins
pub struct LimitPushDown;

impl RewriteRule for LimitPushDown {
    fn name(&self) -> &'static str {
        "LimitPushDown"
    }

    fn apply(&self, tree: &mut PlanTree) -> PlanResult<bool> {
        let mut changed = false;
        loop {
            let Some(root) = tree.root() else {
                return Ok(changed);
            };
            let to_project = self.push_to_project(tree, root)?;
            let Some(root) = tree.root() else {
                return Ok(true);
            };
            let to_join = self.push_to_join(tree, root)?;
            if !(to_project || to_join) {
                return Ok(changed);
            }
            changed = true;
        }
    }
}

impl LimitPushDown {
    fn push_to_project(&self, tree: &mut PlanTree, node: NodeId) -> PlanResult<bool> {
        let mut changed = self.try_push_to_project(tree, node)?;
        for child in tree.children(node).to_vec() {
            changed |= self.push_to_project(tree, child)?;
        }
        Ok(changed)
    }

    /// Limit → [OrderBy →] Project → X  becomes  Project → Limit → [OrderBy →] X
    fn try_push_to_project(&self, tree: &mut PlanTree, limit: NodeId) -> PlanResult<bool> {
        if !matches!(tree.node(limit), PlanNode::Limit { .. }) {
            return Ok(false);
        }
        let Some(next) = tree.only_child(limit) else {
            return Ok(false);
        };
        let order = matches!(tree.node(next), PlanNode::OrderBy { .. }).then_some(next);
        let Some(project) = tree.only_child(order.unwrap_or(limit)) else {
            return Ok(false);
        };
        let PlanNode::Project { columns } = tree.node(project) else {
            return Ok(false);
        };
        if tree.only_child(project).is_none() || !all_deterministic(columns) {
            trace!(limit = %limit, "projection blocks limit pushdown");
            return Ok(false);
        }

        let rewritten: Option<Vec<OrderByItem>> = order.and_then(|order| match tree.node(order) {
            PlanNode::OrderBy { items } => Some(
                items
                    .iter()
                    .map(|item| OrderByItem {
                        expr: rewrite_through_projection(item.expr.clone(), columns),
                        descending: item.descending,
                    })
                    .collect(),
            ),
            _ => None,
        });

        if let Some(order) = order {
            tree.delete_splice(order)?;
        }
        tree.delete_splice(limit)?;
        if let Some(order) = order {
            tree.insert_above_children(project, order)?;
        }
        tree.insert_above_children(project, limit)?;
        if let (Some(order), Some(rewritten)) = (order, rewritten) {
            if let PlanNode::OrderBy { items } = tree.node_mut(order) {
                *items = rewritten;
            }
        }
        debug!(limit = %limit, project = %project, "pushed limit below projection");
        Ok(true)
    }

    fn push_to_join(&self, tree: &mut PlanTree, node: NodeId) -> PlanResult<bool> {
        let mut changed = self.try_push_to_join(tree, node)?;
        for child in tree.children(node).to_vec() {
            changed |= self.push_to_join(tree, child)?;
        }
        Ok(changed)
    }

    /// Limit → OrderBy → Join(outer): copy the limit and ordering onto the
    /// preserved side; the original pair stays above the join
    fn try_push_to_join(&self, tree: &mut PlanTree, limit: NodeId) -> PlanResult<bool> {
        let PlanNode::Limit { count, offset } = tree.node(limit) else {
            return Ok(false);
        };
        let Some(order) = tree.only_child(limit) else {
            return Ok(false);
        };
        let PlanNode::OrderBy { items } = tree.node(order) else {
            return Ok(false);
        };
        let Some(join) = tree.only_child(order) else {
            return Ok(false);
        };
        let PlanNode::Join { kind, .. } = tree.node(join) else {
            return Ok(false);
        };
        let sides = tree.children(join).to_vec();
        if sides.len() != 2 {
            return Ok(false);
        }

        let Some(index) = self.preserved_side(tree, *kind, &sides, items) else {
            return Ok(false);
        };
        let Some(pushed_count) = pushed_count(count, offset.as_ref()) else {
            trace!(limit = %limit, "offset is not a literal, limit stays above join");
            return Ok(false);
        };
        if self.already_pushed(tree, sides[index], &pushed_count, items) {
            return Ok(false);
        }

        let items = items.clone();
        let new_order = tree.add_node(PlanNode::OrderBy { items });
        let new_limit = tree.add_node(PlanNode::Limit {
            count: pushed_count,
            offset: None,
        });
        tree.wrap_child(join, index, new_order)?;
        tree.wrap_child(join, index, new_limit)?;
        debug!(limit = %limit, join = %join, side = index, "copied limit into join side");
        Ok(true)
    }

    /// the outer join side whose subtree produces every ordering column
    fn preserved_side(
        &self,
        tree: &PlanTree,
        kind: JoinKind,
        sides: &[NodeId],
        items: &[OrderByItem],
    ) -> Option<usize> {
        let index = match kind {
            JoinKind::Left => 0,
            JoinKind::Right => 1,
            JoinKind::Inner | JoinKind::Cross | JoinKind::Full => return None,
        };
        let columns = referenced_columns(items.iter().map(|item| &item.expr));
        // an ordering without columns does not tie the kept rows to this side
        if columns.is_empty() {
            return None;
        }
        columns_resolve_in(tree, sides[index], &columns).then_some(index)
    }

    fn already_pushed(&self, tree: &PlanTree, side: NodeId, count: &Expr, items: &[OrderByItem]) -> bool {
        let PlanNode::Limit {
            count: existing,
            offset: None,
        } = tree.node(side)
        else {
            return false;
        };
        if existing != count {
            return false;
        }
        tree.only_child(side).is_some_and(|child| {
            matches!(tree.node(child), PlanNode::OrderBy { items: pushed } if pushed.as_slice() == items)
        })
    }
}

/// rows the join side must keep: `count + offset` when an offset is present
fn pushed_count(count: &Expr, offset: Option<&Expr>) -> Option<Expr> {
    let Some(offset) = offset else {
        return Some(count.clone());
    };
    let total = count.as_integer()?.checked_add(offset.as_integer()?)?;
    Some(Expr::Literal(LiteralValue::Integer(total)))
}
