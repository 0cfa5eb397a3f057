use super::RewriteRule;
use super::rewrite::columns_resolve_in;
use crate::expression::Expr;
use crate::plan::{JoinKind, NodeId, PlanNode, PlanResult, PlanTree};
use tracing::{debug, trace};

/// moves filter predicates into the join side that produces their columns
pub struct PredicatePushDownThroughJoin;

impl RewriteRule for PredicatePushDownThroughJoin {
    fn name(&self) -> &'static str {
        "PredicatePushDownThroughJoin"
    }

    fn apply(&self, tree: &mut PlanTree) -> PlanResult<bool> {
        match tree.root() {
            Some(root) => self.visit(tree, root),
            None => Ok(false),
        }
    }
}

impl PredicatePushDownThroughJoin {
    fn visit(&self, tree: &mut PlanTree, node: NodeId) -> PlanResult<bool> {
        let mut changed = self.try_push(tree, node)?;
        for child in tree.children(node).to_vec() {
            changed |= self.visit(tree, child)?;
        }
        Ok(changed)
    }

    fn try_push(&self, tree: &mut PlanTree, filter: NodeId) -> PlanResult<bool> {
        let Some(predicates) = tree.node(filter).filter_predicates() else {
            return Ok(false);
        };
        let Some(join) = tree.find_in_single_chain(
            filter,
            |node| matches!(node, PlanNode::Join { .. }),
            |node| matches!(node, PlanNode::OrderBy { .. }),
        ) else {
            return Ok(false);
        };
        let PlanNode::Join { kind, .. } = tree.node(join) else {
            return Ok(false);
        };
        let sides = tree.children(join).to_vec();
        if sides.len() != 2 {
            return Ok(false);
        }

        let mut pushed: [Vec<Expr>; 2] = [Vec::new(), Vec::new()];
        let mut kept = Vec::new();
        for predicate in predicates {
            match self.target_side(tree, *kind, &sides, predicate) {
                Some(side) => pushed[side].push(predicate.clone()),
                None => kept.push(predicate.clone()),
            }
        }
        if pushed.iter().all(Vec::is_empty) {
            trace!(filter = %filter, join = %join, "no predicate can enter a join side");
            return Ok(false);
        }

        for (index, predicates) in pushed.into_iter().enumerate() {
            if predicates.is_empty() {
                continue;
            }
            let side = sides[index];
            if tree.node(side).is_filter() {
                if let Some(existing) = tree.node_mut(side).filter_predicates_mut() {
                    existing.extend(predicates);
                }
            } else {
                let new_filter = tree.add_node(PlanNode::Filter { predicates });
                tree.wrap_child(join, index, new_filter)?;
            }
        }

        if kept.is_empty() {
            tree.delete_splice(filter)?;
        } else if let Some(predicates) = tree.node_mut(filter).filter_predicates_mut() {
            *predicates = kept;
        }
        debug!(filter = %filter, join = %join, "pushed predicates into join");
        Ok(true)
    }

    /// index of the join child a predicate may move into
    fn target_side(
        &self,
        tree: &PlanTree,
        kind: JoinKind,
        sides: &[NodeId],
        predicate: &Expr,
    ) -> Option<usize> {
        if !predicate.is_deterministic() {
            return None;
        }
        let columns = predicate.referenced_columns();
        let resolves = |index: usize| columns_resolve_in(tree, sides[index], &columns);
        match kind {
            JoinKind::Left => resolves(0).then_some(0),
            JoinKind::Right => resolves(1).then_some(1),
            JoinKind::Inner => {
                if resolves(0) {
                    Some(0)
                } else if resolves(1) {
                    Some(1)
                } else {
                    None
                }
            }
            JoinKind::Cross | JoinKind::Full => None,
        }
    }
}
