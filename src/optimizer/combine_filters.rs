use super::RewriteRule;
use crate::plan::{NodeId, PlanResult, PlanTree};
use tracing::debug;

/// merges a `Filter` whose only child is a `Filter` into one node holding `P1 ++ P2`
pub struct CombineFilters;

impl RewriteRule for CombineFilters {
    fn name(&self) -> &'static str {
        "CombineFilters"
    }

    fn apply(&self, tree: &mut PlanTree) -> PlanResult<bool> {
        match tree.root() {
            Some(root) => self.combine(tree, root),
            None => Ok(false),
        }
    }
}

impl CombineFilters {
    fn combine(&self, tree: &mut PlanTree, node: NodeId) -> PlanResult<bool> {
        let mut changed = false;

        if tree.node(node).is_filter() {
            while let Some(child) = tree.only_child(node).filter(|&c| tree.node(c).is_filter()) {
                // splice first so a failure leaves the predicates untouched
                tree.delete_splice(child)?;
                let moved = tree
                    .node_mut(child)
                    .filter_predicates_mut()
                    .map(std::mem::take)
                    .unwrap_or_default();
                if let Some(predicates) = tree.node_mut(node).filter_predicates_mut() {
                    predicates.extend(moved);
                }
                debug!(filter = %node, merged = %child, "combined adjacent filters");
                changed = true;
            }
        }

        for child in tree.children(node).to_vec() {
            changed |= self.combine(tree, child)?;
        }
        Ok(changed)
    }
}
