use super::RewriteRule;
use super::rewrite::{aggregate_output_aliases, rewrite_through_projection};
use crate::expression::{Expr, all_deterministic};
use crate::plan::{NodeId, PlanNode, PlanResult, PlanTree};
use tracing::{debug, trace};

/// moves filters below projections and below aggregate boundaries
pub struct PredicatePushDownThroughNonJoin;

impl RewriteRule for PredicatePushDownThroughNonJoin {
    fn name(&self) -> &'static str {
        "PredicatePushDownThroughNonJoin"
    }

    fn apply(&self, tree: &mut PlanTree) -> PlanResult<bool> {
        let mut changed = false;
        // both sub-rules until neither moves anything
        loop {
            let Some(root) = tree.root() else {
                return Ok(changed);
            };
            let to_project = self.push_to_project(tree, root)?;
            let Some(root) = tree.root() else {
                return Ok(true);
            };
            let to_aggregate = self.push_to_aggregate(tree, root)?;
            if !(to_project || to_aggregate) {
                return Ok(changed);
            }
            changed = true;
        }
    }
}

impl PredicatePushDownThroughNonJoin {
    fn push_to_project(&self, tree: &mut PlanTree, node: NodeId) -> PlanResult<bool> {
        let mut changed = self.try_push_to_project(tree, node)?;
        for child in tree.children(node).to_vec() {
            changed |= self.push_to_project(tree, child)?;
        }
        Ok(changed)
    }

    /// Filter → Project(deterministic) → X  becomes  Project → Filter → X
    fn try_push_to_project(&self, tree: &mut PlanTree, filter: NodeId) -> PlanResult<bool> {
        let Some(predicates) = tree.node(filter).filter_predicates() else {
            return Ok(false);
        };
        let Some(project) = tree.only_child(filter) else {
            return Ok(false);
        };
        let PlanNode::Project { columns } = tree.node(project) else {
            return Ok(false);
        };
        if tree.only_child(project).is_none() {
            return Ok(false);
        }
        if !all_deterministic(columns) {
            trace!(filter = %filter, "projection computes aggregates, filter stays");
            return Ok(false);
        }

        let rewritten: Vec<Expr> = predicates
            .iter()
            .map(|predicate| rewrite_through_projection(predicate.clone(), columns))
            .collect();

        tree.delete_splice(filter)?;
        tree.insert_above_children(project, filter)?;
        if let Some(predicates) = tree.node_mut(filter).filter_predicates_mut() {
            *predicates = rewritten;
        }
        debug!(filter = %filter, project = %project, "pushed filter below projection");
        Ok(true)
    }

    fn push_to_aggregate(&self, tree: &mut PlanTree, node: NodeId) -> PlanResult<bool> {
        let mut changed = self.try_push_to_aggregate(tree, node)?;
        for child in tree.children(node).to_vec() {
            changed |= self.push_to_aggregate(tree, child)?;
        }
        Ok(changed)
    }

    /// moves the deterministic predicates that do not read an aggregate output
    /// below the nearest `Aggregate`/`GroupBy` in the filter's chain
    fn try_push_to_aggregate(&self, tree: &mut PlanTree, filter: NodeId) -> PlanResult<bool> {
        let Some(predicates) = tree.node(filter).filter_predicates() else {
            return Ok(false);
        };
        let Some(boundary) = tree.find_in_single_chain(
            filter,
            |node| matches!(node, PlanNode::Aggregate { .. } | PlanNode::GroupBy { .. }),
            |node| {
                matches!(
                    node,
                    PlanNode::HavingFilter { .. } | PlanNode::OrderBy { .. } | PlanNode::Filter { .. }
                )
            },
        ) else {
            return Ok(false);
        };
        let Some(below) = tree.only_child(boundary) else {
            return Ok(false);
        };
        let projection: &[Expr] = match tree.node(boundary) {
            PlanNode::Aggregate { projection, .. } => projection.as_slice(),
            // a bare GroupBy has no aggregate outputs
            _ => &[],
        };
        let aggregate_aliases = aggregate_output_aliases(projection);

        // stable partition: what stays keeps its original relative order
        let mut push_down = Vec::new();
        let mut kept = Vec::new();
        for predicate in predicates {
            // select-list aliases are never qualified
            let reads_aggregate = predicate.referenced_columns().values().any(|column| {
                column.display_table.is_empty()
                    && aggregate_aliases
                        .iter()
                        .any(|alias| alias.eq_ignore_ascii_case(&column.display_column))
            });
            if predicate.is_deterministic() && !reads_aggregate {
                push_down.push(rewrite_through_projection(predicate.clone(), projection));
            } else {
                kept.push(predicate.clone());
            }
        }
        if push_down.is_empty() {
            return Ok(false);
        }

        let pushed = push_down.len();
        if tree.node(below).is_filter() {
            if let Some(existing) = tree.node_mut(below).filter_predicates_mut() {
                existing.extend(push_down);
            }
        } else {
            let new_filter = tree.add_node(PlanNode::Filter {
                predicates: push_down,
            });
            tree.insert_above_children(boundary, new_filter)?;
        }

        if kept.is_empty() {
            tree.delete_splice(filter)?;
        } else if let Some(predicates) = tree.node_mut(filter).filter_predicates_mut() {
            *predicates = kept;
        }
        debug!(filter = %filter, boundary = %boundary, pushed, "pushed predicates below aggregate");
        Ok(true)
    }
}
