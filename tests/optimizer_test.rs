use logiplan::expression::{BinaryOperator, ColumnName, Expr};
use logiplan::optimizer::{
    CombineFilters, OptimizeOutcome, Optimizer, PredicatePushDownThroughJoin,
    PredicatePushDownThroughNonJoin, RewriteRule, RuleTrace,
};
use logiplan::plan::{JoinKind, NodeId, PlanNode, PlanTree, TableName};
use logiplan::{OptimizerConfig, Parser, Translator, optimize_sql};
use proptest::prelude::*;

fn optimize(sql: &str) -> (PlanTree, OptimizeOutcome) {
    optimize_sql(sql).unwrap()
}

fn translate(sql: &str) -> PlanTree {
    let statement = Parser::new().parse(sql).unwrap();
    Translator::new().translate(&statement).unwrap()
}

fn outline(tree: &PlanTree, id: NodeId) -> String {
    let children: Vec<String> = tree
        .children(id)
        .iter()
        .map(|&child| outline(tree, child))
        .collect();
    let name = tree.node(id).name();
    if children.is_empty() {
        name.to_string()
    } else {
        format!("{}({})", name, children.join(", "))
    }
}

fn shape(tree: &PlanTree) -> String {
    outline(tree, tree.root().unwrap())
}

/// rendered nodes of one operator kind, in preorder
fn rendered(tree: &PlanTree, name: &str) -> Vec<String> {
    tree.preorder()
        .into_iter()
        .filter(|&id| tree.node(id).name() == name)
        .map(|id| tree.node(id).to_string())
        .collect()
}

fn cmp(op: BinaryOperator, column: ColumnName, value: i64) -> Expr {
    Expr::binary(op, Expr::column(column), Expr::int(value))
}

fn scan(tree: &mut PlanTree, name: &str) -> NodeId {
    tree.add_node(PlanNode::Table {
        table: TableName::base(name, None),
    })
}

/// Filter(P1) → Filter(P2) → ... → Table
fn stacked_filters(lists: &[Vec<Expr>]) -> PlanTree {
    let mut tree = PlanTree::new();
    let mut below = scan(&mut tree, "t");
    for predicates in lists.iter().rev() {
        let filter = tree.add_node(PlanNode::Filter {
            predicates: predicates.clone(),
        });
        tree.add_child(filter, below).unwrap();
        below = filter;
    }
    tree.set_root(below);
    tree
}

const SCENARIOS: [&str; 8] = [
    "SELECT a, b FROM (SELECT A, B FROM t2 WHERE A > 2) AS tmp WHERE b < 1",
    "SELECT SUM(x) AS s FROM t WHERE y > 1 GROUP BY c",
    "SELECT * FROM t1 LEFT JOIN t2 ON t1.id = t2.id WHERE t1.y > 1",
    "SELECT t1.x FROM t1 LEFT JOIN t2 ON t1.id = t2.id ORDER BY t1.x LIMIT 5",
    "SELECT t1.x FROM t1 LEFT JOIN t2 ON t1.id = t2.id ORDER BY t1.x LIMIT 5 OFFSET 3",
    "SELECT * FROM t1 JOIN t2 ON t1.id = t2.id WHERE t1.a > 1 AND t2.b < 2 AND t1.c = t2.c",
    "SELECT c, SUM(x) AS s FROM t WHERE c > 1 AND s > 5 GROUP BY c HAVING s > 10",
    "SELECT a + 1 AS s FROM t WHERE a > 0 ORDER BY s LIMIT 3",
];

#[derive(Debug, Clone)]
enum Pred {
    // deterministic, reads only a group key
    Pushable(i64),
    // reads the aggregate output alias
    AliasRef(i64),
    // calls an aggregate
    Aggregate(i64),
}

fn build_pred(pred: &Pred) -> Expr {
    match pred {
        Pred::Pushable(v) => cmp(BinaryOperator::Gt, ColumnName::new("t", "c"), *v),
        Pred::AliasRef(v) => cmp(BinaryOperator::Lt, ColumnName::unresolved("s"), *v),
        Pred::Aggregate(v) => Expr::binary(
            BinaryOperator::Gt,
            Expr::call("SUM", vec![Expr::column(ColumnName::new("t", "x"))]),
            Expr::int(*v),
        ),
    }
}

fn arb_pred() -> impl Strategy<Value = Pred> {
    prop_oneof![
        (0..100i64).prop_map(Pred::Pushable),
        (0..100i64).prop_map(Pred::AliasRef),
        (0..100i64).prop_map(Pred::Aggregate),
    ]
}

fn arb_predicates() -> impl Strategy<Value = Vec<Expr>> {
    prop::collection::vec(
        (0..4usize, 0..100i64).prop_map(|(c, v)| {
            cmp(BinaryOperator::Gt, ColumnName::new("t", ["a", "b", "c", "d"][c]), v)
        }),
        1..5,
    )
}

proptest! {
    #[test]
    fn test_combine_concatenates_and_settles(p1 in arb_predicates(), p2 in arb_predicates()) {
        let mut tree = stacked_filters(&[p1.clone(), p2.clone()]);
        prop_assert!(CombineFilters.apply(&mut tree).unwrap());

        let root = tree.root().unwrap();
        let expected: Vec<Expr> = p1.iter().chain(p2.iter()).cloned().collect();
        prop_assert_eq!(tree.node(root).filter_predicates().unwrap(), expected.as_slice());
        prop_assert_eq!(shape(&tree), "Filter(Table)");

        prop_assert!(!CombineFilters.apply(&mut tree).unwrap());
    }

    #[test]
    fn test_aggregate_partition_keeps_relative_order(preds in prop::collection::vec(arb_pred(), 1..6)) {
        let mut tree = PlanTree::new();
        let table = scan(&mut tree, "t");
        let group_key = Expr::column(ColumnName::new("t", "c"));
        let aggregate = tree.add_node(PlanNode::Aggregate {
            projection: vec![
                group_key.clone(),
                Expr::call("SUM", vec![Expr::column(ColumnName::new("t", "x"))]).with_alias("s"),
            ],
            group_keys: vec![group_key],
        });
        tree.add_child(aggregate, table).unwrap();
        let filter = tree.add_node(PlanNode::Filter {
            predicates: preds.iter().map(build_pred).collect(),
        });
        tree.add_child(filter, aggregate).unwrap();
        tree.set_root(filter);

        let pushed: Vec<Expr> = preds
            .iter()
            .filter(|p| matches!(p, Pred::Pushable(_)))
            .map(build_pred)
            .collect();
        let kept: Vec<Expr> = preds
            .iter()
            .filter(|p| !matches!(p, Pred::Pushable(_)))
            .map(build_pred)
            .collect();

        let changed = PredicatePushDownThroughNonJoin.apply(&mut tree).unwrap();
        prop_assert_eq!(changed, !pushed.is_empty());
        tree.validate().unwrap();

        if pushed.is_empty() {
            prop_assert_eq!(shape(&tree), "Filter(Aggregate(Table))");
        } else {
            let below = tree.only_child(aggregate).unwrap();
            prop_assert_eq!(tree.node(below).filter_predicates().unwrap(), pushed.as_slice());
            if kept.is_empty() {
                prop_assert_eq!(shape(&tree), "Aggregate(Filter(Table))");
            } else {
                prop_assert_eq!(shape(&tree), "Filter(Aggregate(Filter(Table)))");
                prop_assert_eq!(tree.node(filter).filter_predicates().unwrap(), kept.as_slice());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_through_subquery_projections() {
        let (tree, outcome) = optimize(SCENARIOS[0]);

        assert!(outcome.changed);
        assert!(outcome.converged);
        assert_eq!(
            shape(&tree),
            "Project(Filter(Table(Project(Filter(Table)))))"
        );
        assert_eq!(
            rendered(&tree, "Filter"),
            vec![
                "Filter (Condition: B < 1)".to_string(),
                "Filter (Condition: A > 2)".to_string(),
            ]
        );
    }

    #[test]
    fn test_filter_below_aggregate() {
        let (tree, outcome) = optimize(SCENARIOS[1]);

        assert!(outcome.changed);
        assert_eq!(shape(&tree), "Aggregate(Filter(Table))");
        assert_eq!(rendered(&tree, "Filter"), vec!["Filter (Condition: y > 1)".to_string()]);
    }

    #[test]
    fn test_filter_into_left_join_preserved_side() {
        let (tree, _) = optimize(SCENARIOS[2]);

        assert_eq!(shape(&tree), "Project(Join(Filter(Table), Table))");
        assert_eq!(
            rendered(&tree, "Filter"),
            vec!["Filter (Condition: t1.y > 1)".to_string()]
        );
    }

    #[test]
    fn test_limit_copied_into_left_join() {
        let (tree, outcome) = optimize(SCENARIOS[3]);

        assert!(outcome.changed);
        assert_eq!(
            shape(&tree),
            "Project(Limit(OrderBy(Join(Limit(OrderBy(Table)), Table))))"
        );
        assert_eq!(
            rendered(&tree, "Limit"),
            vec!["Limit (LIMIT 5)".to_string(), "Limit (LIMIT 5)".to_string()]
        );
        assert_eq!(
            rendered(&tree, "OrderBy"),
            vec![
                "OrderBy (Keys: t1.x)".to_string(),
                "OrderBy (Keys: t1.x)".to_string(),
            ]
        );
    }

    #[test]
    fn test_order_by_position_decides_join_side() {
        let (tree, _) =
            optimize("SELECT t2.x FROM t1 LEFT JOIN t2 ON t1.id = t2.id ORDER BY 1 LIMIT 5");
        assert_eq!(shape(&tree), "Project(Limit(OrderBy(Join(Table, Table))))");

        let (tree, _) =
            optimize("SELECT t1.x, t2.y FROM t1 LEFT JOIN t2 ON t1.id = t2.id ORDER BY 1 LIMIT 5");
        assert_eq!(
            shape(&tree),
            "Project(Limit(OrderBy(Join(Limit(OrderBy(Table)), Table))))"
        );
    }

    #[test]
    fn test_constant_ordering_is_not_copied_into_join() {
        let (tree, _) =
            optimize("SELECT t1.x FROM t1 LEFT JOIN t2 ON t1.id = t2.id ORDER BY 'k' LIMIT 5");
        assert_eq!(shape(&tree), "Project(Limit(OrderBy(Join(Table, Table))))");
        assert_eq!(rendered(&tree, "Limit").len(), 1);
    }

    #[test]
    fn test_limit_not_copied_into_cross_join() {
        let (tree, _) = optimize("SELECT t1.x FROM t1 CROSS JOIN t2 ORDER BY t1.x LIMIT 5");

        assert_eq!(shape(&tree), "Project(Limit(OrderBy(Join(Table, Table))))");
        assert_eq!(rendered(&tree, "Limit").len(), 1);
    }

    #[test]
    fn test_limit_not_copied_into_inner_join() {
        let (tree, _) =
            optimize("SELECT t1.x FROM t1 JOIN t2 ON t1.id = t2.id ORDER BY t1.x LIMIT 5");

        assert_eq!(shape(&tree), "Project(Limit(OrderBy(Join(Table, Table))))");
    }

    #[test]
    fn test_pushed_limit_covers_offset() {
        let (tree, _) = optimize(SCENARIOS[4]);

        assert_eq!(
            rendered(&tree, "Limit"),
            vec![
                "Limit (LIMIT 5 OFFSET 3)".to_string(),
                "Limit (LIMIT 8)".to_string(),
            ]
        );
    }

    #[test]
    fn test_right_join_limit_needs_right_columns() {
        let (tree, _) =
            optimize("SELECT t1.x FROM t1 RIGHT JOIN t2 ON t1.id = t2.id ORDER BY t1.x LIMIT 5");
        assert_eq!(shape(&tree), "Project(Limit(OrderBy(Join(Table, Table))))");

        let (tree, _) =
            optimize("SELECT t2.x FROM t1 RIGHT JOIN t2 ON t1.id = t2.id ORDER BY t2.x LIMIT 5");
        assert_eq!(
            shape(&tree),
            "Project(Limit(OrderBy(Join(Table, Limit(OrderBy(Table))))))"
        );
    }

    #[test]
    fn test_inner_join_splits_predicates_by_side() {
        let (tree, _) = optimize(SCENARIOS[5]);

        assert_eq!(
            shape(&tree),
            "Project(Filter(Join(Filter(Table), Filter(Table))))"
        );
        assert_eq!(
            rendered(&tree, "Filter"),
            vec![
                "Filter (Condition: t1.c = t2.c)".to_string(),
                "Filter (Condition: t1.a > 1)".to_string(),
                "Filter (Condition: t2.b < 2)".to_string(),
            ]
        );
    }

    #[test]
    fn test_left_join_keeps_null_supplying_predicates() {
        let (tree, _) = optimize(
            "SELECT * FROM t1 LEFT JOIN t2 ON t1.id = t2.id WHERE t1.a > 1 AND t2.b < 2 AND t1.d = 4",
        );

        assert_eq!(shape(&tree), "Project(Filter(Join(Filter(Table), Table)))");
        assert_eq!(
            rendered(&tree, "Filter"),
            vec![
                "Filter (Condition: t2.b < 2)".to_string(),
                "Filter (Condition: t1.a > 1 AND t1.d = 4)".to_string(),
            ]
        );
    }

    #[test]
    fn test_full_and_cross_joins_decline() {
        let (tree, _) =
            optimize("SELECT * FROM t1 FULL JOIN t2 ON t1.id = t2.id WHERE t1.a > 1");
        assert_eq!(shape(&tree), "Project(Filter(Join(Table, Table)))");

        let (tree, _) = optimize("SELECT * FROM t1 CROSS JOIN t2 WHERE t1.a > 1");
        assert_eq!(shape(&tree), "Project(Filter(Join(Table, Table)))");
    }

    #[test]
    fn test_aliased_join_sides() {
        let (tree, _) = optimize(
            "SELECT * FROM users u LEFT JOIN orders o ON u.id = o.user_id WHERE u.age > 30",
        );
        assert_eq!(shape(&tree), "Project(Join(Filter(Table), Table))");
    }

    #[test]
    fn test_join_ignores_unqualified_columns() {
        let (tree, _) = optimize("SELECT * FROM t1 JOIN t2 ON t1.id = t2.id WHERE a > 1");
        assert_eq!(shape(&tree), "Project(Filter(Join(Table, Table)))");
    }

    #[test]
    fn test_aggregate_partition() {
        let (tree, _) = optimize(SCENARIOS[6]);

        assert_eq!(
            shape(&tree),
            "HavingFilter(Filter(Aggregate(Filter(Table))))"
        );
        assert_eq!(
            rendered(&tree, "Filter"),
            vec![
                "Filter (Condition: s > 5)".to_string(),
                "Filter (Condition: c > 1)".to_string(),
            ]
        );
        assert_eq!(
            rendered(&tree, "HavingFilter"),
            vec!["HavingFilter (Condition: s > 10)".to_string()]
        );
    }

    #[test]
    fn test_qualified_column_named_like_aggregate_alias_is_pushed() {
        let (tree, outcome) = optimize("SELECT SUM(x) AS s FROM t WHERE t.s > 1");

        assert!(outcome.changed);
        assert_eq!(shape(&tree), "Aggregate(Filter(Table))");
        assert_eq!(
            rendered(&tree, "Filter"),
            vec!["Filter (Condition: t.s > 1)".to_string()]
        );
    }

    #[test]
    fn test_having_alone_is_untouched() {
        let (tree, outcome) = optimize("SELECT c, SUM(x) AS s FROM t GROUP BY c HAVING s > 10");

        assert!(!outcome.changed);
        assert!(outcome.converged);
        assert_eq!(outcome.passes, 1);
        assert_eq!(shape(&tree), "HavingFilter(Aggregate(Table))");
    }

    #[test]
    fn test_filter_below_group_by() {
        let (tree, _) = optimize("SELECT c FROM t WHERE c > 1 GROUP BY c");
        assert_eq!(shape(&tree), "Project(GroupBy(Filter(Table)))");
    }

    #[test]
    fn test_limit_and_order_below_projection() {
        let (tree, _) = optimize(SCENARIOS[7]);

        assert_eq!(shape(&tree), "Project(Limit(OrderBy(Filter(Table))))");
        assert_eq!(
            rendered(&tree, "OrderBy"),
            vec!["OrderBy (Keys: a + 1)".to_string()]
        );
    }

    #[test]
    fn test_limit_stays_above_aggregate() {
        let (tree, outcome) = optimize("SELECT SUM(x) AS s FROM t ORDER BY s LIMIT 1");

        assert!(!outcome.changed);
        assert_eq!(shape(&tree), "Limit(OrderBy(Aggregate(Table)))");
    }

    #[test]
    fn test_limit_without_order_below_projection() {
        let (tree, _) = optimize("SELECT a FROM t LIMIT 10");
        assert_eq!(shape(&tree), "Project(Limit(Table))");
    }

    #[test]
    fn test_optimizing_twice_changes_nothing() {
        for sql in SCENARIOS {
            let (mut tree, _) = optimize(sql);
            let before = tree.explain();

            let outcome = Optimizer::new().optimize(&mut tree).unwrap();

            assert!(!outcome.changed, "second run changed: {}", sql);
            assert_eq!(tree.explain(), before, "plan moved on second run: {}", sql);
        }
    }

    #[test]
    fn test_combine_three_filters() {
        let p = |v| vec![cmp(BinaryOperator::Gt, ColumnName::new("t", "a"), v)];
        let mut tree = stacked_filters(&[p(1), p(2), p(3)]);

        assert!(CombineFilters.apply(&mut tree).unwrap());
        assert_eq!(shape(&tree), "Filter(Table)");
        assert_eq!(
            rendered(&tree, "Filter"),
            vec!["Filter (Condition: t.a > 1 AND t.a > 2 AND t.a > 3)".to_string()]
        );
    }

    #[test]
    fn test_combine_recurses_into_join_sides() {
        let mut tree = PlanTree::new();
        let left = scan(&mut tree, "t1");
        let right = scan(&mut tree, "t2");
        let inner = tree.add_node(PlanNode::Filter {
            predicates: vec![cmp(BinaryOperator::Gt, ColumnName::new("t2", "b"), 2)],
        });
        tree.add_child(inner, right).unwrap();
        let outer = tree.add_node(PlanNode::Filter {
            predicates: vec![cmp(BinaryOperator::Gt, ColumnName::new("t2", "a"), 1)],
        });
        tree.add_child(outer, inner).unwrap();
        let join = tree.add_node(PlanNode::Join {
            kind: JoinKind::Inner,
            on: vec![],
        });
        tree.add_child(join, left).unwrap();
        tree.add_child(join, outer).unwrap();
        tree.set_root(join);

        assert!(CombineFilters.apply(&mut tree).unwrap());
        assert_eq!(shape(&tree), "Join(Table, Filter(Table))");
        assert_eq!(tree.children(join), &[left, outer]);
    }

    #[test]
    fn test_join_rule_merges_into_existing_side_filter() {
        let mut tree = translate("SELECT * FROM t1 LEFT JOIN t2 ON t1.id = t2.id WHERE t1.a > 1");
        Optimizer::new().optimize(&mut tree).unwrap();
        assert_eq!(shape(&tree), "Project(Join(Filter(Table), Table))");

        // a second filter above the join joins the one already on the left
        let project = tree.root().unwrap();
        let extra = tree.add_node(PlanNode::Filter {
            predicates: vec![cmp(BinaryOperator::Lt, ColumnName::new("t1", "b"), 9)],
        });
        tree.insert_above_children(project, extra).unwrap();

        assert!(PredicatePushDownThroughJoin.apply(&mut tree).unwrap());
        assert_eq!(shape(&tree), "Project(Join(Filter(Table), Table))");
        assert_eq!(
            rendered(&tree, "Filter"),
            vec!["Filter (Condition: t1.a > 1 AND t1.b < 9)".to_string()]
        );
    }

    #[test]
    fn test_disabled_rules_leave_plan_alone() {
        let mut tree = translate(SCENARIOS[2]);
        let before = tree.explain();
        let config = OptimizerConfig::default().with_predicate_pushdown(false);

        let outcome = Optimizer::with_config(config).optimize(&mut tree).unwrap();

        assert!(!outcome.changed);
        assert_eq!(tree.explain(), before);
    }

    #[test]
    fn test_pass_limit_reports_not_converged() {
        let mut tree = translate(SCENARIOS[3]);
        let config = OptimizerConfig::default().with_max_passes(1);

        let outcome = Optimizer::with_config(config).optimize(&mut tree).unwrap();

        assert!(outcome.changed);
        assert!(!outcome.converged);
        assert_eq!(outcome.passes, 1);
    }

    #[test]
    fn test_rule_traces() {
        let mut tree = translate(SCENARIOS[3]);
        let config = OptimizerConfig::default().with_plan_capture(true);
        let mut traces: Vec<RuleTrace> = Vec::new();

        let outcome = Optimizer::with_config(config)
            .optimize_with(&mut tree, &mut traces)
            .unwrap();

        assert_eq!(outcome.passes, 2);
        assert_eq!(traces.len(), 7);
        assert_eq!(traces[0].rule, "CombineFilters");
        assert_eq!(traces[0].pass, 0);

        let applied: Vec<&RuleTrace> = traces.iter().filter(|t| t.changed).collect();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].rule, "LimitPushDown");
        assert_eq!(applied[0].pass, 1);
        assert_ne!(applied[0].before, applied[0].after);
        assert!(applied[0].after.is_some());
        assert_eq!(outcome.rules_applied, 1);
    }
}
