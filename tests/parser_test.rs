use logiplan::ast::{AstExpr, SelectField, TableRef};
use logiplan::expression::{BinaryOperator, LiteralValue, UnaryOperator};
use logiplan::parser::{ParseError, Parser};
use logiplan::plan::JoinKind;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_select_star() {
        let stmt = Parser::new().parse("SELECT * FROM users").unwrap();

        assert_eq!(stmt.fields, vec![SelectField::Wildcard { qualifier: None }]);
        assert_eq!(
            stmt.from,
            Some(TableRef::Table {
                name: "users".to_string(),
                alias: None
            })
        );
        assert!(stmt.selection.is_none());
        assert!(stmt.limit.is_none());
    }

    #[test]
    fn test_parse_aliases_and_qualified_columns() {
        let stmt = Parser::new()
            .parse("SELECT u.name AS n, age FROM users AS u")
            .unwrap();

        assert_eq!(
            stmt.fields,
            vec![
                SelectField::Expr {
                    expr: AstExpr::qualified("u", "name"),
                    alias: Some("n".to_string()),
                },
                SelectField::Expr {
                    expr: AstExpr::column("age"),
                    alias: None,
                },
            ]
        );
        assert_eq!(
            stmt.from,
            Some(TableRef::Table {
                name: "users".to_string(),
                alias: Some("u".to_string())
            })
        );
    }

    #[test]
    fn test_parse_where_precedence() {
        let stmt = Parser::new()
            .parse("SELECT a FROM t WHERE a > 1 AND (b = 'x' OR c IS NULL)")
            .unwrap();

        let expected = AstExpr::binary(
            BinaryOperator::And,
            AstExpr::binary(
                BinaryOperator::Gt,
                AstExpr::column("a"),
                AstExpr::Literal(LiteralValue::Integer(1)),
            ),
            AstExpr::binary(
                BinaryOperator::Or,
                AstExpr::binary(
                    BinaryOperator::Eq,
                    AstExpr::column("b"),
                    AstExpr::Literal(LiteralValue::String("x".to_string())),
                ),
                AstExpr::Unary {
                    op: UnaryOperator::IsNull,
                    expr: Box::new(AstExpr::column("c")),
                },
            ),
        );
        assert_eq!(stmt.selection, Some(expected));
    }

    #[test]
    fn test_parse_joins() {
        let stmt = Parser::new()
            .parse("SELECT * FROM t1 LEFT JOIN t2 ON t1.id = t2.id CROSS JOIN t3")
            .unwrap();

        let Some(TableRef::Join {
            kind: JoinKind::Cross,
            left,
            on: None,
            ..
        }) = stmt.from
        else {
            panic!("expected an outer cross join");
        };
        let TableRef::Join { kind, on, .. } = *left else {
            panic!("expected a nested left join");
        };
        assert_eq!(kind, JoinKind::Left);
        assert_eq!(
            on,
            Some(AstExpr::binary(
                BinaryOperator::Eq,
                AstExpr::qualified("t1", "id"),
                AstExpr::qualified("t2", "id"),
            ))
        );
    }

    #[test]
    fn test_comma_from_becomes_cross_join() {
        let stmt = Parser::new().parse("SELECT * FROM a, b").unwrap();
        assert!(matches!(
            stmt.from,
            Some(TableRef::Join {
                kind: JoinKind::Cross,
                on: None,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_derived_table() {
        let stmt = Parser::new()
            .parse("SELECT a FROM (SELECT a FROM t WHERE a > 2) AS tmp")
            .unwrap();

        let Some(TableRef::Derived { query, alias }) = stmt.from else {
            panic!("expected a derived table");
        };
        assert_eq!(alias.as_deref(), Some("tmp"));
        assert!(query.selection.is_some());
    }

    #[test]
    fn test_parse_group_having_order_limit() {
        let stmt = Parser::new()
            .parse(
                "SELECT c, SUM(x) AS s FROM t GROUP BY c HAVING s > 10 ORDER BY s DESC, c LIMIT 5 OFFSET 2",
            )
            .unwrap();

        assert_eq!(stmt.group_by, vec![AstExpr::column("c")]);
        assert!(stmt.having.is_some());
        assert_eq!(stmt.order_by.len(), 2);
        assert!(stmt.order_by[0].descending);
        assert!(!stmt.order_by[1].descending);
        assert_eq!(stmt.limit, Some(AstExpr::Literal(LiteralValue::Integer(5))));
        assert_eq!(stmt.offset, Some(AstExpr::Literal(LiteralValue::Integer(2))));
    }

    #[test]
    fn test_count_star_argument() {
        let stmt = Parser::new().parse("SELECT COUNT(*) FROM t").unwrap();
        assert_eq!(
            stmt.fields,
            vec![SelectField::Expr {
                expr: AstExpr::Function {
                    name: "COUNT".to_string(),
                    args: vec![AstExpr::Wildcard],
                },
                alias: None,
            }]
        );
    }

    #[test]
    fn test_between_is_desugared() {
        let stmt = Parser::new()
            .parse("SELECT a FROM t WHERE a BETWEEN 1 AND 3")
            .unwrap();
        let Some(AstExpr::BinaryOp { op, left, right }) = stmt.selection else {
            panic!("expected a conjunction");
        };
        assert_eq!(op, BinaryOperator::And);
        assert!(matches!(*left, AstExpr::BinaryOp { op: BinaryOperator::GtEq, .. }));
        assert!(matches!(*right, AstExpr::BinaryOp { op: BinaryOperator::LtEq, .. }));
    }

    #[test]
    fn test_rejects_non_select() {
        assert_eq!(
            Parser::new().parse("DELETE FROM t"),
            Err(ParseError::NotASelect)
        );
    }

    #[test]
    fn test_rejects_multiple_statements() {
        assert_eq!(
            Parser::new().parse("SELECT a FROM t; SELECT b FROM t"),
            Err(ParseError::StatementCount(2))
        );
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(
            Parser::new().parse("SELEC a FROM t"),
            Err(ParseError::Syntax(_))
        ));
    }

    #[test]
    fn test_rejects_using_constraint() {
        assert!(matches!(
            Parser::new().parse("SELECT * FROM a JOIN b USING (id)"),
            Err(ParseError::Unsupported(_))
        ));
    }
}
