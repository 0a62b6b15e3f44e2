//! Spec §8 Scenario 2: HashJoin inner.

mod common;

use common::FakeStorage;
use dbcore_exec::expr::Expr;
use dbcore_exec::operator::{run_to_result_set, ExecutionContext};
use dbcore_exec::plan::{JoinType, PlanNode};
use dbcore_exec::relation::dedup_multiset_eq;
use dbcore_exec::tuple::{ColumnInfo, Tuple, TupleSchema};
use dbcore_exec::value::{Value, ValueType};
use dbcore_exec::EngineConfig;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn left_schema() -> TupleSchema {
    TupleSchema::new(vec![ColumnInfo::new("k", ValueType::Int32), ColumnInfo::new("v", ValueType::String)])
}

fn right_schema() -> TupleSchema {
    TupleSchema::new(vec![ColumnInfo::new("k", ValueType::Int32), ColumnInfo::new("v", ValueType::String)])
}

#[test]
fn hash_join_inner_produces_expected_multiset() {
    let storage = FakeStorage::new()
        .with_table(
            "l",
            vec![
                Tuple::new([Value::I32(1), Value::Str("a".into())]),
                Tuple::new([Value::I32(2), Value::Str("b".into())]),
                Tuple::new([Value::I32(3), Value::Str("c".into())]),
            ],
        )
        .with_table(
            "r",
            vec![
                Tuple::new([Value::I32(1), Value::Str("x".into())]),
                Tuple::new([Value::I32(1), Value::Str("y".into())]),
                Tuple::new([Value::I32(2), Value::Str("z".into())]),
                Tuple::new([Value::I32(4), Value::Str("w".into())]),
            ],
        );
    let ctx = ExecutionContext::new(Arc::new(storage), EngineConfig::default(), 16 * 1024 * 1024);

    let plan = PlanNode::HashJoin {
        left: Box::new(PlanNode::SeqScan {
            table: "l".into(),
            schema: left_schema(),
            filter: None,
        }),
        right: Box::new(PlanNode::SeqScan {
            table: "r".into(),
            schema: right_schema(),
            filter: None,
        }),
        left_keys: vec![Expr::ColumnRef("k".into())],
        right_keys: vec![Expr::ColumnRef("k".into())],
        residual: None,
        join_type: JoinType::Inner,
        build_left: false,
    };

    let mut root = plan.build_operator(&mut 0);
    let result = run_to_result_set(root.as_mut(), &ctx).unwrap();

    let expected = vec![
        Tuple::new([Value::I32(1), Value::Str("a".into()), Value::I32(1), Value::Str("x".into())]),
        Tuple::new([Value::I32(1), Value::Str("a".into()), Value::I32(1), Value::Str("y".into())]),
        Tuple::new([Value::I32(2), Value::Str("b".into()), Value::I32(2), Value::Str("z".into())]),
    ];

    assert_eq!(result.row_count(), 3);
    assert!(dedup_multiset_eq(&result.rows, &expected));

    // Canonical ordering gives `pretty_assertions` a stable, readable
    // diff if the multiset check above ever fails.
    let all_cols: Vec<usize> = (0..expected[0].values.len()).collect();
    let mut actual_sorted = result.rows.clone();
    actual_sorted.sort_by(|a, b| a.canonical_key(&all_cols).cmp(&b.canonical_key(&all_cols)));
    let mut expected_sorted = expected.clone();
    expected_sorted.sort_by(|a, b| a.canonical_key(&all_cols).cmp(&b.canonical_key(&all_cols)));
    assert_eq!(actual_sorted, expected_sorted);
}
