//! Property tests for `HashAggregate` (spec §8 "round-trip /
//! idempotence laws": grouped aggregates are invariant under any
//! permutation of the input rows, and match a naive reference
//! computed independently of the operator).

mod common;

use common::FakeStorage;
use dbcore_exec::expr::Expr;
use dbcore_exec::operator::aggregate::{AggFunc, AggSpec};
use dbcore_exec::operator::{run_to_result_set, ExecutionContext};
use dbcore_exec::plan::PlanNode;
use dbcore_exec::tuple::{ColumnInfo, Tuple, TupleSchema};
use dbcore_exec::value::{Value, ValueType};
use dbcore_exec::EngineConfig;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

fn schema() -> TupleSchema {
    TupleSchema::new(vec![ColumnInfo::new("c1", ValueType::Int32), ColumnInfo::new("c2", ValueType::Int32)])
}

fn run_aggregate(rows: &[(Option<i32>, i32)]) -> HashMap<Option<i32>, (i64, f64)> {
    let tuples: Vec<Tuple> = rows
        .iter()
        .map(|(k, v)| Tuple::new([k.map(Value::I32).unwrap_or(Value::Null), Value::I32(*v)]))
        .collect();
    let storage = FakeStorage::new().with_table("t", tuples);
    let ctx = ExecutionContext::new(Arc::new(storage), EngineConfig::default(), 16 * 1024 * 1024);

    let plan = PlanNode::HashAggregate {
        child: Box::new(PlanNode::SeqScan {
            table: "t".into(),
            schema: schema(),
            filter: None,
        }),
        group_keys: vec![Expr::ColumnRef("c1".into())],
        aggs: vec![
            AggSpec::count_star("cnt"),
            AggSpec::new(AggFunc::Sum, Expr::ColumnRef("c2".into()), "sum_c2"),
        ],
        out_schema: TupleSchema::new(vec![
            ColumnInfo::new("c1", ValueType::Int32),
            ColumnInfo::new("cnt", ValueType::Int64),
            ColumnInfo::new("sum_c2", ValueType::Float64),
        ]),
    };

    let mut root = plan.build_operator(&mut 0);
    let result = run_to_result_set(root.as_mut(), &ctx).unwrap();

    result
        .iter()
        .map(|t| {
            let key = match t.get(0) {
                Some(Value::I32(v)) => Some(*v),
                Some(Value::Null) => None,
                other => panic!("unexpected group key {other:?}"),
            };
            let count = match t.get(1) {
                Some(Value::I64(v)) => *v,
                other => panic!("unexpected count {other:?}"),
            };
            let sum = match t.get(2) {
                Some(Value::F64(v)) => *v,
                other => panic!("unexpected sum {other:?}"),
            };
            (key, (count, sum))
        })
        .collect()
}

fn reference_groups(rows: &[(Option<i32>, i32)]) -> HashMap<Option<i32>, (i64, f64)> {
    let mut groups: HashMap<Option<i32>, (i64, f64)> = HashMap::new();
    for (key, value) in rows {
        let entry = groups.entry(*key).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += *value as f64;
    }
    groups
}

proptest! {
    #[test]
    fn hash_aggregate_matches_a_naive_grouping(
        rows in prop::collection::vec(
            (proptest::option::of(-8i32..8), -1000i32..1000),
            0..64,
        )
    ) {
        let actual = run_aggregate(&rows);
        let expected = reference_groups(&rows);
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn hash_aggregate_is_invariant_under_row_order(
        rows in prop::collection::vec(
            (proptest::option::of(-8i32..8), -1000i32..1000),
            0..64,
        )
    ) {
        let forward = run_aggregate(&rows);
        let reversed: Vec<(Option<i32>, i32)> = rows.iter().rev().copied().collect();
        let backward = run_aggregate(&reversed);
        prop_assert_eq!(forward, backward);
    }
}
