//! Spec §8 Scenario 3: HashAggregate with NULL group keys.

mod common;

use common::FakeStorage;
use dbcore_exec::expr::Expr;
use dbcore_exec::operator::aggregate::{AggFunc, AggSpec};
use dbcore_exec::operator::{run_to_result_set, ExecutionContext};
use dbcore_exec::plan::PlanNode;
use dbcore_exec::tuple::{ColumnInfo, Tuple, TupleSchema};
use dbcore_exec::value::{Value, ValueType};
use dbcore_exec::EngineConfig;
use std::collections::HashSet;
use std::sync::Arc;

fn schema() -> TupleSchema {
    TupleSchema::new(vec![ColumnInfo::new("c1", ValueType::Int32), ColumnInfo::new("c2", ValueType::Int32)])
}

#[test]
fn hash_aggregate_groups_nulls_and_sums_correctly() {
    let storage = FakeStorage::new().with_table(
        "t",
        vec![
            Tuple::new([Value::Null, Value::I32(10)]),
            Tuple::new([Value::I32(1), Value::I32(20)]),
            Tuple::new([Value::I32(1), Value::Null]),
            Tuple::new([Value::I32(2), Value::I32(30)]),
        ],
    );
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
    assert_eq!(result.row_count(), 3);

    let groups: HashSet<(Option<i32>, i64)> = result
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
            (key, count)
        })
        .collect();

    let expected: HashSet<(Option<i32>, i64)> = [(None, 1), (Some(1), 2), (Some(2), 1)].into_iter().collect();
    assert_eq!(groups, expected);
}
