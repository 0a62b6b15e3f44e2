//! Spec §8 Scenario 6: Sort with nulls-first ascending ordering.

mod common;

use common::FakeStorage;
use dbcore_exec::expr::Expr;
use dbcore_exec::operator::{run_to_result_set, ExecutionContext};
use dbcore_exec::plan::{PlanNode, SortDirection, SortKey};
use dbcore_exec::tuple::{ColumnInfo, Tuple, TupleSchema};
use dbcore_exec::value::{Value, ValueType};
use dbcore_exec::EngineConfig;
use std::sync::Arc;

fn schema() -> TupleSchema {
    TupleSchema::new(vec![ColumnInfo::new("c1", ValueType::Int32)])
}

#[test]
fn sort_asc_nulls_first_orders_nulls_before_values() {
    let storage = FakeStorage::new().with_table(
        "t",
        vec![
            Tuple::new([Value::I32(3)]),
            Tuple::new([Value::Null]),
            Tuple::new([Value::I32(1)]),
            Tuple::new([Value::I32(2)]),
            Tuple::new([Value::Null]),
        ],
    );
    let ctx = ExecutionContext::new(Arc::new(storage), EngineConfig::default(), 16 * 1024 * 1024);

    let plan = PlanNode::Sort {
        child: Box::new(PlanNode::SeqScan {
            table: "t".into(),
            schema: schema(),
            filter: None,
        }),
        keys: vec![SortKey {
            expr: Expr::ColumnRef("c1".into()),
            direction: SortDirection::Asc,
            nulls_first: true,
        }],
    };

    let mut root = plan.build_operator(&mut 0);
    let result = run_to_result_set(root.as_mut(), &ctx).unwrap();

    let values: Vec<Option<i32>> = result
        .iter()
        .map(|t| match t.get(0) {
            Some(Value::I32(v)) => Some(*v),
            Some(Value::Null) => None,
            other => panic!("unexpected value {other:?}"),
        })
        .collect();

    assert_eq!(values, vec![None, None, Some(1), Some(2), Some(3)]);
}
