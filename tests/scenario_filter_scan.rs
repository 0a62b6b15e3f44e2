//! Spec §8 Scenario 1: Filter over SeqScan.

mod common;

use common::FakeStorage;
use dbcore_exec::expr::{BinaryOp, Expr};
use dbcore_exec::operator::{run_to_result_set, ExecutionContext};
use dbcore_exec::plan::PlanNode;
use dbcore_exec::tuple::{ColumnInfo, Tuple, TupleSchema};
use dbcore_exec::value::{Value, ValueType};
use dbcore_exec::EngineConfig;
use std::sync::Arc;

fn schema() -> TupleSchema {
    TupleSchema::new(vec![ColumnInfo::new("id", ValueType::Int32), ColumnInfo::new("age", ValueType::Int32)])
}

#[test]
fn filter_over_seq_scan_keeps_rows_matching_predicate() {
    let storage = FakeStorage::new().with_table(
        "t",
        vec![
            Tuple::new([Value::I32(1), Value::I32(10)]),
            Tuple::new([Value::I32(2), Value::I32(20)]),
            Tuple::new([Value::I32(3), Value::I32(30)]),
        ],
    );
    let ctx = ExecutionContext::new(Arc::new(storage), EngineConfig::default(), 16 * 1024 * 1024);

    let plan = PlanNode::Filter {
        child: Box::new(PlanNode::SeqScan {
            table: "t".into(),
            schema: schema(),
            filter: None,
        }),
        predicate: Expr::Binary(
            BinaryOp::Gt,
            Box::new(Expr::ColumnRef("age".into())),
            Box::new(Expr::Literal(Value::I32(15))),
        ),
    };

    let mut root = plan.build_operator(&mut 0);
    let result = run_to_result_set(root.as_mut(), &ctx).unwrap();

    let mut ages: Vec<i32> = result
        .iter()
        .map(|t| match t.get(1) {
            Some(Value::I32(v)) => *v,
            other => panic!("unexpected value {other:?}"),
        })
        .collect();
    ages.sort();
    assert_eq!(ages, vec![20, 30]);
}
