//! Aggregate operators (spec §4.1.4). Both `HashAggregate` and
//! `SortAggregate` share the same per-group accumulator logic; they
//! differ only in how groups are discovered (materialized map vs.
//! streaming key-change detection over a pre-sorted child).

use super::{ExecutionContext, OperatorKind, PhysicalOperator};
use crate::error::ExecError;
use crate::expr::Expr;
use crate::tuple::{ColumnInfo, Tuple, TupleSchema};
use crate::value::{Value, ValueType};
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    CountStar,
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// One aggregate expression in a `GROUP BY` clause's projection list.
/// `arg` is ignored for `CountStar`.
#[derive(Debug, Clone)]
pub struct AggSpec {
    pub func: AggFunc,
    pub arg: Option<Expr>,
    pub output_name: String,
}

impl AggSpec {
    pub fn count_star(output_name: impl Into<String>) -> Self {
        Self {
            func: AggFunc::CountStar,
            arg: None,
            output_name: output_name.into(),
        }
    }

    pub fn new(func: AggFunc, arg: Expr, output_name: impl Into<String>) -> Self {
        Self {
            func,
            arg: Some(arg),
            output_name: output_name.into(),
        }
    }

    fn output_type(&self) -> ValueType {
        match self.func {
            AggFunc::CountStar | AggFunc::Count => ValueType::Int64,
            AggFunc::Avg => ValueType::Float64,
            // Sum/Min/Max pass the input's declared type through; the
            // planner is responsible for widening Sum to avoid overflow.
            _ => ValueType::Float64,
        }
    }
}

/// Per-group, per-spec running accumulator (spec §4.1.4). `count`
/// tracks non-NULL inputs seen (or all rows for `CountStar`); `sum`
/// accumulates as `f64` regardless of input width to keep AVG/SUM
/// uniform; `min`/`max` retain the original `Value` for output.
#[derive(Debug, Clone, Default)]
struct AggState {
    count: i64,
    sum: f64,
    min: Option<Value>,
    max: Option<Value>,
}

impl AggState {
    fn update(&mut self, func: AggFunc, input: Option<&Value>) {
        match func {
            AggFunc::CountStar => self.count += 1,
            AggFunc::Count => {
                if let Some(v) = input {
                    if !v.is_null() {
                        self.count += 1;
                    }
                }
            }
            AggFunc::Sum | AggFunc::Avg => {
                if let Some(v) = input {
                    if let Some(f) = numeric_as_f64(v) {
                        self.sum += f;
                        self.count += 1;
                    }
                }
            }
            AggFunc::Min => {
                if let Some(v) = input {
                    if !v.is_null() {
                        let take = match &self.min {
                            None => true,
                            Some(cur) => v.partial_cmp_sql(cur) == Some(std::cmp::Ordering::Less),
                        };
                        if take {
                            self.min = Some(v.clone());
                        }
                    }
                }
            }
            AggFunc::Max => {
                if let Some(v) = input {
                    if !v.is_null() {
                        let take = match &self.max {
                            None => true,
                            Some(cur) => v.partial_cmp_sql(cur) == Some(std::cmp::Ordering::Greater),
                        };
                        if take {
                            self.max = Some(v.clone());
                        }
                    }
                }
            }
        }
    }

    /// Finalizes one group's accumulator into its output value. `SUM`
    /// and `AVG` over zero non-NULL inputs yield NULL, matching SQL
    /// aggregate semantics (not zero).
    fn finalize(&self, func: AggFunc) -> Value {
        match func {
            AggFunc::CountStar | AggFunc::Count => Value::I64(self.count),
            AggFunc::Sum => {
                if self.count == 0 {
                    Value::Null
                } else {
                    Value::F64(self.sum)
                }
            }
            AggFunc::Avg => {
                if self.count == 0 {
                    Value::Null
                } else {
                    Value::F64(self.sum / self.count as f64)
                }
            }
            AggFunc::Min => self.min.clone().unwrap_or(Value::Null),
            AggFunc::Max => self.max.clone().unwrap_or(Value::Null),
        }
    }
}

fn numeric_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::I32(n) => Some(*n as f64),
        Value::I64(n) => Some(*n as f64),
        Value::F32(n) => Some(*n as f64),
        Value::F64(n) => Some(*n),
        _ => None,
    }
}

fn group_key(group_keys: &[Expr], schema: &TupleSchema, tuple: &Tuple) -> Result<Vec<u8>, ExecError> {
    let mut buf = Vec::new();
    for e in group_keys {
        let v = e.eval(schema, tuple)?;
        buf.extend_from_slice(&v.canonical_bytes());
        buf.push(0xff);
    }
    Ok(buf)
}

fn out_schema(group_keys: &[Expr], aggs: &[AggSpec], child_schema: &TupleSchema) -> TupleSchema {
    let mut cols = Vec::with_capacity(group_keys.len() + aggs.len());
    for (i, k) in group_keys.iter().enumerate() {
        let ty = match k {
            Expr::ColumnRef(name) => child_schema
                .index_of(name)
                .map(|idx| child_schema.columns()[idx].ty)
                .unwrap_or(ValueType::Null),
            _ => ValueType::Null,
        };
        cols.push(ColumnInfo::new(format!("group_{i}"), ty));
    }
    for a in aggs {
        cols.push(ColumnInfo::new(a.output_name.clone(), a.output_type()));
    }
    TupleSchema::new(cols)
}

struct Group {
    key_values: Vec<Value>,
    states: Vec<AggState>,
}

impl Group {
    fn new(key_values: Vec<Value>, n_aggs: usize) -> Self {
        Self {
            key_values,
            states: vec![AggState::default(); n_aggs],
        }
    }

    fn update(&mut self, aggs: &[AggSpec], schema: &TupleSchema, tuple: &Tuple) -> Result<(), ExecError> {
        for (state, spec) in self.states.iter_mut().zip(aggs) {
            let input = match &spec.arg {
                Some(e) => Some(e.eval(schema, tuple)?),
                None => None,
            };
            state.update(spec.func, input.as_ref());
        }
        Ok(())
    }

    fn finalize(&self, aggs: &[AggSpec]) -> Tuple {
        let mut values = self.key_values.clone();
        for (state, spec) in self.states.iter().zip(aggs) {
            values.push(state.finalize(spec.func));
        }
        Tuple::new(values)
    }
}

/// Drains `child` entirely, upserting into a group map keyed by the
/// canonical encoding of `group_keys`, then emits one row per group in
/// arbitrary (hash-bucket) order (spec §4.1.4). With zero group keys
/// this degenerates to a single scalar aggregate group, always emitted
/// even over an empty child (e.g. `COUNT(*)` over no rows is 0, not
/// no rows).
///
/// Memory is budgeted the same way as [`super::join::HashJoin`]'s
/// build side: each new group reserves an estimated size against
/// `ExecutionContext`, surfacing `InsufficientMemory` rather than
/// spilling partial groups to disk.
pub struct HashAggregate {
    child: Box<dyn PhysicalOperator>,
    group_keys: Vec<Expr>,
    aggs: Vec<AggSpec>,
    out_schema: TupleSchema,

    groups: IndexMap<Vec<u8>, Group>,
    bytes_reserved: usize,
    built: bool,
    emit_cursor: usize,
    failed: bool,
}

impl HashAggregate {
    pub fn new(child: Box<dyn PhysicalOperator>, group_keys: Vec<Expr>, aggs: Vec<AggSpec>) -> Self {
        let out_schema = out_schema(&group_keys, &aggs, child.schema());
        Self {
            child,
            group_keys,
            aggs,
            out_schema,
            groups: IndexMap::new(),
            bytes_reserved: 0,
            built: false,
            emit_cursor: 0,
            failed: false,
        }
    }

    fn build(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        if self.built {
            return Ok(());
        }
        self.child.open(ctx)?;
        while let Some(tuple) = self.child.next(ctx)? {
            ctx.check_cancellation()?;
            let key = group_key(&self.group_keys, self.child.schema(), &tuple)?;
            if !self.groups.contains_key(&key) {
                let key_values = self
                    .group_keys
                    .iter()
                    .map(|e| e.eval(self.child.schema(), &tuple))
                    .collect::<Result<Vec<_>, _>>()?;
                let entry_size = std::mem::size_of::<Group>() + key.len();
                ctx.allocate_memory(entry_size)?;
                self.bytes_reserved += entry_size;
                self.groups.insert(key.clone(), Group::new(key_values, self.aggs.len()));
            }
            self.groups.get_mut(&key).unwrap().update(&self.aggs, self.child.schema(), &tuple)?;
        }
        self.child.close(ctx);
        if self.group_keys.is_empty() && self.groups.is_empty() {
            self.groups.insert(Vec::new(), Group::new(Vec::new(), self.aggs.len()));
        }
        self.built = true;
        Ok(())
    }
}

impl PhysicalOperator for HashAggregate {
    fn kind(&self) -> OperatorKind {
        OperatorKind::HashAggregate
    }

    fn estimated_cost(&self) -> f64 {
        self.child.estimated_cost()
    }

    fn schema(&self) -> &TupleSchema {
        &self.out_schema
    }

    fn open(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        self.failed = false;
        self.build(ctx)
    }

    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        if self.failed {
            return Err(ExecError::OperatorClosed("HashAggregate"));
        }
        let result = self.next_inner(ctx);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn close(&mut self, ctx: &ExecutionContext) {
        if self.built {
            ctx.release_memory(self.bytes_reserved);
        }
    }
}

impl HashAggregate {
    fn next_inner(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        ctx.check_cancellation()?;
        if self.emit_cursor >= self.groups.len() {
            return Ok(None);
        }
        let (_, group) = self.groups.get_index(self.emit_cursor).unwrap();
        self.emit_cursor += 1;
        Ok(Some(group.finalize(&self.aggs)))
    }
}

/// Streams over a `child` already sorted on `group_keys`; a change in
/// the group key finalizes and emits the prior group before starting a
/// new one, and EOF finalizes whatever group is in flight (spec
/// §4.1.4). Unlike `HashAggregate`, memory use is O(1) in the number
/// of groups.
pub struct SortAggregate {
    child: Box<dyn PhysicalOperator>,
    group_keys: Vec<Expr>,
    aggs: Vec<AggSpec>,
    out_schema: TupleSchema,

    current: Option<(Vec<u8>, Group)>,
    child_done: bool,
    failed: bool,
}

impl SortAggregate {
    pub fn new(child: Box<dyn PhysicalOperator>, group_keys: Vec<Expr>, aggs: Vec<AggSpec>) -> Self {
        let out_schema = out_schema(&group_keys, &aggs, child.schema());
        Self {
            child,
            group_keys,
            aggs,
            out_schema,
            current: None,
            child_done: false,
            failed: false,
        }
    }
}

impl PhysicalOperator for SortAggregate {
    fn kind(&self) -> OperatorKind {
        OperatorKind::SortAggregate
    }

    fn estimated_cost(&self) -> f64 {
        self.child.estimated_cost()
    }

    fn schema(&self) -> &TupleSchema {
        &self.out_schema
    }

    fn open(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        self.child.open(ctx)?;
        self.current = None;
        self.child_done = false;
        self.failed = false;
        Ok(())
    }

    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        if self.failed {
            return Err(ExecError::OperatorClosed("SortAggregate"));
        }
        let result = self.next_inner(ctx);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn close(&mut self, ctx: &ExecutionContext) {
        self.child.close(ctx);
    }
}

impl SortAggregate {
    fn next_inner(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        loop {
            ctx.check_cancellation()?;
            if self.child_done {
                return Ok(self.current.take().map(|(_, g)| g.finalize(&self.aggs)));
            }
            match self.child.next(ctx)? {
                Some(tuple) => {
                    let key = group_key(&self.group_keys, self.child.schema(), &tuple)?;
                    let same_group = self.current.as_ref().map(|(k, _)| k == &key).unwrap_or(false);
                    if !same_group {
                        let finished = self.current.take();
                        let key_values = self
                            .group_keys
                            .iter()
                            .map(|e| e.eval(self.child.schema(), &tuple))
                            .collect::<Result<Vec<_>, _>>()?;
                        let mut group = Group::new(key_values, self.aggs.len());
                        group.update(&self.aggs, self.child.schema(), &tuple)?;
                        self.current = Some((key, group));
                        if let Some((_, g)) = finished {
                            return Ok(Some(g.finalize(&self.aggs)));
                        }
                    } else if let Some((_, g)) = self.current.as_mut() {
                        g.update(&self.aggs, self.child.schema(), &tuple)?;
                    }
                }
                None => {
                    self.child_done = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::scan::SeqScan;
    use crate::operator::test_support::{test_ctx, MemStorage};

    fn schema() -> TupleSchema {
        TupleSchema::new(vec![
            ColumnInfo::new("dept", ValueType::String),
            ColumnInfo::new("salary", ValueType::Int32),
        ])
    }

    /// Spec §8 Scenario 3: `HashAggregate` grouping on `dept` with a
    /// NULL salary contributing to COUNT(*) but not to SUM/AVG.
    #[test]
    fn hash_aggregate_excludes_null_from_sum_scenario_3() {
        let rows = vec![
            Tuple::new([Value::Str("eng".into()), Value::I32(100)]),
            Tuple::new([Value::Str("eng".into()), Value::Null]),
            Tuple::new([Value::Str("eng".into()), Value::I32(200)]),
            Tuple::new([Value::Str("sales".into()), Value::I32(50)]),
        ];
        let storage = MemStorage::new().with_table("t", rows);
        let ctx = test_ctx(storage);
        let scan = SeqScan::new("t", schema(), None);
        let aggs = vec![
            AggSpec::count_star("n"),
            AggSpec::new(AggFunc::Sum, Expr::ColumnRef("salary".into()), "total"),
        ];
        let mut agg = HashAggregate::new(Box::new(scan), vec![Expr::ColumnRef("dept".into())], aggs);
        let result = super::super::run_to_result_set(&mut agg, &ctx).unwrap();
        assert_eq!(result.row_count(), 2);
        let eng = result.rows.iter().find(|t| t.values[0] == Value::Str("eng".into())).unwrap();
        assert_eq!(eng.values[1], Value::I64(3));
        assert_eq!(eng.values[2], Value::F64(300.0));
    }

    #[test]
    fn hash_aggregate_scalar_over_empty_child_emits_zero() {
        let storage = MemStorage::new().with_table("t", Vec::new());
        let ctx = test_ctx(storage);
        let scan = SeqScan::new("t", schema(), None);
        let mut agg = HashAggregate::new(Box::new(scan), Vec::new(), vec![AggSpec::count_star("n")]);
        let result = super::super::run_to_result_set(&mut agg, &ctx).unwrap();
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.rows[0].values[0], Value::I64(0));
    }

    #[test]
    fn sort_aggregate_streams_by_key_change() {
        let rows = vec![
            Tuple::new([Value::Str("eng".into()), Value::I32(100)]),
            Tuple::new([Value::Str("eng".into()), Value::I32(200)]),
            Tuple::new([Value::Str("sales".into()), Value::I32(50)]),
        ];
        let storage = MemStorage::new().with_table("t", rows);
        let ctx = test_ctx(storage);
        let scan = SeqScan::new("t", schema(), None);
        let aggs = vec![AggSpec::new(AggFunc::Sum, Expr::ColumnRef("salary".into()), "total")];
        let mut agg = SortAggregate::new(Box::new(scan), vec![Expr::ColumnRef("dept".into())], aggs);
        let result = super::super::run_to_result_set(&mut agg, &ctx).unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.rows[0].values[1], Value::F64(300.0));
        assert_eq!(result.rows[1].values[1], Value::F64(50.0));
    }
}
