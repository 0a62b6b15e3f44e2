//! Single-child pipeline operators (spec §4.1.2).

use super::{ExecutionContext, OperatorKind, PhysicalOperator};
use crate::error::ExecError;
use crate::expr::Expr;
use crate::tuple::{Tuple, TupleSchema};

/// Pulls from `child`; evaluates `predicate` to a three-valued result
/// and yields only True. Unknown is treated as False (spec §4.1.2).
pub struct Filter {
    child: Box<dyn PhysicalOperator>,
    predicate: Expr,
    failed: bool,
}

impl Filter {
    pub fn new(child: Box<dyn PhysicalOperator>, predicate: Expr) -> Self {
        Self {
            child,
            predicate,
            failed: false,
        }
    }

    fn next_inner(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        loop {
            ctx.check_cancellation()?;
            match self.child.next(ctx)? {
                Some(t) => {
                    if self.predicate.eval_predicate(self.child.schema(), &t)? {
                        return Ok(Some(t));
                    }
                }
                None => return Ok(None),
            }
        }
    }
}

impl PhysicalOperator for Filter {
    fn kind(&self) -> OperatorKind {
        OperatorKind::Filter
    }

    fn estimated_cost(&self) -> f64 {
        self.child.estimated_cost()
    }

    fn schema(&self) -> &TupleSchema {
        self.child.schema()
    }

    fn open(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        self.failed = false;
        self.child.open(ctx)
    }

    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        if self.failed {
            return Err(ExecError::OperatorClosed("Filter"));
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

/// Pulls from `child`; evaluates each expression left-to-right within a
/// row and constructs a new tuple under `out_schema` (spec §4.1.2).
pub struct Project {
    child: Box<dyn PhysicalOperator>,
    exprs: Vec<Expr>,
    out_schema: TupleSchema,
    failed: bool,
}

impl Project {
    pub fn new(child: Box<dyn PhysicalOperator>, exprs: Vec<Expr>, out_schema: TupleSchema) -> Self {
        Self {
            child,
            exprs,
            out_schema,
            failed: false,
        }
    }

    fn next_inner(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        ctx.check_cancellation()?;
        match self.child.next(ctx)? {
            Some(t) => {
                let mut values = Vec::with_capacity(self.exprs.len());
                for e in &self.exprs {
                    values.push(e.eval(self.child.schema(), &t)?);
                }
                Ok(Some(Tuple::new(values)))
            }
            None => Ok(None),
        }
    }
}

impl PhysicalOperator for Project {
    fn kind(&self) -> OperatorKind {
        OperatorKind::Project
    }

    fn estimated_cost(&self) -> f64 {
        self.child.estimated_cost()
    }

    fn schema(&self) -> &TupleSchema {
        &self.out_schema
    }

    fn open(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        self.failed = false;
        self.child.open(ctx)
    }

    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        if self.failed {
            return Err(ExecError::OperatorClosed("Project"));
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

/// First skips `offset` tuples (each pulled then discarded); then
/// yields up to `limit` tuples; then closes `child` early and signals
/// EOF. `limit = 0` yields nothing; `limit < 0` is unbounded (spec §4.1.2).
pub struct Limit {
    child: Box<dyn PhysicalOperator>,
    limit: i64,
    offset: i64,
    skipped: i64,
    emitted: i64,
    done: bool,
    failed: bool,
}

impl Limit {
    pub fn new(child: Box<dyn PhysicalOperator>, limit: i64, offset: i64) -> Self {
        Self {
            child,
            limit,
            offset,
            skipped: 0,
            emitted: 0,
            done: false,
            failed: false,
        }
    }

    fn next_inner(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        while self.skipped < self.offset {
            ctx.check_cancellation()?;
            match self.child.next(ctx)? {
                Some(_) => self.skipped += 1,
                None => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }
        if self.limit > 0 && self.emitted >= self.limit {
            self.done = true;
            self.child.close(ctx);
            return Ok(None);
        }
        ctx.check_cancellation()?;
        match self.child.next(ctx)? {
            Some(t) => {
                self.emitted += 1;
                if self.limit > 0 && self.emitted >= self.limit {
                    self.done = true;
                    self.child.close(ctx);
                }
                Ok(Some(t))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

impl PhysicalOperator for Limit {
    fn kind(&self) -> OperatorKind {
        OperatorKind::Limit
    }

    fn estimated_cost(&self) -> f64 {
        self.child.estimated_cost()
    }

    fn schema(&self) -> &TupleSchema {
        self.child.schema()
    }

    fn open(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        self.failed = false;
        self.child.open(ctx)
    }

    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        if self.failed {
            return Err(ExecError::OperatorClosed("Limit"));
        }
        if self.done || self.limit == 0 {
            return Ok(None);
        }
        let result = self.next_inner(ctx);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn close(&mut self, ctx: &ExecutionContext) {
        self.child.close(ctx);
        self.done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::scan::SeqScan;
    use crate::operator::test_support::{test_ctx, MemStorage};
    use crate::tuple::ColumnInfo;
    use crate::value::{Value, ValueType};

    fn schema() -> TupleSchema {
        TupleSchema::new(vec![
            ColumnInfo::new("id", ValueType::Int32),
            ColumnInfo::new("age", ValueType::Int32),
        ])
    }

    fn rows() -> Vec<Tuple> {
        vec![
            Tuple::new([Value::I32(1), Value::I32(10)]),
            Tuple::new([Value::I32(2), Value::I32(20)]),
            Tuple::new([Value::I32(3), Value::I32(30)]),
        ]
    }

    #[test]
    fn filter_over_seqscan_scenario_1() {
        let storage = MemStorage::new().with_table("t", rows());
        let ctx = test_ctx(storage);
        let scan = SeqScan::new("t", schema(), None);
        let pred = Expr::Binary(
            crate::expr::BinaryOp::Gt,
            Box::new(Expr::ColumnRef("age".into())),
            Box::new(Expr::Literal(Value::I32(15))),
        );
        let mut filter = Filter::new(Box::new(scan), pred);
        let result = super::super::run_to_result_set(&mut filter, &ctx).unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.rows[0].values[1], Value::I32(20));
        assert_eq!(result.rows[1].values[1], Value::I32(30));
    }

    #[test]
    fn limit_zero_yields_nothing() {
        let storage = MemStorage::new().with_table("t", rows());
        let ctx = test_ctx(storage);
        let scan = SeqScan::new("t", schema(), None);
        let mut limit = Limit::new(Box::new(scan), 0, 0);
        let result = super::super::run_to_result_set(&mut limit, &ctx).unwrap();
        assert_eq!(result.row_count(), 0);
    }

    #[test]
    fn limit_with_offset_skips_then_bounds() {
        let storage = MemStorage::new().with_table("t", rows());
        let ctx = test_ctx(storage);
        let scan = SeqScan::new("t", schema(), None);
        let mut limit = Limit::new(Box::new(scan), 1, 1);
        let result = super::super::run_to_result_set(&mut limit, &ctx).unwrap();
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.rows[0].values[0], Value::I32(2));
    }
}
