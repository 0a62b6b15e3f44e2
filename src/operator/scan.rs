//! Leaf scan operators (spec §4.1.1).

use super::{ExecutionContext, OperatorKind, PhysicalOperator};
use crate::error::ExecError;
use crate::expr::Expr;
use crate::plan::RangeBound;
use crate::tuple::{Tuple, TupleSchema};
use crate::value::Value;

/// Iterates every page of `table`, deserializing tuples page-at-a-time
/// (pin, emit, unpin) and applying `filter` inline before yield. Rows
/// the storage layer has marked deleted are skipped.
pub struct SeqScan {
    table: String,
    schema: TupleSchema,
    filter: Option<Expr>,
    open: bool,
    failed: bool,
    pages: Vec<u64>,
    page_idx: usize,
    buffered: std::vec::IntoIter<(u64, Tuple, bool)>,
    current_page: Option<u64>,
}

impl SeqScan {
    pub fn new(table: impl Into<String>, schema: TupleSchema, filter: Option<Expr>) -> Self {
        Self {
            table: table.into(),
            schema,
            filter,
            open: false,
            failed: false,
            pages: Vec::new(),
            page_idx: 0,
            buffered: Vec::new().into_iter(),
            current_page: None,
        }
    }

    fn advance_page(&mut self, ctx: &ExecutionContext) -> Result<bool, ExecError> {
        if let Some(p) = self.current_page.take() {
            ctx.storage.unpin(&self.table, p);
        }
        if self.page_idx >= self.pages.len() {
            return Ok(false);
        }
        let page_id = self.pages[self.page_idx];
        self.page_idx += 1;
        ctx.storage.pin(&self.table, page_id);
        self.current_page = Some(page_id);
        let page = ctx
            .storage
            .read_page(&self.table, page_id)
            .map_err(|e| ExecError::UnsupportedExpression(e.to_string()))?;
        self.buffered = page.tuples.into_iter().collect::<Vec<_>>().into_iter();
        Ok(true)
    }
}

impl PhysicalOperator for SeqScan {
    fn kind(&self) -> OperatorKind {
        OperatorKind::SeqScan
    }

    fn estimated_cost(&self) -> f64 {
        self.pages.len().max(1) as f64
    }

    fn schema(&self) -> &TupleSchema {
        &self.schema
    }

    fn open(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        if self.open {
            return Ok(());
        }
        self.pages = ctx
            .storage
            .scan_iterator(&self.table)
            .map_err(|e| ExecError::UnsupportedExpression(e.to_string()))?;
        log::debug!("SeqScan({}) opened over {} pages", self.table, self.pages.len());
        self.page_idx = 0;
        self.buffered = Vec::new().into_iter();
        self.open = true;
        self.failed = false;
        Ok(())
    }

    /// Per spec.md's "after any error, further `next` calls return
    /// `Closed`" contract: any `Err` sticks, turning subsequent calls
    /// into an immediate `OperatorClosed` rather than resuming.
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        if self.failed || !self.open {
            return Err(ExecError::OperatorClosed("SeqScan"));
        }
        let result = self.next_inner(ctx);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn close(&mut self, ctx: &ExecutionContext) {
        if let Some(p) = self.current_page.take() {
            ctx.storage.unpin(&self.table, p);
        }
        self.open = false;
    }
}

impl SeqScan {
    fn next_inner(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        loop {
            ctx.check_cancellation()?;
            match self.buffered.next() {
                Some((row_id, tuple, deleted)) => {
                    if deleted {
                        continue;
                    }
                    if let Some(f) = &self.filter {
                        if !f.eval_predicate(&self.schema, &tuple)? {
                            continue;
                        }
                    }
                    log::trace!("SeqScan({}) yielding row {}", self.table, row_id);
                    return Ok(Some(tuple));
                }
                None => {
                    if !self.advance_page(ctx)? {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

/// Positions a B-tree cursor on the start key and walks in ascending
/// order until the stop key is crossed (spec §4.1.1). Bounds are
/// half-open `[lo, hi)` with explicit inclusivity markers.
pub struct IndexScan {
    table: String,
    index: String,
    schema: TupleSchema,
    lo: Option<Value>,
    lo_bound: RangeBound,
    hi: Option<Value>,
    hi_bound: RangeBound,
    residual_filter: Option<Expr>,
    /// Schema column the index key corresponds to, used to refine the
    /// boundary equalities in [`IndexScan::in_range`].
    key_col: usize,
    open: bool,
    failed: bool,
    row_ids: std::vec::IntoIter<u64>,
}

impl IndexScan {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        table: impl Into<String>,
        index: impl Into<String>,
        schema: TupleSchema,
        key_col: usize,
        lo: Option<Value>,
        lo_bound: RangeBound,
        hi: Option<Value>,
        hi_bound: RangeBound,
        residual_filter: Option<Expr>,
    ) -> Self {
        Self {
            table: table.into(),
            index: index.into(),
            schema,
            key_col,
            lo,
            lo_bound,
            hi,
            hi_bound,
            residual_filter,
            open: false,
            failed: false,
            row_ids: Vec::new().into_iter(),
        }
    }

    /// Refines the half-open bound respecting explicit inclusivity
    /// markers on a key already known to lie within `[lo, hi]`
    /// (`index_range` on the storage collaborator enforces the coarse
    /// bound; this tightens the boundary equalities per spec §4.1.1).
    fn in_range(&self, key: &Value) -> bool {
        if let (Some(lo), false) = (&self.lo, self.lo_bound.inclusive) {
            if key.partial_cmp_sql(lo) == Some(std::cmp::Ordering::Equal) {
                return false;
            }
        }
        if let (Some(hi), false) = (&self.hi, self.hi_bound.inclusive) {
            if key.partial_cmp_sql(hi) == Some(std::cmp::Ordering::Equal) {
                return false;
            }
        }
        true
    }
}

impl PhysicalOperator for IndexScan {
    fn kind(&self) -> OperatorKind {
        OperatorKind::IndexScan
    }

    fn estimated_cost(&self) -> f64 {
        1.0
    }

    fn schema(&self) -> &TupleSchema {
        &self.schema
    }

    fn open(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        if self.open {
            return Ok(());
        }
        let row_ids = ctx
            .storage
            .index_range(&self.table, &self.index, self.lo.as_ref(), self.hi.as_ref())
            .map_err(|e| ExecError::InvalidIndex(self.index.clone(), e.to_string()))?;
        self.row_ids = row_ids.into_iter();
        self.open = true;
        self.failed = false;
        Ok(())
    }

    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        if self.failed || !self.open {
            return Err(ExecError::OperatorClosed("IndexScan"));
        }
        let result = self.next_inner(ctx);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn close(&mut self, _ctx: &ExecutionContext) {
        self.open = false;
    }
}

impl IndexScan {
    fn next_inner(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        while let Some(row_id) = self.row_ids.next() {
            ctx.check_cancellation()?;
            let tuple = ctx
                .storage
                .fetch_row(&self.table, row_id)
                .map_err(|e| ExecError::UnsupportedExpression(e.to_string()))?;
            if let Some(key) = tuple.get(self.key_col) {
                if !self.in_range(key) {
                    continue;
                }
            }
            if let Some(f) = &self.residual_filter {
                if !f.eval_predicate(&self.schema, &tuple)? {
                    continue;
                }
            }
            return Ok(Some(tuple));
        }
        Ok(None)
    }
}
