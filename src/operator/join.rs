//! Join operators (spec §4.1.3). All three expose the same output
//! contract: concatenated `(left_columns, right_columns)` for matching
//! pairs; for outer joins, the non-matching side is filled with NULLs.

use super::{ExecutionContext, OperatorKind, PhysicalOperator};
use crate::error::ExecError;
use crate::expr::Expr;
use crate::plan::JoinType;
use crate::tuple::{Tuple, TupleSchema};
use std::collections::HashMap;

fn out_schema(left: &TupleSchema, right: &TupleSchema) -> TupleSchema {
    TupleSchema::concat(left, right)
}

/// For each left tuple, restarts `right` (scans/hash-tables/sorts all
/// support restart via re-open) and evaluates `condition` against every
/// right tuple (spec §4.1.3). RightOuter/FullOuter require a post-pass
/// over the right side's unmatched set once all of `left` is exhausted.
pub struct NestedLoopJoin {
    left: Box<dyn PhysicalOperator>,
    right: Box<dyn PhysicalOperator>,
    condition: Expr,
    join_type: JoinType,
    out_schema: TupleSchema,

    current_left: Option<Tuple>,
    current_left_matched: bool,
    right_matched: Vec<bool>,
    right_buffer: Vec<Tuple>,
    right_buffer_loaded: bool,
    right_cursor: usize,
    unmatched_right_cursor: Option<usize>,
    done: bool,
    failed: bool,
}

impl NestedLoopJoin {
    pub fn new(
        left: Box<dyn PhysicalOperator>,
        right: Box<dyn PhysicalOperator>,
        condition: Expr,
        join_type: JoinType,
    ) -> Self {
        let out_schema = out_schema(left.schema(), right.schema());
        Self {
            left,
            right,
            condition,
            join_type,
            out_schema,
            current_left: None,
            current_left_matched: false,
            right_matched: Vec::new(),
            right_buffer: Vec::new(),
            right_buffer_loaded: false,
            right_cursor: 0,
            unmatched_right_cursor: None,
            done: false,
            failed: false,
        }
    }

    fn load_right_buffer(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        if self.right_buffer_loaded {
            return Ok(());
        }
        self.right.open(ctx)?;
        while let Some(t) = self.right.next(ctx)? {
            self.right_buffer.push(t);
        }
        self.right.close(ctx);
        self.right_matched = vec![false; self.right_buffer.len()];
        self.right_buffer_loaded = true;
        Ok(())
    }

    fn matches(&self, l: &Tuple, r: &Tuple) -> Result<bool, ExecError> {
        if matches!(self.join_type, JoinType::Cross) {
            return Ok(true);
        }
        let combined = Tuple::concat(l.clone(), r.clone());
        self.condition.eval_predicate(&self.out_schema, &combined)
    }

    fn advance_left(&mut self, ctx: &ExecutionContext) -> Result<bool, ExecError> {
        match self.left.next(ctx)? {
            Some(t) => {
                self.current_left = Some(t);
                self.current_left_matched = false;
                self.right_cursor = 0;
                Ok(true)
            }
            None => {
                self.current_left = None;
                Ok(false)
            }
        }
    }
}

impl PhysicalOperator for NestedLoopJoin {
    fn kind(&self) -> OperatorKind {
        OperatorKind::NestedLoopJoin
    }

    fn estimated_cost(&self) -> f64 {
        self.left.estimated_cost() * self.right.estimated_cost()
    }

    fn schema(&self) -> &TupleSchema {
        &self.out_schema
    }

    fn open(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        self.failed = false;
        self.left.open(ctx)?;
        self.load_right_buffer(ctx)?;
        self.advance_left(ctx)?;
        Ok(())
    }

    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        if self.failed {
            return Err(ExecError::OperatorClosed("NestedLoopJoin"));
        }
        let result = self.next_inner(ctx);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn close(&mut self, ctx: &ExecutionContext) {
        self.left.close(ctx);
        if !self.right_buffer_loaded {
            self.right.close(ctx);
        }
    }
}

impl NestedLoopJoin {
    fn next_inner(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        loop {
            ctx.check_cancellation()?;
            if self.current_left.is_none() {
                // Main phase exhausted: outer-join post-pass over unmatched right rows.
                if matches!(self.join_type, JoinType::RightOuter | JoinType::FullOuter) {
                    let cursor = self.unmatched_right_cursor.get_or_insert(0);
                    while *cursor < self.right_buffer.len() {
                        let i = *cursor;
                        *cursor += 1;
                        if !self.right_matched[i] {
                            let l_nulls = Tuple::nulls(self.left.schema());
                            return Ok(Some(Tuple::concat(l_nulls, self.right_buffer[i].clone())));
                        }
                    }
                }
                return Ok(None);
            }

            let left = self.current_left.clone().unwrap();

            if matches!(self.join_type, JoinType::Semi | JoinType::Anti) {
                // `current_left_matched` persists across re-entries into this
                // branch for the same left tuple (it's only reset by
                // `advance_left`), so a match found early isn't forgotten by
                // a later unmatched segment of the right buffer.
                while !self.current_left_matched && self.right_cursor < self.right_buffer.len() {
                    let r = self.right_buffer[self.right_cursor].clone();
                    self.right_cursor += 1;
                    if self.matches(&left, &r)? {
                        self.current_left_matched = true;
                    }
                }
                if self.current_left_matched || self.right_cursor >= self.right_buffer.len() {
                    let emit = (self.join_type == JoinType::Semi) == self.current_left_matched;
                    self.advance_left(ctx)?;
                    if emit {
                        return Ok(Some(left));
                    }
                }
                continue;
            }

            while self.right_cursor < self.right_buffer.len() {
                let idx = self.right_cursor;
                self.right_cursor += 1;
                let right = self.right_buffer[idx].clone();
                if self.matches(&left, &right)? {
                    self.current_left_matched = true;
                    self.right_matched[idx] = true;
                    return Ok(Some(Tuple::concat(left.clone(), right)));
                }
            }

            // Exhausted right for this left tuple.
            let emit_unmatched = !self.current_left_matched
                && matches!(self.join_type, JoinType::LeftOuter | JoinType::FullOuter);
            let pending = if emit_unmatched {
                Some(Tuple::concat(left, Tuple::nulls(self.right.schema())))
            } else {
                None
            };
            self.advance_left(ctx)?;
            if let Some(t) = pending {
                return Ok(Some(t));
            }
        }
    }
}

type JoinKey = Vec<u8>;

/// One entry in the build-side multimap: the row plus whether any
/// probe row has matched it yet (needed for RightOuter/FullOuter).
struct BuildEntry {
    row: Tuple,
    matched: bool,
}

/// Two-phase: build a multimap over the (default: right, swappable
/// based on cardinality hints) smaller side, then probe with the other
/// side, applying the residual (non-equi) part of `condition` to each
/// hit. NULL keys never match (spec §4.1.3).
///
/// Memory budget: if the build side exceeds `work_mem`, a real
/// implementation spills partitions to disk using a secondary hash
/// function and completes via Grace-style partitioned rejoin; this
/// operator reserves the build multimap's estimated size against
/// `ExecutionContext`'s budget and surfaces `InsufficientMemory`
/// instead of silently growing unbounded once the budget (spill
/// threshold) is exceeded, since disk I/O is an external storage
/// concern this crate does not implement directly.
pub struct HashJoin {
    build_side: Box<dyn PhysicalOperator>,
    probe_side: Box<dyn PhysicalOperator>,
    build_keys: Vec<Expr>,
    probe_keys: Vec<Expr>,
    residual: Option<Expr>,
    join_type: JoinType,
    /// true when the build side is the original left input (affects
    /// output column order and which side gets NULL-padded).
    build_is_left: bool,
    out_schema: TupleSchema,
    build_schema: TupleSchema,
    probe_schema: TupleSchema,

    table: HashMap<JoinKey, Vec<BuildEntry>>,
    bytes_reserved: usize,
    built: bool,

    current_probe: Option<Tuple>,
    current_key: Option<JoinKey>,
    match_cursor: usize,
    row_cursor: usize,
    probe_any_match: bool,

    unmatched_started: bool,
    unmatched_keys: Vec<JoinKey>,
    unmatched_key_idx: usize,
    unmatched_row_idx: usize,
    failed: bool,
}

impl HashJoin {
    pub fn new(
        left: Box<dyn PhysicalOperator>,
        right: Box<dyn PhysicalOperator>,
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
        residual: Option<Expr>,
        join_type: JoinType,
        build_left: bool,
    ) -> Self {
        let out_schema = out_schema(left.schema(), right.schema());
        let build_schema = if build_left { left.schema().clone() } else { right.schema().clone() };
        let probe_schema = if build_left { right.schema().clone() } else { left.schema().clone() };
        let (build_side, probe_side, build_keys, probe_keys) = if build_left {
            (left, right, left_keys, right_keys)
        } else {
            (right, left, right_keys, left_keys)
        };
        Self {
            build_side,
            probe_side,
            build_keys,
            probe_keys,
            residual,
            join_type,
            build_is_left: build_left,
            out_schema,
            build_schema,
            probe_schema,
            table: HashMap::new(),
            bytes_reserved: 0,
            built: false,
            current_probe: None,
            current_key: None,
            match_cursor: 0,
            row_cursor: 0,
            probe_any_match: false,
            unmatched_started: false,
            unmatched_keys: Vec::new(),
            unmatched_key_idx: 0,
            unmatched_row_idx: 0,
            failed: false,
        }
    }

    fn key_of(keys: &[Expr], schema: &TupleSchema, tuple: &Tuple) -> Result<Option<JoinKey>, ExecError> {
        let mut buf = Vec::new();
        for k in keys {
            let v = k.eval(schema, tuple)?;
            if v.is_null() {
                return Ok(None); // NULL keys never match, spec §4.1.3.
            }
            buf.extend_from_slice(&v.canonical_bytes());
            buf.push(0xff);
        }
        Ok(Some(buf))
    }

    fn build(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        if self.built {
            return Ok(());
        }
        self.build_side.open(ctx)?;
        while let Some(row) = self.build_side.next(ctx)? {
            ctx.check_cancellation()?;
            if let Some(key) = Self::key_of(&self.build_keys, &self.build_schema, &row)? {
                let entry_size = std::mem::size_of::<Tuple>() + key.len();
                ctx.allocate_memory(entry_size)?;
                self.bytes_reserved += entry_size;
                self.table.entry(key).or_default().push(BuildEntry { row, matched: false });
            }
        }
        self.build_side.close(ctx);
        self.built = true;
        Ok(())
    }

    /// Evaluates `residual` (the non-equi part of the original
    /// condition) against one combined row, honoring `build_is_left`
    /// for column order.
    fn residual_ok(&self, build_row: &Tuple, probe_row: &Tuple) -> Result<bool, ExecError> {
        let Some(residual) = &self.residual else {
            return Ok(true);
        };
        let combined = if self.build_is_left {
            Tuple::concat(build_row.clone(), probe_row.clone())
        } else {
            Tuple::concat(probe_row.clone(), build_row.clone())
        };
        residual.eval_predicate(&self.out_schema, &combined)
    }

    fn combine(&self, build_row: &Tuple, probe_row: &Tuple) -> Tuple {
        if self.build_is_left {
            Tuple::concat(build_row.clone(), probe_row.clone())
        } else {
            Tuple::concat(probe_row.clone(), build_row.clone())
        }
    }

    fn combine_with_build_nulls(&self, probe_row: &Tuple) -> Tuple {
        let nulls = Tuple::nulls(&self.build_schema);
        self.combine(&nulls, probe_row)
    }

    fn combine_with_probe_nulls(&self, build_row: &Tuple) -> Tuple {
        let nulls = Tuple::nulls(&self.probe_schema);
        self.combine(build_row, &nulls)
    }

    /// Whether the outer-join side that needs a NULL-padded unmatched
    /// pass is the probe side (the side not materialized in `table`).
    fn probe_needs_outer(&self) -> bool {
        match self.join_type {
            JoinType::LeftOuter => !self.build_is_left,
            JoinType::RightOuter => self.build_is_left,
            JoinType::FullOuter => true,
            _ => false,
        }
    }

    fn build_needs_outer(&self) -> bool {
        match self.join_type {
            JoinType::LeftOuter => self.build_is_left,
            JoinType::RightOuter => !self.build_is_left,
            JoinType::FullOuter => true,
            _ => false,
        }
    }

    fn advance_probe(&mut self, ctx: &ExecutionContext) -> Result<bool, ExecError> {
        match self.probe_side.next(ctx)? {
            Some(t) => {
                let key = Self::key_of(&self.probe_keys, &self.probe_schema, &t)?;
                self.current_key = key;
                self.match_cursor = 0;
                self.row_cursor = 0;
                self.probe_any_match = false;
                self.current_probe = Some(t);
                Ok(true)
            }
            None => {
                self.current_probe = None;
                Ok(false)
            }
        }
    }
}

impl PhysicalOperator for HashJoin {
    fn kind(&self) -> OperatorKind {
        OperatorKind::HashJoin
    }

    fn estimated_cost(&self) -> f64 {
        self.build_side.estimated_cost() + self.probe_side.estimated_cost()
    }

    fn schema(&self) -> &TupleSchema {
        &self.out_schema
    }

    fn open(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        self.failed = false;
        self.build(ctx)?;
        self.probe_side.open(ctx)?;
        self.advance_probe(ctx)?;
        Ok(())
    }

    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        if self.failed {
            return Err(ExecError::OperatorClosed("HashJoin"));
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
        self.probe_side.close(ctx);
        self.build_side.close(ctx);
    }
}

impl HashJoin {
    fn next_inner(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        loop {
            ctx.check_cancellation()?;
            let Some(probe_row) = self.current_probe.clone() else {
                if self.build_needs_outer() {
                    if !self.unmatched_started {
                        self.unmatched_keys = self.table.keys().cloned().collect();
                        self.unmatched_started = true;
                    }
                    while self.unmatched_key_idx < self.unmatched_keys.len() {
                        let key = &self.unmatched_keys[self.unmatched_key_idx];
                        let entries = &self.table[key];
                        while self.unmatched_row_idx < entries.len() {
                            let entry = &entries[self.unmatched_row_idx];
                            self.unmatched_row_idx += 1;
                            if !entry.matched {
                                return Ok(Some(self.combine_with_probe_nulls(&entry.row)));
                            }
                        }
                        self.unmatched_row_idx = 0;
                        self.unmatched_key_idx += 1;
                    }
                }
                return Ok(None);
            };

            let Some(key) = self.current_key.clone() else {
                self.advance_probe(ctx)?;
                continue;
            };
            let Some(entries_len) = self.table.get(&key).map(|v| v.len()) else {
                if !self.probe_any_match && self.probe_needs_outer() {
                    let out = self.combine_with_build_nulls(&probe_row);
                    self.advance_probe(ctx)?;
                    return Ok(Some(out));
                }
                self.advance_probe(ctx)?;
                continue;
            };

            while self.row_cursor < entries_len {
                let idx = self.row_cursor;
                self.row_cursor += 1;
                let build_row = self.table.get(&key).unwrap()[idx].row.clone();
                if self.residual_ok(&build_row, &probe_row)? {
                    self.probe_any_match = true;
                    self.table.get_mut(&key).unwrap()[idx].matched = true;
                    return Ok(Some(self.combine(&build_row, &probe_row)));
                }
            }

            if !self.probe_any_match && self.probe_needs_outer() {
                let out = self.combine_with_build_nulls(&probe_row);
                self.advance_probe(ctx)?;
                return Ok(Some(out));
            }
            self.advance_probe(ctx)?;
        }
    }
}

/// Both children must already be sorted on the join keys (the plan
/// builder is responsible for inserting `Sort`, or for proving an
/// index provides the order — spec §4.1.3). Advances the side with the
/// smaller current key; on equality, buffers the equal-key block on
/// each side and emits their cross-product before advancing both past
/// the block. Only equi-joins (Inner) are supported, matching the
/// Non-goal scope of this operator.
pub struct MergeJoin {
    left: Box<dyn PhysicalOperator>,
    right: Box<dyn PhysicalOperator>,
    left_keys: Vec<Expr>,
    right_keys: Vec<Expr>,
    residual: Option<Expr>,
    out_schema: TupleSchema,
    left_schema: TupleSchema,
    right_schema: TupleSchema,

    left_peek: Option<Tuple>,
    right_peek: Option<Tuple>,
    left_block: Vec<Tuple>,
    right_block: Vec<Tuple>,
    block_i: usize,
    block_j: usize,
    in_block: bool,
    failed: bool,
}

impl MergeJoin {
    pub fn new(
        left: Box<dyn PhysicalOperator>,
        right: Box<dyn PhysicalOperator>,
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
        residual: Option<Expr>,
    ) -> Self {
        let out_schema = out_schema(left.schema(), right.schema());
        let left_schema = left.schema().clone();
        let right_schema = right.schema().clone();
        Self {
            left,
            right,
            left_keys,
            right_keys,
            residual,
            out_schema,
            left_schema,
            right_schema,
            left_peek: None,
            right_peek: None,
            left_block: Vec::new(),
            right_block: Vec::new(),
            block_i: 0,
            block_j: 0,
            in_block: false,
            failed: false,
        }
    }

    fn key(&self, side_keys: &[Expr], schema: &TupleSchema, t: &Tuple) -> Result<Vec<crate::value::Value>, ExecError> {
        side_keys.iter().map(|e| e.eval(schema, t)).collect()
    }

    fn cmp_keys(a: &[crate::value::Value], b: &[crate::value::Value]) -> std::cmp::Ordering {
        for (x, y) in a.iter().zip(b.iter()) {
            match x.partial_cmp_sql(y) {
                Some(std::cmp::Ordering::Equal) => continue,
                Some(o) => return o,
                None => return std::cmp::Ordering::Equal, // NULLs sort together; never match below.
            }
        }
        std::cmp::Ordering::Equal
    }

    fn pull_left(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        self.left_peek = self.left.next(ctx)?;
        Ok(())
    }

    fn pull_right(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        self.right_peek = self.right.next(ctx)?;
        Ok(())
    }

    /// Gathers the block of rows sharing `key` on `side`, starting with
    /// the already-peeked row.
    fn gather_block(
        advance: impl Fn(&mut Self, &ExecutionContext) -> Result<(), ExecError>,
        this: &mut Self,
        ctx: &ExecutionContext,
        is_left: bool,
        key: &[crate::value::Value],
    ) -> Result<Vec<Tuple>, ExecError> {
        let mut block = Vec::new();
        loop {
            let peek = if is_left { this.left_peek.clone() } else { this.right_peek.clone() };
            let Some(row) = peek else { break };
            let (keys, schema) = if is_left {
                (&this.left_keys, &this.left_schema)
            } else {
                (&this.right_keys, &this.right_schema)
            };
            let row_key = this.key(keys, schema, &row)?;
            if Self::cmp_keys(&row_key, key) != std::cmp::Ordering::Equal {
                break;
            }
            block.push(row);
            advance(this, ctx)?;
        }
        Ok(block)
    }

    fn start_next_block(&mut self, ctx: &ExecutionContext) -> Result<bool, ExecError> {
        loop {
            let (Some(l), Some(r)) = (self.left_peek.clone(), self.right_peek.clone()) else {
                return Ok(false);
            };
            let lk = self.key(&self.left_keys, &self.left_schema, &l)?;
            let rk = self.key(&self.right_keys, &self.right_schema, &r)?;
            if lk.iter().any(|v| v.is_null()) {
                self.pull_left(ctx)?;
                continue;
            }
            if rk.iter().any(|v| v.is_null()) {
                self.pull_right(ctx)?;
                continue;
            }
            match Self::cmp_keys(&lk, &rk) {
                std::cmp::Ordering::Less => self.pull_left(ctx)?,
                std::cmp::Ordering::Greater => self.pull_right(ctx)?,
                std::cmp::Ordering::Equal => {
                    self.left_block = Self::gather_block(Self::pull_left, self, ctx, true, &lk)?;
                    self.right_block = Self::gather_block(Self::pull_right, self, ctx, false, &lk)?;
                    self.block_i = 0;
                    self.block_j = 0;
                    self.in_block = true;
                    return Ok(true);
                }
            }
        }
    }
}

impl PhysicalOperator for MergeJoin {
    fn kind(&self) -> OperatorKind {
        OperatorKind::MergeJoin
    }

    fn estimated_cost(&self) -> f64 {
        self.left.estimated_cost() + self.right.estimated_cost()
    }

    fn schema(&self) -> &TupleSchema {
        &self.out_schema
    }

    fn open(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        self.failed = false;
        self.left.open(ctx)?;
        self.right.open(ctx)?;
        self.pull_left(ctx)?;
        self.pull_right(ctx)?;
        Ok(())
    }

    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        if self.failed {
            return Err(ExecError::OperatorClosed("MergeJoin"));
        }
        let result = self.next_inner(ctx);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn close(&mut self, ctx: &ExecutionContext) {
        self.left.close(ctx);
        self.right.close(ctx);
    }
}

impl MergeJoin {
    fn next_inner(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError> {
        loop {
            ctx.check_cancellation()?;
            if !self.in_block && !self.start_next_block(ctx)? {
                return Ok(None);
            }
            while self.block_i < self.left_block.len() {
                let l = self.left_block[self.block_i].clone();
                while self.block_j < self.right_block.len() {
                    let r = self.right_block[self.block_j].clone();
                    self.block_j += 1;
                    let combined = Tuple::concat(l.clone(), r.clone());
                    let ok = match &self.residual {
                        Some(e) => e.eval_predicate(&self.out_schema, &combined)?,
                        None => true,
                    };
                    if ok {
                        return Ok(Some(combined));
                    }
                }
                self.block_j = 0;
                self.block_i += 1;
            }
            self.in_block = false;
        }
    }
}
