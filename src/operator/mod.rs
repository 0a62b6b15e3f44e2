//! The Volcano/iterator operator framework (spec §4.1).
//!
//! Grounded on the teacher's `db/query_context.rs` (a per-query timer
//! threaded through execution) and the open/close discipline visible
//! around `TableIter` in `db/datastore/locking_tx_datastore/tx.rs`.

pub mod aggregate;
pub mod join;
pub mod pipeline;
pub mod scan;
pub mod sort;

use crate::error::ExecError;
use crate::storage::StorageEngine;
use crate::tuple::{Tuple, TupleSchema};
use crate::EngineConfig;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

/// Per-operator-kind tag (spec §3: "each operator exposes a static
/// `kind` tag").
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum OperatorKind {
    SeqScan,
    IndexScan,
    Filter,
    Project,
    Limit,
    NestedLoopJoin,
    HashJoin,
    MergeJoin,
    HashAggregate,
    SortAggregate,
    Sort,
}

/// Carries cancellation, deadline, storage/buffer-pool handles, and
/// memory budgeting through an operator tree (spec §4.1).
pub struct ExecutionContext {
    pub storage: Arc<dyn StorageEngine>,
    config: EngineConfig,
    cancelled: AtomicBool,
    start: Instant,
    tuples_produced: AtomicUsize,
    memory_used: AtomicUsize,
    memory_limit: usize,
}

impl ExecutionContext {
    pub fn new(storage: Arc<dyn StorageEngine>, config: EngineConfig, memory_limit: usize) -> Self {
        Self {
            storage,
            config,
            cancelled: AtomicBool::new(false),
            start: Instant::now(),
            tuples_produced: AtomicUsize::new(0),
            memory_used: AtomicUsize::new(0),
            memory_limit,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Wall-clock time since this query began executing.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }

    /// Tallies one more tuple produced by the operator tree, for
    /// instrumentation; callers are the leaf/root operators in the
    /// query's hot loop.
    pub fn record_tuple(&self) {
        self.tuples_produced.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub fn tuples_produced(&self) -> usize {
        self.tuples_produced.load(AtomicOrdering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }

    pub fn is_timed_out(&self) -> bool {
        let timeout = self.config.query_timeout;
        !timeout.is_zero() && self.start.elapsed() > timeout
    }

    pub fn check_cancellation(&self) -> Result<(), ExecError> {
        if self.is_cancelled() || self.is_timed_out() {
            return Err(ExecError::Timeout(self.start.elapsed()));
        }
        Ok(())
    }

    /// Fails with `MemoryExhausted` if `used + bytes > limit` (spec §4.1).
    pub fn allocate_memory(&self, bytes: usize) -> Result<(), ExecError> {
        loop {
            let used = self.memory_used.load(AtomicOrdering::SeqCst);
            let next = used + bytes;
            if next > self.memory_limit {
                return Err(ExecError::InsufficientMemory {
                    requested: bytes,
                    available: self.memory_limit.saturating_sub(used),
                });
            }
            if self
                .memory_used
                .compare_exchange(used, next, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Clamps at zero (spec §4.1).
    pub fn release_memory(&self, bytes: usize) {
        let _ = self
            .memory_used
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    pub fn memory_used(&self) -> usize {
        self.memory_used.load(AtomicOrdering::SeqCst)
    }
}

/// A node in the execution tree. Invariant: exactly one of
/// {open, closed} at any time; `close` is idempotent and must be
/// invoked on every path including error paths (spec §3).
pub trait PhysicalOperator {
    fn kind(&self) -> OperatorKind;
    fn estimated_cost(&self) -> f64;
    fn schema(&self) -> &TupleSchema;

    fn open(&mut self, ctx: &ExecutionContext) -> Result<(), ExecError>;
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Tuple>, ExecError>;
    fn close(&mut self, ctx: &ExecutionContext);
}

/// A schema plus a finite, restartable sequence of tuples (spec §3).
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub schema: TupleSchema,
    pub rows: Vec<Tuple>,
}

impl ResultSet {
    pub fn new(schema: TupleSchema) -> Self {
        Self { schema, rows: Vec::new() }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, i: usize) -> Option<&Tuple> {
        self.rows.get(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tuple> {
        self.rows.iter()
    }
}

/// Runs an operator tree to completion (or to the soft cap), closing it
/// on every exit path (spec §4.1: "driver").
///
/// The soft cap (`batch_size * 100` by default) breaks the pull loop to
/// prevent unbounded accumulation without pagination.
pub fn run_to_result_set(
    root: &mut dyn PhysicalOperator,
    ctx: &ExecutionContext,
) -> Result<ResultSet, (ExecError, ResultSet)> {
    let mut result = ResultSet::new(root.schema().clone());
    let cap = ctx.config().soft_result_cap();

    let outcome = (|| -> Result<(), ExecError> {
        root.open(ctx)?;
        loop {
            ctx.check_cancellation()?;
            match root.next(ctx)? {
                Some(t) => {
                    ctx.record_tuple();
                    result.rows.push(t);
                    if result.rows.len() >= cap {
                        break;
                    }
                }
                None => break,
            }
        }
        Ok(())
    })();

    root.close(ctx);

    match outcome {
        Ok(()) => Ok(result),
        Err(e) => Err((e, result)),
    }
}
