//! Transaction coordinator (spec §4.3): the ACID state machine,
//! isolation-level lock acquisition, savepoints, and release-on-
//! termination that ties the lock manager, execution driver, and
//! cursor manager together.
//!
//! Grounded on the teacher's `MutTxId` (`locking_tx_datastore/mut_tx.rs`),
//! which holds lock guards for the duration of a transaction and
//! releases them on commit/drop; here that is made explicit as
//! acquire/release calls against [`crate::lock::LockManager`] driven by
//! the isolation policy table of spec §4.3.

use crate::cursor::CursorManager;
use crate::error::{DbError, TxnError};
use crate::lock::{LockManager, LockMode, ResourceId};
use crate::operator::{run_to_result_set, ExecutionContext, ResultSet};
use crate::plan::PlanNode;
use crate::storage::{StorageEngine, Wal, WalRecord};
use crate::EngineConfig;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// States form the DAG `Active -> {Preparing -> Committing -> Committed
/// | Aborting -> Aborted}` (spec §3). This coordinator does not use
/// `Preparing` (no two-phase commit protocol is exposed at this layer)
/// but keeps the variant so the full DAG from the spec is representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum TxnState {
    Active,
    Preparing,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

impl TxnState {
    fn name(self) -> &'static str {
        match self {
            TxnState::Active => "Active",
            TxnState::Preparing => "Preparing",
            TxnState::Committing => "Committing",
            TxnState::Committed => "Committed",
            TxnState::Aborting => "Aborting",
            TxnState::Aborted => "Aborted",
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }
}

/// Caller-supplied tag distinguishing reads from writes, since plan
/// compilation (and therefore DML detection) is out of this crate's
/// scope (spec §1); the coordinator trusts this tag to pick the
/// isolation policy's lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum OpType {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub struct TransactionOperation {
    pub op_type: OpType,
    pub tables: Vec<String>,
    pub timestamp: Instant,
    pub rows_affected: u64,
}

struct TxnInner {
    state: TxnState,
    operations: Vec<TransactionOperation>,
    savepoints: HashMap<String, usize>,
    rows_read: u64,
    rows_modified: u64,
    end_time: Option<Instant>,
}

/// `{id, state, isolation, start_time, end_time?, operations[],
/// acquired_locks[], savepoints: name->position, rows_read,
/// rows_modified}` (spec §3). `acquired_locks` is not separately
/// tracked here: the lock manager is the single source of truth for
/// which resources a transaction holds, queried via
/// [`LockManager::holds_any`] and released in bulk via
/// [`LockManager::release_all`].
pub struct Transaction {
    pub id: u64,
    pub isolation: IsolationLevel,
    pub start_time: Instant,
    deadline: Instant,
    inner: Mutex<TxnInner>,
}

impl Transaction {
    pub fn state(&self) -> TxnState {
        self.inner.lock().state
    }

    pub fn rows_read(&self) -> u64 {
        self.inner.lock().rows_read
    }

    pub fn rows_modified(&self) -> u64 {
        self.inner.lock().rows_modified
    }

    pub fn end_time(&self) -> Option<Instant> {
        self.inner.lock().end_time
    }

    pub fn operation_count(&self) -> usize {
        self.inner.lock().operations.len()
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Exclusive state transitions (spec §3): fails with
    /// `InvalidTxnState` unless the current state is one of `allowed`.
    fn transition(&self, allowed: &[TxnState], to: TxnState) -> Result<(), TxnError> {
        let mut inner = self.inner.lock();
        if !allowed.contains(&inner.state) {
            return Err(TxnError::InvalidTxnState {
                from: inner.state.name(),
                to: to.name(),
            });
        }
        inner.state = to;
        if to.is_terminal() {
            inner.end_time = Some(Instant::now());
        }
        Ok(())
    }

    fn record_operation(&self, op_type: OpType, tables: Vec<String>, rows: u64) {
        let mut inner = self.inner.lock();
        inner.operations.push(TransactionOperation {
            op_type,
            tables,
            timestamp: Instant::now(),
            rows_affected: rows,
        });
        match op_type {
            OpType::Select => inner.rows_read += rows,
            OpType::Insert | OpType::Update | OpType::Delete => inner.rows_modified += rows,
        }
    }

    /// `position = len(operations)` (spec §4.3); re-using a name
    /// overwrites the prior savepoint at that name.
    fn create_savepoint(&self, name: String) {
        let mut inner = self.inner.lock();
        let pos = inner.operations.len();
        inner.savepoints.insert(name, pos);
    }

    /// Truncates the operation list to the saved position and drops
    /// every savepoint created after it (spec §4.3: "savepoints created
    /// after this point are invalidated").
    fn rollback_to_savepoint(&self, name: &str) -> Result<usize, TxnError> {
        let mut inner = self.inner.lock();
        let pos = *inner.savepoints.get(name).ok_or(TxnError::InvalidTxnState {
            from: "Active",
            to: "RollbackToSavepoint",
        })?;
        inner.operations.truncate(pos);
        inner.savepoints.retain(|_, p| *p <= pos);
        Ok(pos)
    }

    fn operations_reverse(&self) -> Vec<TransactionOperation> {
        let inner = self.inner.lock();
        inner.operations.iter().rev().cloned().collect()
    }
}

/// Spec §4.3's isolation policy table, collapsed to table granularity:
/// the coordinator acquires one table-level lock per base table the
/// plan reads or writes rather than separately modeled row/page locks,
/// since plan compilation does not hand this layer row ids up front
/// (an Open Question decision recorded in `DESIGN.md`). `None` means no
/// lock is acquired for that (isolation, op) pair.
fn isolation_mode(isolation: IsolationLevel, op_type: OpType) -> Option<LockMode> {
    match op_type {
        OpType::Select => match isolation {
            IsolationLevel::ReadUncommitted => None,
            IsolationLevel::ReadCommitted | IsolationLevel::RepeatableRead | IsolationLevel::Serializable => Some(LockMode::S),
        },
        OpType::Insert | OpType::Update | OpType::Delete => Some(LockMode::X),
    }
}

/// `ReadCommitted` releases its SELECT locks at statement end rather
/// than holding them to transaction end (spec §4.3's "Held until"
/// column); every other combination holds to transaction end.
fn releases_at_statement_end(isolation: IsolationLevel, op_type: OpType) -> bool {
    matches!(isolation, IsolationLevel::ReadCommitted) && matches!(op_type, OpType::Select)
}

/// Manages the lifecycle of every active transaction: assigns
/// monotonically increasing ids, drives isolation-level locking around
/// [`crate::operator::run_to_result_set`], and releases locks and
/// cursors exactly once at each transaction's terminal state (spec
/// §4.3).
pub struct TransactionCoordinator {
    active: RwLock<HashMap<u64, Arc<Transaction>>>,
    next_id: AtomicU64,
    lock_manager: Arc<LockManager>,
    cursor_manager: Arc<CursorManager>,
    storage: Arc<dyn StorageEngine>,
    wal: Arc<dyn Wal>,
    config: EngineConfig,
}

impl TransactionCoordinator {
    pub fn new(
        storage: Arc<dyn StorageEngine>,
        wal: Arc<dyn Wal>,
        lock_manager: Arc<LockManager>,
        cursor_manager: Arc<CursorManager>,
        config: EngineConfig,
    ) -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            lock_manager,
            cursor_manager,
            storage,
            wal,
            config,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    pub fn get(&self, txn_id: u64) -> Option<Arc<Transaction>> {
        self.active.read().get(&txn_id).cloned()
    }

    fn get_active(&self, txn_id: u64) -> Result<Arc<Transaction>, DbError> {
        self.get(txn_id).ok_or(DbError::Txn(TxnError::TxnNotFound(txn_id)))
    }

    /// Spec §4.3 Begin: creates a transaction in `Active` with a
    /// deadline of `now + txn_timeout`.
    pub fn begin(&self, isolation: IsolationLevel) -> Arc<Transaction> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Instant::now();
        let txn = Arc::new(Transaction {
            id,
            isolation,
            start_time: now,
            deadline: now + self.config.txn_timeout,
            inner: Mutex::new(TxnInner {
                state: TxnState::Active,
                operations: Vec::new(),
                savepoints: HashMap::new(),
                rows_read: 0,
                rows_modified: 0,
                end_time: None,
            }),
        });
        self.active.write().insert(id, txn.clone());
        log::info!("txn {id} began under {isolation}");
        txn
    }

    /// Spec §4.3 Execute: validates `Active`, acquires isolation-level
    /// locks on every base table the plan touches (lexicographic order,
    /// per spec §5, which `PlanNode::referenced_tables` already yields),
    /// runs the execution driver, and records the resulting
    /// `TransactionOperation`. A lock failure (timeout or deadlock)
    /// aborts this transaction as the spec §7 "lock errors abort the
    /// current transaction" policy requires.
    pub fn execute(&self, txn_id: u64, plan: &PlanNode, op_type: OpType) -> Result<ResultSet, DbError> {
        let txn = self.get_active(txn_id)?;
        if txn.state() != TxnState::Active {
            return Err(DbError::Txn(TxnError::InvalidTxnState {
                from: txn.state().name(),
                to: "Active",
            }));
        }

        let tables = plan.referenced_tables();
        let mode = isolation_mode(txn.isolation, op_type);
        let mut acquired = Vec::new();
        if let Some(mode) = mode {
            for table in &tables {
                let resource = ResourceId::Table(table.clone());
                if let Err(lock_err) = self.lock_manager.acquire(txn_id, resource.clone(), mode, self.config.lock_timeout) {
                    let _ = self.rollback(txn_id);
                    return Err(DbError::Lock(lock_err));
                }
                acquired.push(resource);
            }
        }

        let memory_limit = self.config.work_mem_bytes.saturating_mul(16);
        let ctx = ExecutionContext::new(self.storage.clone(), self.config.clone(), memory_limit);
        let mut root = plan.build_operator(&mut 0);
        let outcome = match run_to_result_set(root.as_mut(), &ctx) {
            Ok(rs) => Ok(rs),
            Err((e, _partial)) => Err(DbError::Exec(e)),
        };

        if releases_at_statement_end(txn.isolation, op_type) {
            for resource in &acquired {
                let _ = self.lock_manager.release(txn_id, resource);
            }
        }

        match &outcome {
            Ok(rs) => txn.record_operation(op_type, tables, rs.row_count() as u64),
            Err(_) => txn.record_operation(op_type, tables, 0),
        }

        outcome
    }

    /// Spec §4.3 CreateSavepoint.
    pub fn create_savepoint(&self, txn_id: u64, name: impl Into<String>) -> Result<(), DbError> {
        let txn = self.get_active(txn_id)?;
        if txn.state() != TxnState::Active {
            return Err(DbError::Txn(TxnError::InvalidTxnState {
                from: txn.state().name(),
                to: "Active",
            }));
        }
        let name = name.into();
        log::info!("txn {txn_id} created savepoint `{name}`");
        txn.create_savepoint(name);
        Ok(())
    }

    /// Spec §4.3 RollbackToSavepoint: truncates the operation list to
    /// the saved position. Locks acquired after the savepoint are
    /// released only when the transaction's isolation level already
    /// permits early release of that kind of lock (mirrors
    /// `ReadCommitted`'s statement-end release above); locks acquired
    /// before the savepoint are retained regardless, since releasing
    /// them would violate every isolation level's "held until" column.
    /// Storage-level undo is delegated to the WAL hook per spec §9 (no
    /// WAL implementation lives in this crate).
    pub fn rollback_to_savepoint(&self, txn_id: u64, name: &str) -> Result<(), DbError> {
        let txn = self.get_active(txn_id)?;
        if txn.state() != TxnState::Active {
            return Err(DbError::Txn(TxnError::InvalidTxnState {
                from: txn.state().name(),
                to: "Active",
            }));
        }
        txn.rollback_to_savepoint(name).map_err(DbError::Txn)?;
        Ok(())
    }

    /// Spec §4.3 Commit: `Active -> Committing`, a blocking WAL flush,
    /// then `Committing -> Committed`; releases all locks, removes the
    /// transaction from the registry, and closes its non-holdable
    /// cursors. A WAL flush failure transitions to `Aborting` instead
    /// (spec §4.3: "Failure at WAL flush transitions to Aborting").
    pub fn commit(&self, txn_id: u64) -> Result<(), DbError> {
        let txn = self.get_active(txn_id)?;
        txn.transition(&[TxnState::Active], TxnState::Committing)?;

        let flushed = self
            .wal
            .append(WalRecord {
                lsn: 0,
                description: format!("commit txn {txn_id}"),
            })
            .and_then(|lsn| self.wal.flush_up_to(lsn));

        match flushed {
            Ok(()) => {
                txn.transition(&[TxnState::Committing], TxnState::Committed)?;
                self.lock_manager.release_all(txn_id);
                self.active.write().remove(&txn_id);
                self.cursor_manager.close_all(false);
                log::info!("txn {txn_id} committed");
                Ok(())
            }
            Err(e) => {
                log::error!("txn {txn_id} WAL flush failed during commit: {e}");
                txn.transition(&[TxnState::Committing], TxnState::Aborting)?;
                txn.transition(&[TxnState::Aborting], TxnState::Aborted)?;
                self.lock_manager.release_all(txn_id);
                self.active.write().remove(&txn_id);
                self.cursor_manager.close_all(true);
                Err(DbError::Storage(e))
            }
        }
    }

    /// Spec §4.3 Rollback: `Active -> Aborting`, emits undo records in
    /// reverse operation order via the WAL hook, `Aborting -> Aborted`,
    /// releases locks, removes from the registry, closes all cursors
    /// (holdable included, per spec §4.5: "all cursors die with an
    /// aborted transaction").
    pub fn rollback(&self, txn_id: u64) -> Result<(), DbError> {
        let txn = self.get_active(txn_id)?;
        txn.transition(&[TxnState::Active, TxnState::Committing], TxnState::Aborting)?;

        for op in txn.operations_reverse() {
            let description = format!("{:?} on {:?}", op.op_type, op.tables);
            let _ = self.wal.emit_undo(&description);
        }

        txn.transition(&[TxnState::Aborting], TxnState::Aborted)?;
        self.lock_manager.release_all(txn_id);
        self.active.write().remove(&txn_id);
        self.cursor_manager.close_all(true);
        log::info!("txn {txn_id} rolled back");
        Ok(())
    }

    /// Spec §4.3 Timeouts: aborts every `Active` transaction whose
    /// deadline has passed. Intended to be driven by a background
    /// reaper thread or called on demand; this crate does not spawn
    /// the thread itself (no ambient scheduler is in scope, spec §1).
    pub fn reap_expired(&self) -> Vec<u64> {
        let expired: Vec<u64> = self
            .active
            .read()
            .values()
            .filter(|t| t.state() == TxnState::Active && t.is_expired())
            .map(|t| t.id)
            .collect();
        for id in &expired {
            let _ = self.rollback(*id);
        }
        expired
    }
}
