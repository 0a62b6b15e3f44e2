//! Multi-granularity lock manager (spec §4.2).
//!
//! Grounded on the teacher's `SharedMutexGuard`/`SharedWriteGuard`
//! convention (`locking_tx_datastore/mod.rs`) for the manager's coarse
//! internal mutex, and the `spacetimedb-schema` crate's use of
//! `petgraph` for dependency graphs, adapted here to the wait-for graph
//! and its iterative cycle detection (spec §9 calls for iterative, not
//! recursive, DFS).

use crate::error::LockError;
use parking_lot::{Condvar, Mutex};
use petgraph::graphmap::DiGraphMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum LockMode {
    S,
    X,
    IS,
    IX,
    SIX,
}

impl LockMode {
    /// The compatibility matrix of spec §4.2.
    fn compatible(self, other: LockMode) -> bool {
        use LockMode::*;
        matches!(
            (self, other),
            (S, S) | (S, IS) | (IS, S) | (IS, IS) | (IS, IX) | (IS, SIX) | (IX, IS) | (IX, IX) | (SIX, IS)
        )
    }

    /// Whether an already-held `self` mode satisfies a new request for
    /// `requested` without acquiring anything further (the "mode ≥
    /// requested" check in spec §4.2 Acquire step 1). `SIX` summarizes
    /// `S` and `IX`; `S`/`IX` summarize `IS`; `X` summarizes everything.
    fn subsumes(self, requested: LockMode) -> bool {
        use LockMode::*;
        if self == requested {
            return true;
        }
        match self {
            X => true,
            SIX => matches!(requested, S | IS | IX),
            S | IX => matches!(requested, IS),
            IS => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum LockKind {
    Table,
    Page,
    Row,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Table(String),
    Page(String, u64),
    Row(String, u64, u64),
}

impl ResourceId {
    pub fn kind(&self) -> LockKind {
        match self {
            ResourceId::Table(_) => LockKind::Table,
            ResourceId::Page(..) => LockKind::Page,
            ResourceId::Row(..) => LockKind::Row,
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceId::Table(t) => write!(f, "{t}"),
            ResourceId::Page(t, p) => write!(f, "{t}:{p}"),
            ResourceId::Row(t, p, s) => write!(f, "{t}:{p}:{s}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Lock {
    pub id: u64,
    pub txn_id: u64,
    pub mode: LockMode,
    pub resource: ResourceId,
    pub acquired_at: Instant,
}

#[derive(Default)]
struct LockTable {
    granted: Vec<Lock>,
    waiting: VecDeque<(u64, LockMode)>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum WaitState {
    Pending,
    Granted,
    Aborted,
}

struct WaiterInner {
    state: Mutex<WaitState>,
    condvar: Condvar,
}

impl WaiterInner {
    fn new() -> Self {
        Self {
            state: Mutex::new(WaitState::Pending),
            condvar: Condvar::new(),
        }
    }
}

struct Inner {
    tables: HashMap<String, LockTable>,
    pages: HashMap<(String, u64), LockTable>,
    rows: HashMap<(String, u64, u64), LockTable>,
    wait_for: DiGraphMap<u64, ()>,
    active_waiters: HashMap<u64, Arc<WaiterInner>>,
    next_lock_id: u64,
}

impl Inner {
    fn table_for(&mut self, resource: &ResourceId) -> &mut LockTable {
        match resource {
            ResourceId::Table(name) => self.tables.entry(name.clone()).or_default(),
            ResourceId::Page(name, page) => self.pages.entry((name.clone(), *page)).or_default(),
            ResourceId::Row(name, page, slot) => self.rows.entry((name.clone(), *page, *slot)).or_default(),
        }
    }

    fn already_held_sufficient(&mut self, resource: &ResourceId, txn: u64, mode: LockMode) -> bool {
        self.table_for(resource).granted.iter().any(|l| l.txn_id == txn && l.mode.subsumes(mode))
    }

    fn compatible_with_all(&mut self, resource: &ResourceId, txn: u64, mode: LockMode) -> bool {
        self.table_for(resource).granted.iter().all(|l| l.txn_id == txn || l.mode.compatible(mode))
    }

    fn grant(&mut self, txn: u64, resource: &ResourceId, mode: LockMode) {
        let id = self.next_lock_id;
        self.next_lock_id += 1;
        let lock = Lock {
            id,
            txn_id: txn,
            mode,
            resource: resource.clone(),
            acquired_at: Instant::now(),
        };
        self.table_for(resource).granted.push(lock);
    }

    fn mark_aborted(&mut self, victim: u64) {
        if let Some(w) = self.active_waiters.get(&victim) {
            *w.state.lock() = WaitState::Aborted;
            w.condvar.notify_all();
        }
    }

    fn remove_waiter(&mut self, txn: u64, resource: &ResourceId) {
        self.active_waiters.remove(&txn);
        self.table_for(resource).waiting.retain(|&(t, _)| t != txn);
        self.wait_for.remove_node(txn);
    }

    /// Grants to the wait queue head while it remains compatible with
    /// the current holders, cascading through as many waiters as
    /// possible in one pass (spec §4.2 Release).
    fn cascade_grant(&mut self, resource: &ResourceId) {
        loop {
            let head = self.table_for(resource).waiting.front().copied();
            let Some((txn, mode)) = head else { break };
            if !self.compatible_with_all(resource, txn, mode) {
                break;
            }
            self.table_for(resource).waiting.pop_front();
            self.grant(txn, resource, mode);
            self.wait_for.remove_node(txn);
            if let Some(w) = self.active_waiters.remove(&txn) {
                *w.state.lock() = WaitState::Granted;
                w.condvar.notify_all();
            }
        }
    }
}

/// Iterative white/gray/black DFS (spec §9: recursion is disallowed to
/// bound stack depth on long wait chains) looking for a path from
/// `start` back to itself. Returns the cycle (including the repeated
/// `start` at both ends) if found.
fn cycle_containing(graph: &DiGraphMap<u64, ()>, start: u64) -> Option<Vec<u64>> {
    let mut stack: Vec<(u64, std::vec::IntoIter<u64>)> =
        vec![(start, graph.neighbors(start).collect::<Vec<_>>().into_iter())];
    let mut on_stack = vec![start];
    let mut visited: HashSet<u64> = HashSet::new();
    visited.insert(start);
    while let Some((_, iter)) = stack.last_mut() {
        match iter.next() {
            Some(next) => {
                if next == start {
                    on_stack.push(next);
                    return Some(on_stack);
                }
                if visited.insert(next) {
                    on_stack.push(next);
                    stack.push((next, graph.neighbors(next).collect::<Vec<_>>().into_iter()));
                }
            }
            None => {
                stack.pop();
                on_stack.pop();
            }
        }
    }
    None
}

/// Owns three keyed lock tables (table/page/row granularity) and the
/// wait-for graph behind one coarse internal mutex (spec §4.2, §5).
/// Blocking happens on a per-waiter condition variable outside that
/// mutex, so the critical sections touching `inner` stay short.
pub struct LockManager {
    inner: Mutex<Inner>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tables: HashMap::new(),
                pages: HashMap::new(),
                rows: HashMap::new(),
                wait_for: DiGraphMap::new(),
                active_waiters: HashMap::new(),
                next_lock_id: 0,
            }),
        }
    }

    /// Spec §4.2 Acquire. Blocks up to `timeout` if the lock cannot be
    /// granted immediately; returns `DeadlockDetected` without blocking
    /// if enqueuing this request completes a wait-for cycle and this
    /// transaction is chosen as the (youngest) victim.
    pub fn acquire(&self, txn: u64, resource: ResourceId, mode: LockMode, timeout: Duration) -> Result<(), LockError> {
        let waiter = {
            let mut inner = self.inner.lock();
            if inner.already_held_sufficient(&resource, txn, mode) {
                return Ok(());
            }
            if inner.compatible_with_all(&resource, txn, mode) {
                inner.grant(txn, &resource, mode);
                return Ok(());
            }

            let waiter = Arc::new(WaiterInner::new());
            inner.table_for(&resource).waiting.push_back((txn, mode));
            inner.active_waiters.insert(txn, waiter.clone());

            let holders: Vec<u64> = inner
                .table_for(&resource)
                .granted
                .iter()
                .map(|l| l.txn_id)
                .filter(|&h| h != txn)
                .collect();
            for h in holders {
                inner.wait_for.add_edge(txn, h, ());
            }

            if let Some(cycle) = cycle_containing(&inner.wait_for, txn) {
                let victim = *cycle.iter().max().expect("cycle is non-empty");
                log::warn!("deadlock detected on `{resource}`: txn {txn} waits in a cycle, victim is txn {victim}");
                inner.mark_aborted(victim);
                if victim == txn {
                    inner.remove_waiter(txn, &resource);
                    return Err(LockError::DeadlockDetected { victim });
                }
            }
            waiter
        };

        let wait_start = Instant::now();
        let deadline = wait_start + timeout;
        let mut half_timeout_logged = false;
        let mut state = waiter.state.lock();
        loop {
            match *state {
                WaitState::Granted => return Ok(()),
                WaitState::Aborted => {
                    drop(state);
                    let mut inner = self.inner.lock();
                    inner.remove_waiter(txn, &resource);
                    return Err(LockError::DeadlockDetected { victim: txn });
                }
                WaitState::Pending => {
                    let now = Instant::now();
                    if now >= deadline {
                        drop(state);
                        let mut inner = self.inner.lock();
                        inner.remove_waiter(txn, &resource);
                        return Err(LockError::LockTimeout(resource.to_string()));
                    }
                    if !half_timeout_logged && now - wait_start >= timeout / 2 {
                        half_timeout_logged = true;
                        log::warn!("txn {txn} has waited over half of lock_timeout for `{resource}` in mode {mode}");
                    }
                    waiter.condvar.wait_for(&mut state, deadline - now);
                }
            }
        }
    }

    /// Spec §4.2 Release. Errors with `LockNotHeld` if `txn` held no
    /// lock on `resource`.
    pub fn release(&self, txn: u64, resource: &ResourceId) -> Result<(), LockError> {
        let mut inner = self.inner.lock();
        let before = inner.table_for(resource).granted.len();
        inner.table_for(resource).granted.retain(|l| l.txn_id != txn);
        if inner.table_for(resource).granted.len() == before {
            return Err(LockError::LockNotHeld {
                txn,
                resource: resource.to_string(),
            });
        }
        inner.cascade_grant(resource);
        Ok(())
    }

    /// Spec §4.2 ReleaseAll, called exactly once at transaction
    /// termination: removes every lock `txn` holds across all three
    /// granularities and removes `txn` from the wait-for graph.
    pub fn release_all(&self, txn: u64) {
        let mut inner = self.inner.lock();
        let mut touched = Vec::new();

        for (name, table) in inner.tables.iter_mut() {
            if table.granted.iter().any(|l| l.txn_id == txn) {
                table.granted.retain(|l| l.txn_id != txn);
                touched.push(ResourceId::Table(name.clone()));
            }
        }
        for ((name, page), table) in inner.pages.iter_mut() {
            if table.granted.iter().any(|l| l.txn_id == txn) {
                table.granted.retain(|l| l.txn_id != txn);
                touched.push(ResourceId::Page(name.clone(), *page));
            }
        }
        for ((name, page, slot), table) in inner.rows.iter_mut() {
            if table.granted.iter().any(|l| l.txn_id == txn) {
                table.granted.retain(|l| l.txn_id != txn);
                touched.push(ResourceId::Row(name.clone(), *page, *slot));
            }
        }

        inner.wait_for.remove_node(txn);
        inner.active_waiters.remove(&txn);

        for resource in touched {
            inner.cascade_grant(&resource);
        }
    }

    /// True if `txn` currently holds any lock anywhere (used by tests
    /// and by the transaction coordinator's terminal-state invariant
    /// check — spec §8: "for all transactions that reach a terminal
    /// state, zero locks").
    pub fn holds_any(&self, txn: u64) -> bool {
        let inner = self.inner.lock();
        inner.tables.values().any(|t| t.granted.iter().any(|l| l.txn_id == txn))
            || inner.pages.values().any(|t| t.granted.iter().any(|l| l.txn_id == txn))
            || inner.rows.values().any(|t| t.granted.iter().any(|l| l.txn_id == txn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_matrix_matches_spec() {
        use LockMode::*;
        let y: &[(LockMode, LockMode)] = &[
            (S, S),
            (S, IS),
            (IS, S),
            (IS, IS),
            (IS, IX),
            (IS, SIX),
            (IX, IS),
            (IX, IX),
            (SIX, IS),
        ];
        let all = [S, X, IS, IX, SIX];
        for &a in &all {
            for &b in &all {
                let expect = y.contains(&(a, b));
                assert_eq!(a.compatible(b), expect, "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn second_exclusive_lock_waits_then_times_out() {
        let mgr = LockManager::new();
        let r = ResourceId::Table("t".into());
        mgr.acquire(1, r.clone(), LockMode::X, Duration::from_secs(1)).unwrap();
        let err = mgr.acquire(2, r.clone(), LockMode::X, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, LockError::LockTimeout(_)));
    }

    #[test]
    fn release_cascades_to_waiting_compatible_request() {
        let mgr = LockManager::new();
        let r = ResourceId::Table("t".into());
        mgr.acquire(1, r.clone(), LockMode::X, Duration::from_secs(1)).unwrap();

        let mgr = Arc::new(mgr);
        let mgr2 = mgr.clone();
        let r2 = r.clone();
        let waiter = std::thread::spawn(move || mgr2.acquire(2, r2, LockMode::S, Duration::from_secs(5)));

        std::thread::sleep(Duration::from_millis(50));
        mgr.release(1, &r).unwrap();
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn release_all_frees_every_resource() {
        let mgr = LockManager::new();
        let t1 = ResourceId::Table("t1".into());
        let t2 = ResourceId::Table("t2".into());
        mgr.acquire(1, t1.clone(), LockMode::IX, Duration::from_secs(1)).unwrap();
        mgr.acquire(1, t2.clone(), LockMode::S, Duration::from_secs(1)).unwrap();
        assert!(mgr.holds_any(1));
        mgr.release_all(1);
        assert!(!mgr.holds_any(1));
    }

    /// Spec §8 Scenario 4: A holds T1 X, B holds T2 X; A requests T2 X,
    /// B requests T1 X. Exactly one of {A, B} is aborted as victim; the
    /// other's acquire succeeds once the victim's locks are released
    /// (simulating the transaction coordinator's abort-on-deadlock
    /// policy from spec §7).
    #[test]
    fn deadlock_detection_scenario_4() {
        let mgr = Arc::new(LockManager::new());
        let t1 = ResourceId::Table("t1".into());
        let t2 = ResourceId::Table("t2".into());

        mgr.acquire(1, t1.clone(), LockMode::X, Duration::from_secs(5)).unwrap();
        mgr.acquire(2, t2.clone(), LockMode::X, Duration::from_secs(5)).unwrap();

        let mgr_a = mgr.clone();
        let t2a = t2.clone();
        let a = std::thread::spawn(move || mgr_a.acquire(1, t2a, LockMode::X, Duration::from_secs(5)));

        std::thread::sleep(Duration::from_millis(100));

        let b_result = mgr.acquire(2, t1.clone(), LockMode::X, Duration::from_secs(5));
        assert!(matches!(b_result, Err(LockError::DeadlockDetected { victim: 2 })));

        mgr.release_all(2);

        assert!(a.join().unwrap().is_ok());
    }
}
