//! Cursor manager (spec §4.5): scrollable/holdable views over a
//! materialized [`ResultSet`].
//!
//! Grounded on the teacher's `TableIter`/row-iterator position tracking
//! in `db/datastore/locking_tx_datastore/tx.rs`, adapted here to the
//! named, independently-positioned cursors a client opens explicitly
//! rather than an operator's own internal scan state.

use crate::error::CursorError;
use crate::operator::ResultSet;
use crate::tuple::Tuple;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDirection {
    Next(u64),
    Prior(u64),
    First,
    Last,
    Absolute(u64),
    Relative(i64),
}

#[derive(Debug)]
struct CursorState {
    result_set: ResultSet,
    position: usize,
    scrollable: bool,
    holdable: bool,
    open: bool,
}

/// A named, positioned view over a result set (spec §3). `position` is
/// zero-based and satisfies `0 <= position <= result_set.row_count`.
#[derive(Debug)]
pub struct Cursor {
    pub id: u64,
    pub name: String,
    state: Mutex<CursorState>,
}

impl Cursor {
    pub fn position(&self) -> usize {
        self.state.lock().position
    }

    pub fn is_eof(&self) -> bool {
        let s = self.state.lock();
        s.position >= s.result_set.row_count()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn scrollable(&self) -> bool {
        self.state.lock().scrollable
    }

    pub fn holdable(&self) -> bool {
        self.state.lock().holdable
    }

    pub fn reset(&self) {
        self.state.lock().position = 0;
    }

    /// Spec §4.5 Fetch. `Prior`/`First`/`Absolute`/`Relative`-backward
    /// are rejected on non-scrollable cursors. Fetching past EOF yields
    /// an empty sequence and pins `position` at `row_count`.
    pub fn fetch(&self, direction: FetchDirection) -> Result<Vec<Tuple>, CursorError> {
        let mut s = self.state.lock();
        if !s.open {
            return Err(CursorError::CursorClosed(self.name.clone()));
        }
        let row_count = s.result_set.row_count();

        let backward_or_seek = matches!(
            direction,
            FetchDirection::Prior(_) | FetchDirection::First | FetchDirection::Absolute(_) | FetchDirection::Relative(_)
        );
        if backward_or_seek && !s.scrollable {
            return Err(CursorError::NotScrollable(self.name.clone()));
        }

        // First/Last/Absolute/Relative each seek then yield a single
        // tuple (spec §4.5: "yield one tuple" / "yield forward" from
        // the new position); Next/Prior yield a whole page of `n`.
        let (start, take): (usize, usize) = match direction {
            FetchDirection::Next(n) => (s.position, n as usize),
            FetchDirection::Prior(n) => (s.position.saturating_sub(n as usize), n as usize),
            FetchDirection::First => (0, 1),
            FetchDirection::Last => (row_count.saturating_sub(1), 1),
            FetchDirection::Absolute(k) => (k as usize, 1),
            FetchDirection::Relative(k) => ((s.position as i64 + k).max(0) as usize, 1),
        };

        let end = (start + take).min(row_count);
        let rows: Vec<Tuple> = if start >= row_count {
            Vec::new()
        } else {
            s.result_set.rows[start..end].to_vec()
        };

        s.position = match direction {
            FetchDirection::Last => row_count,
            _ => (start + rows.len()).min(row_count),
        };

        Ok(rows)
    }
}

struct Inner {
    cursors: HashMap<String, std::sync::Arc<Cursor>>,
    next_id: u64,
}

/// One mutex per manager guards the name→cursor map; each [`Cursor`]
/// additionally guards its own position/open state (spec §5).
pub struct CursorManager {
    inner: Mutex<Inner>,
}

impl Default for CursorManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CursorManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                cursors: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn open(
        &self,
        name: &str,
        result_set: ResultSet,
        scrollable: bool,
        holdable: bool,
    ) -> Result<std::sync::Arc<Cursor>, CursorError> {
        let mut inner = self.inner.lock();
        if inner.cursors.contains_key(name) {
            return Err(CursorError::DuplicateCursor(name.to_string()));
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let cursor = std::sync::Arc::new(Cursor {
            id,
            name: name.to_string(),
            state: Mutex::new(CursorState {
                result_set,
                position: 0,
                scrollable,
                holdable,
                open: true,
            }),
        });
        inner.cursors.insert(name.to_string(), cursor.clone());
        Ok(cursor)
    }

    pub fn close(&self, name: &str) -> Result<(), CursorError> {
        let mut inner = self.inner.lock();
        let cursor = inner.cursors.remove(name).ok_or_else(|| CursorError::CursorNotFound(name.to_string()))?;
        cursor.state.lock().open = false;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<Cursor>> {
        self.inner.lock().cursors.get(name).cloned()
    }

    /// Spec §4.5: commit calls `close_all(false)`; rollback calls
    /// `close_all(true)` (every cursor dies with an aborted transaction).
    pub fn close_all(&self, include_holdable: bool) {
        let mut inner = self.inner.lock();
        let victims: Vec<String> = inner
            .cursors
            .iter()
            .filter(|(_, c)| include_holdable || !c.holdable())
            .map(|(name, _)| name.clone())
            .collect();
        for name in victims {
            if let Some(cursor) = inner.cursors.remove(&name) {
                cursor.state.lock().open = false;
            }
        }
    }
}
