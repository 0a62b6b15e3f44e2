//! Shared fixtures for the crate-level end-to-end scenario tests (spec
//! §8). `FakeStorage` implements the `StorageEngine` trait from §6
//! purely in terms of `Vec<Tuple>`, one page per table; `FakeWal`
//! always succeeds so commit/rollback tests exercise the coordinator's
//! state machine rather than WAL failure handling.

use dbcore_exec::error::StorageError;
use dbcore_exec::storage::{Lsn, Page, PageId, RowId, StorageEngine, Wal, WalRecord};
use dbcore_exec::tuple::Tuple;
use dbcore_exec::value::Value;
use std::collections::HashMap;
use std::sync::Mutex;

pub struct FakeStorage {
    tables: Mutex<HashMap<String, Vec<Tuple>>>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_table(self, name: &str, rows: Vec<Tuple>) -> Self {
        self.tables.lock().unwrap().insert(name.to_string(), rows);
        self
    }
}

impl StorageEngine for FakeStorage {
    fn read_page(&self, table: &str, _page_id: PageId) -> Result<Page, StorageError> {
        let rows = self.tables.lock().unwrap().get(table).cloned().unwrap_or_default();
        Ok(Page {
            id: 0,
            tuples: rows.into_iter().enumerate().map(|(i, t)| (i as RowId, t, false)).collect(),
        })
    }

    fn allocate_page(&self, _table: &str) -> Result<PageId, StorageError> {
        Ok(0)
    }

    fn deallocate_page(&self, _table: &str, _page_id: PageId) -> Result<(), StorageError> {
        Ok(())
    }

    fn write_page(&self, _page: &Page) -> Result<(), StorageError> {
        Ok(())
    }

    fn pin(&self, _table: &str, _page_id: PageId) {}
    fn unpin(&self, _table: &str, _page_id: PageId) {}

    fn scan_iterator(&self, _table: &str) -> Result<Vec<PageId>, StorageError> {
        Ok(vec![0])
    }

    fn index_seek(&self, _table: &str, _index: &str, _key: &Value) -> Result<Option<RowId>, StorageError> {
        Ok(None)
    }

    fn index_range(
        &self,
        _table: &str,
        _index: &str,
        _lo: Option<&Value>,
        _hi: Option<&Value>,
    ) -> Result<Vec<RowId>, StorageError> {
        Ok(Vec::new())
    }

    fn fetch_row(&self, table: &str, row_id: RowId) -> Result<Tuple, StorageError> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .and_then(|rows| rows.get(row_id as usize).cloned())
            .ok_or_else(|| StorageError::Io {
                table: table.to_string(),
                page: 0,
                message: "row not found".into(),
            })
    }
}

pub struct FakeWal;

impl Wal for FakeWal {
    fn append(&self, record: WalRecord) -> Result<Lsn, StorageError> {
        Ok(record.lsn + 1)
    }

    fn flush_up_to(&self, _lsn: Lsn) -> Result<(), StorageError> {
        Ok(())
    }

    fn emit_undo(&self, operation_description: &str) -> Result<WalRecord, StorageError> {
        Ok(WalRecord {
            lsn: 0,
            description: operation_description.to_string(),
        })
    }
}
