//! External collaborator interfaces (spec §6): the storage engine and
//! the write-ahead log. Both are consumed only — their implementations
//! live outside this crate.

pub use crate::error::StorageError;
use crate::tuple::Tuple;
use std::fmt;

pub type PageId = u64;
pub type RowId = u64;

#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    pub tuples: Vec<(RowId, Tuple, bool /* deleted */)>,
}

/// Narrow trait boundary onto the storage engine + buffer pool,
/// mirroring the teacher's pattern of depending on an external
/// durability crate through a trait rather than inlining page format.
pub trait StorageEngine: Send + Sync {
    fn read_page(&self, table: &str, page_id: PageId) -> Result<Page, StorageError>;
    fn allocate_page(&self, table: &str) -> Result<PageId, StorageError>;
    fn deallocate_page(&self, table: &str, page_id: PageId) -> Result<(), StorageError>;
    fn write_page(&self, page: &Page) -> Result<(), StorageError>;
    fn pin(&self, table: &str, page_id: PageId);
    fn unpin(&self, table: &str, page_id: PageId);
    /// Ordered page ids for a full scan of `table`.
    fn scan_iterator(&self, table: &str) -> Result<Vec<PageId>, StorageError>;
    fn index_seek(&self, table: &str, index: &str, key: &crate::value::Value) -> Result<Option<RowId>, StorageError>;
    fn index_range(
        &self,
        table: &str,
        index: &str,
        lo: Option<&crate::value::Value>,
        hi: Option<&crate::value::Value>,
    ) -> Result<Vec<RowId>, StorageError>;
    fn fetch_row(&self, table: &str, row_id: RowId) -> Result<Tuple, StorageError>;
}

pub type Lsn = u64;

/// A no-op record the WAL hook exchanges with its caller; the real
/// payload format is defined by the (external) WAL implementation.
#[derive(Debug, Clone)]
pub struct WalRecord {
    pub lsn: Lsn,
    pub description: String,
}

impl fmt::Display for WalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lsn={} {}", self.lsn, self.description)
    }
}

/// WAL hook consumed by the transaction coordinator (spec §4.3/§6).
/// The commit path calls `flush_up_to` synchronously before
/// transitioning to `Committed`; rollback calls `emit_undo` in reverse
/// operation order.
pub trait Wal: Send + Sync {
    fn append(&self, record: WalRecord) -> Result<Lsn, StorageError>;
    fn flush_up_to(&self, lsn: Lsn) -> Result<(), StorageError>;
    fn emit_undo(&self, operation_description: &str) -> Result<WalRecord, StorageError>;
}
