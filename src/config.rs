//! Engine tunables (SPEC_FULL.md §C). Plain data, constructor-injected;
//! no file or CLI parsing lives in this crate (spec §1).

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-operator working-memory budget before a hash/sort operator
    /// spills to disk (spec §4.1.4/§4.1.5).
    pub work_mem_bytes: usize,
    /// Tuples pulled per driver batch; the soft result cap is
    /// `batch_size * 100` (spec §4.1).
    pub batch_size: usize,
    /// 0 disables the query-level wall-clock timeout.
    pub query_timeout: Duration,
    pub lock_timeout: Duration,
    pub txn_timeout: Duration,
    pub spill_dir: PathBuf,
}

impl EngineConfig {
    pub fn soft_result_cap(&self) -> usize {
        self.batch_size.saturating_mul(100)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_mem_bytes: 16 * 1024 * 1024,
            batch_size: 1024,
            query_timeout: Duration::ZERO,
            lock_timeout: Duration::from_secs(10),
            txn_timeout: Duration::from_secs(60),
            spill_dir: std::env::temp_dir(),
        }
    }
}
