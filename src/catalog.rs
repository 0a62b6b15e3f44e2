//! System catalog: table/index metadata and statistics (spec §4.4).
//!
//! Grounded on the teacher's `Catalog` aggregator in `db/catalog.rs`,
//! which layers table/sequence/index bookkeeping on top of the schema
//! definitions rather than duplicating them; this module keeps the same
//! split between [`crate::schema::SchemaManager`] (what a table looks
//! like) and `CatalogManager` (what a table currently measures).

use crate::error::{CatalogError, SchemaError};
use crate::schema::SchemaManager;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub table_id: u64,
    pub schema_name: String,
    pub owner: String,
    pub created_at: Instant,
    pub modified_at: Instant,
    pub row_count: u64,
    pub page_count: u64,
    pub data_size: u64,
    pub index_count: u32,
}

#[derive(Debug, Clone)]
pub struct IndexCatalogEntry {
    pub index_id: u64,
    pub table_name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
    pub leaf_page_count: u64,
    pub key_count: u64,
}

#[derive(Debug, Clone)]
pub struct Histogram {
    pub buckets: Vec<HistogramBucket>,
}

#[derive(Debug, Clone)]
pub struct HistogramBucket {
    pub lower: crate::value::Value,
    pub upper: crate::value::Value,
    pub count: u64,
    pub frequency: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ColumnStatistics {
    pub distinct_count: u64,
    pub null_count: u64,
    pub min: Option<crate::value::Value>,
    pub max: Option<crate::value::Value>,
    pub avg_size: f64,
    pub histogram: Option<Histogram>,
}

#[derive(Debug, Clone)]
pub struct TableStatistics {
    pub row_count: u64,
    pub page_count: u64,
    pub avg_row_size: f64,
    pub last_analyzed: Instant,
    pub columns: HashMap<String, ColumnStatistics>,
}

impl TableStatistics {
    fn empty() -> Self {
        Self {
            row_count: 0,
            page_count: 0,
            avg_row_size: 0.0,
            last_analyzed: Instant::now(),
            columns: HashMap::new(),
        }
    }
}

struct Inner {
    tables: HashMap<String, CatalogEntry>,
    indexes: HashMap<String, IndexCatalogEntry>,
    statistics: HashMap<String, TableStatistics>,
    next_table_id: u64,
    next_index_id: u64,
}

/// Layers on top of a [`SchemaManager`]: every catalog entry names a
/// schema that must already be registered (spec §4.4). Dropping a table
/// cascades to its indexes and statistics.
pub struct CatalogManager {
    schema: std::sync::Arc<SchemaManager>,
    inner: RwLock<Inner>,
}

impl CatalogManager {
    pub fn new(schema: std::sync::Arc<SchemaManager>) -> Self {
        Self {
            schema,
            inner: RwLock::new(Inner {
                tables: HashMap::new(),
                indexes: HashMap::new(),
                statistics: HashMap::new(),
                next_table_id: 1,
                next_index_id: 1,
            }),
        }
    }

    pub fn create_table(&self, name: &str, owner: &str) -> Result<(), CatalogError> {
        if !self.schema.exists(name) {
            return Err(CatalogError::Schema(SchemaError::SchemaNotFound(name.to_string())));
        }
        let mut inner = self.inner.write();
        let table_id = inner.next_table_id;
        inner.next_table_id += 1;
        let now = Instant::now();
        inner.tables.insert(
            name.to_string(),
            CatalogEntry {
                table_id,
                schema_name: name.to_string(),
                owner: owner.to_string(),
                created_at: now,
                modified_at: now,
                row_count: 0,
                page_count: 0,
                data_size: 0,
                index_count: 0,
            },
        );
        inner.statistics.insert(name.to_string(), TableStatistics::empty());
        Ok(())
    }

    /// Removes the table entry, every index catalogued against it, and
    /// its statistics in one pass (spec §4.4: "dropping a table
    /// cascades").
    pub fn drop_table(&self, name: &str) -> Result<(), CatalogError> {
        let mut inner = self.inner.write();
        inner.tables.remove(name).ok_or_else(|| CatalogError::TableNotFound(name.to_string()))?;
        inner.statistics.remove(name);
        inner.indexes.retain(|_, idx| idx.table_name != name);
        Ok(())
    }

    pub fn register_index(&self, table: &str, columns: Vec<String>, unique: bool, primary: bool) -> Result<u64, CatalogError> {
        let mut inner = self.inner.write();
        if !inner.tables.contains_key(table) {
            return Err(CatalogError::TableNotFound(table.to_string()));
        }
        let index_id = inner.next_index_id;
        inner.next_index_id += 1;
        let index_name = format!("{table}_idx_{index_id}");
        inner.indexes.insert(
            index_name,
            IndexCatalogEntry {
                index_id,
                table_name: table.to_string(),
                columns,
                unique,
                primary,
                leaf_page_count: 0,
                key_count: 0,
            },
        );
        if let Some(entry) = inner.tables.get_mut(table) {
            entry.index_count += 1;
            entry.modified_at = Instant::now();
        }
        Ok(index_id)
    }

    /// Bumps `modified_at` as part of the same write (spec §4.4).
    pub fn update_counts(&self, table: &str, row_count: u64, page_count: u64, data_size: u64) -> Result<(), CatalogError> {
        let mut inner = self.inner.write();
        let entry = inner.tables.get_mut(table).ok_or_else(|| CatalogError::TableNotFound(table.to_string()))?;
        entry.row_count = row_count;
        entry.page_count = page_count;
        entry.data_size = data_size;
        entry.modified_at = Instant::now();
        Ok(())
    }

    pub fn entry(&self, table: &str) -> Option<CatalogEntry> {
        self.inner.read().tables.get(table).cloned()
    }

    pub fn statistics(&self, table: &str) -> Option<TableStatistics> {
        let stats = self.inner.read().statistics.get(table).cloned();
        if stats.is_none() {
            log::warn!("no statistics recorded for table `{table}`; scan cost estimates will be unavailable");
        }
        stats
    }

    pub fn indexes_for(&self, table: &str) -> Vec<IndexCatalogEntry> {
        self.inner.read().indexes.values().filter(|i| i.table_name == table).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, TableSchema};
    use crate::value::ValueType;
    use std::sync::Arc;

    fn setup() -> (Arc<SchemaManager>, CatalogManager) {
        let schema = Arc::new(SchemaManager::new());
        schema
            .register(TableSchema {
                name: "orders".into(),
                columns: vec![ColumnDef {
                    name: "id".into(),
                    ty: ValueType::Int32,
                    nullable: false,
                }],
                primary_key: vec!["id".into()],
                foreign_keys: vec![],
                indexes: vec![],
                version: 0,
            })
            .unwrap();
        let catalog = CatalogManager::new(schema.clone());
        (schema, catalog)
    }

    #[test]
    fn create_table_requires_existing_schema() {
        let (schema, _) = setup();
        let catalog = CatalogManager::new(schema);
        let err = catalog.create_table("missing", "alice").unwrap_err();
        assert!(matches!(err, CatalogError::Schema(SchemaError::SchemaNotFound(_))));
    }

    #[test]
    fn drop_cascades_to_indexes_and_statistics() {
        let (_, catalog) = setup();
        catalog.create_table("orders", "alice").unwrap();
        catalog.register_index("orders", vec!["id".into()], true, true).unwrap();
        assert_eq!(catalog.entry("orders").unwrap().index_count, 1);

        catalog.drop_table("orders").unwrap();
        assert!(catalog.entry("orders").is_none());
        assert!(catalog.statistics("orders").is_none());
        assert!(catalog.indexes_for("orders").is_empty());
    }

    #[test]
    fn update_counts_bumps_modified_at() {
        let (_, catalog) = setup();
        catalog.create_table("orders", "alice").unwrap();
        let before = catalog.entry("orders").unwrap().modified_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        catalog.update_counts("orders", 10, 2, 4096).unwrap();
        let after = catalog.entry("orders").unwrap();
        assert_eq!(after.row_count, 10);
        assert!(after.modified_at > before);
    }
}
