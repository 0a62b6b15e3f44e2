//! Table schema registry (spec §4.4).
//!
//! Grounded on the teacher's `Typespace`/`ModuleDef` validation pattern
//! (schema is validated once at registration, not re-checked by every
//! caller) and its `RawTableDefV9` column/index layout, adapted to this
//! crate's column/index/foreign-key vocabulary.

use crate::error::SchemaError;
use crate::value::ValueType;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum OnDeleteAction {
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum OnUpdateAction {
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub name: String,
    pub local_columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: OnDeleteAction,
    pub on_update: OnUpdateAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum IndexType {
    BTree,
    Hash,
    FullText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub index_type: IndexType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ValueType,
    pub nullable: bool,
}

/// A named table definition (spec §3). Schemas are immutable once
/// built; [`SchemaManager::update`] replaces the whole definition and
/// bumps `version` rather than mutating columns in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexDef>,
    pub version: u32,
}

impl TableSchema {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Spec §4.4: "≥ 1 column, unique column names, PK/FK/index columns
    /// exist".
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.columns.is_empty() {
            return Err(SchemaError::DuplicateColumn("<table has no columns>".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for c in &self.columns {
            if !seen.insert(c.name.as_str()) {
                return Err(SchemaError::DuplicateColumn(c.name.clone()));
            }
        }
        for pk in &self.primary_key {
            if !self.has_column(pk) {
                return Err(SchemaError::FkTargetMissing {
                    table: self.name.clone(),
                    column: pk.clone(),
                });
            }
        }
        for fk in &self.foreign_keys {
            for col in &fk.local_columns {
                if !self.has_column(col) {
                    return Err(SchemaError::FkTargetMissing {
                        table: self.name.clone(),
                        column: col.clone(),
                    });
                }
            }
        }
        for idx in &self.indexes {
            for col in &idx.columns {
                if !self.has_column(col) {
                    return Err(SchemaError::FkTargetMissing {
                        table: self.name.clone(),
                        column: col.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

struct Inner {
    tables: HashMap<String, TableSchema>,
    versions: HashMap<String, u32>,
}

/// Guarded by one reader/writer lock (spec §4.4, §5): registration,
/// update, and drop take the writer side; lookups take the reader side.
pub struct SchemaManager {
    inner: RwLock<Inner>,
}

impl Default for SchemaManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                tables: HashMap::new(),
                versions: HashMap::new(),
            }),
        }
    }

    pub fn register(&self, mut schema: TableSchema) -> Result<(), SchemaError> {
        schema.validate()?;
        let mut inner = self.inner.write();
        if inner.tables.contains_key(&schema.name) {
            return Err(SchemaError::SchemaExists(schema.name));
        }
        schema.version = 1;
        inner.versions.insert(schema.name.clone(), 1);
        inner.tables.insert(schema.name.clone(), schema);
        Ok(())
    }

    pub fn update(&self, mut schema: TableSchema) -> Result<(), SchemaError> {
        schema.validate()?;
        let mut inner = self.inner.write();
        let next_version = inner
            .versions
            .get(&schema.name)
            .copied()
            .ok_or_else(|| SchemaError::SchemaNotFound(schema.name.clone()))?
            + 1;
        schema.version = next_version;
        inner.versions.insert(schema.name.clone(), next_version);
        inner.tables.insert(schema.name.clone(), schema);
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> Result<TableSchema, SchemaError> {
        let mut inner = self.inner.write();
        inner.versions.remove(name);
        inner.tables.remove(name).ok_or_else(|| SchemaError::SchemaNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<TableSchema> {
        self.inner.read().tables.get(name).cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.inner.read().tables.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(name: &str, cols: &[&str]) -> TableSchema {
        TableSchema {
            name: name.into(),
            columns: cols
                .iter()
                .map(|c| ColumnDef {
                    name: c.to_string(),
                    ty: ValueType::Int32,
                    nullable: true,
                })
                .collect(),
            primary_key: vec![],
            foreign_keys: vec![],
            indexes: vec![],
            version: 0,
        }
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let mgr = SchemaManager::new();
        mgr.register(t("orders", &["id", "total"])).unwrap();
        let err = mgr.register(t("orders", &["id"])).unwrap_err();
        assert!(matches!(err, SchemaError::SchemaExists(_)));
    }

    #[test]
    fn register_rejects_missing_pk_column() {
        let mgr = SchemaManager::new();
        let mut s = t("orders", &["id"]);
        s.primary_key = vec!["does_not_exist".into()];
        let err = mgr.register(s).unwrap_err();
        assert!(matches!(err, SchemaError::FkTargetMissing { .. }));
    }

    #[test]
    fn update_increments_version() {
        let mgr = SchemaManager::new();
        mgr.register(t("orders", &["id"])).unwrap();
        assert_eq!(mgr.get("orders").unwrap().version, 1);
        mgr.update(t("orders", &["id", "total"])).unwrap();
        assert_eq!(mgr.get("orders").unwrap().version, 2);
    }

    #[test]
    fn drop_removes_entry() {
        let mgr = SchemaManager::new();
        mgr.register(t("orders", &["id"])).unwrap();
        mgr.drop_table("orders").unwrap();
        assert!(!mgr.exists("orders"));
    }
}
