//! Tuples and their schemas (spec §3).

use crate::value::{Value, ValueType};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

/// A single column's metadata within a [`TupleSchema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub ty: ValueType,
    pub nullable: bool,
    pub table_qualifier: Option<String>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
            table_qualifier: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn qualified(mut self, table: impl Into<String>) -> Self {
        self.table_qualifier = Some(table.into());
        self
    }
}

/// An immutable, ordered list of columns with O(1) name lookup.
///
/// Schemas are built once and shared (`Arc`) across every tuple that
/// inhabits them and across pipeline stages that retain tuples (hash
/// tables, sort buffers, result materialization) per spec §3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleSchema {
    columns: Arc<Vec<ColumnInfo>>,
    index_of: Arc<HashMap<String, usize>>,
}

impl TupleSchema {
    /// Builds a schema. On an unqualified-name collision, the first
    /// occurrence wins; callers that need collision-free lookup should
    /// qualify columns upstream (spec §3).
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        let mut index_of = HashMap::with_capacity(columns.len());
        for (i, c) in columns.iter().enumerate() {
            index_of.entry(c.name.clone()).or_insert(i);
        }
        Self {
            columns: Arc::new(columns),
            index_of: Arc::new(index_of),
        }
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index_of.get(name).copied()
    }

    /// Two schemas are compatible iff same length and pairwise-equal
    /// types (names may differ) — spec §3.
    pub fn compatible_with(&self, other: &TupleSchema) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|(a, b)| a.ty == b.ty)
    }

    /// Builds the concatenated schema used by join operators (spec §4.1.3).
    pub fn concat(left: &TupleSchema, right: &TupleSchema) -> TupleSchema {
        let mut cols = (*left.columns).clone();
        cols.extend((*right.columns).clone());
        TupleSchema::new(cols)
    }
}

/// An ordered sequence of values bound to a [`TupleSchema`].
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    pub values: SmallVec<[Value; 8]>,
}

impl Tuple {
    pub fn new(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn get_by_name<'a>(&'a self, schema: &TupleSchema, name: &str) -> Option<&'a Value> {
        schema.index_of(name).and_then(|i| self.values.get(i))
    }

    pub fn concat(left: Tuple, right: Tuple) -> Tuple {
        let mut values = left.values;
        values.extend(right.values);
        Tuple { values }
    }

    /// An all-NULL tuple matching `schema`'s arity, used by outer joins
    /// for the unmatched side (spec §4.1.3).
    pub fn nulls(schema: &TupleSchema) -> Tuple {
        Tuple::new(std::iter::repeat(Value::Null).take(schema.len()))
    }

    pub fn canonical_key(&self, cols: &[usize]) -> Vec<u8> {
        let mut buf = Vec::new();
        for &c in cols {
            buf.extend_from_slice(&self.values[c].canonical_bytes());
            buf.push(0xff); // separator
        }
        buf
    }

    /// NULL keys never match in equi-joins/group-by (SQL semantics,
    /// spec §4.1.3); this reports whether any key column is NULL.
    pub fn key_has_null(&self, cols: &[usize]) -> bool {
        cols.iter().any(|&c| self.values[c].is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TupleSchema {
        TupleSchema::new(vec![
            ColumnInfo::new("id", ValueType::Int32),
            ColumnInfo::new("age", ValueType::Int32),
        ])
    }

    #[test]
    fn lookup_by_name_is_first_match_on_collision() {
        let s = TupleSchema::new(vec![
            ColumnInfo::new("id", ValueType::Int32).qualified("a"),
            ColumnInfo::new("id", ValueType::Int32).qualified("b"),
        ]);
        assert_eq!(s.index_of("id"), Some(0));
    }

    #[test]
    fn compatible_schemas_ignore_names() {
        let a = schema();
        let b = TupleSchema::new(vec![
            ColumnInfo::new("x", ValueType::Int32),
            ColumnInfo::new("y", ValueType::Int32),
        ]);
        assert!(a.compatible_with(&b));
    }

    #[test]
    fn concat_tuple_matches_concat_schema() {
        let s = schema();
        let cs = TupleSchema::concat(&s, &s);
        let t = Tuple::concat(Tuple::new([Value::I32(1), Value::I32(2)]), Tuple::new([Value::I32(3), Value::I32(4)]));
        assert_eq!(t.values.len(), cs.len());
    }
}
