//! Execution engine core: an operator pipeline, a multi-granularity lock
//! manager, a transaction coordinator, and the schema/catalog/cursor
//! registries that serve them.
//!
//! This crate consumes an already-optimized physical plan (see
//! [`plan`]) and a pluggable storage layer (see [`storage`]); it does
//! not parse, analyze, or optimize SQL, and it does not implement
//! storage or write-ahead logging itself.

pub mod catalog;
pub mod config;
pub mod cursor;
pub mod error;
pub mod expr;
pub mod lock;
pub mod operator;
pub mod plan;
pub mod relation;
pub mod schema;
pub mod storage;
pub mod tuple;
pub mod txn;
pub mod value;

pub use config::EngineConfig;
pub use error::DbError;
pub use tuple::{ColumnInfo, Tuple, TupleSchema};
pub use value::Value;
