//! Uniform error envelope for the execution core.
//!
//! Mirrors the teacher's `DBError` convention: one top-level enum with
//! `#[from]` variants wrapping per-subsystem enums, so `?` composes
//! across module boundaries while still exposing a stable external
//! error code (spec §6) via [`DbError::code`].

use crate::value::ValueType;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("column `{0}` not found")]
    ColumnNotFound(String),
    #[error("index `{0}` not found on table `{1}`")]
    InvalidIndex(String, String),
    #[error("unsupported expression: `{0}`")]
    UnsupportedExpression(String),
    #[error("operator `{0}` is closed")]
    OperatorClosed(&'static str),
    #[error("query timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("memory budget exhausted: requested {requested}, available {available}")]
    InsufficientMemory { requested: usize, available: usize },
    #[error("type mismatch in `{op}`: left={left:?}, right={right:?}")]
    TypeMismatch {
        op: &'static str,
        left: ValueType,
        right: ValueType,
    },
    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("lock conflict on resource `{0}`")]
    LockConflict(String),
    #[error("lock acquisition on `{0}` timed out")]
    LockTimeout(String),
    #[error("deadlock detected, victim txn {victim}")]
    DeadlockDetected { victim: u64 },
    #[error("txn {txn} does not hold a lock on `{resource}`")]
    LockNotHeld { txn: u64, resource: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxnError {
    #[error("transaction {0} not found")]
    TxnNotFound(u64),
    #[error("invalid transaction state transition: {from:?} -> {to:?}")]
    InvalidTxnState { from: &'static str, to: &'static str },
    #[error("isolation violation: {0}")]
    IsolationViolation(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema `{0}` already exists")]
    SchemaExists(String),
    #[error("schema `{0}` not found")]
    SchemaNotFound(String),
    #[error("duplicate column `{0}`")]
    DuplicateColumn(String),
    #[error("foreign key target column `{table}.{column}` is missing")]
    FkTargetMissing { table: String, column: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("table `{0}` not found in catalog")]
    TableNotFound(String),
    #[error("index `{0}` not found in catalog")]
    IndexNotFound(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor `{0}` not found")]
    CursorNotFound(String),
    #[error("cursor `{0}` already closed")]
    CursorClosed(String),
    #[error("cursor `{0}` is not scrollable")]
    NotScrollable(String),
    #[error("cursor `{0}` already exists")]
    DuplicateCursor(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("io error reading page {page} of table `{table}`: {message}")]
    Io {
        table: String,
        page: u64,
        message: String,
    },
}

/// Top-level error for the execution core, composing every subsystem's
/// error enum. See spec §7 for the propagation policy per category.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("execution error: {0}")]
    Exec(#[from] ExecError),
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
    #[error("transaction error: {0}")]
    Txn(#[from] TxnError),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("cursor error: {0}")]
    Cursor(#[from] CursorError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("spill directory `{0}` unusable: {1}")]
    SpillDir(PathBuf, String),
}

impl DbError {
    /// Stable external error code, per spec §6.
    pub fn code(&self) -> &'static str {
        match self {
            DbError::Exec(e) => match e {
                ExecError::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
                ExecError::InvalidIndex(..) => "INVALID_INDEX",
                ExecError::UnsupportedExpression(_) => "UNSUPPORTED_EXPRESSION",
                ExecError::OperatorClosed(_) => "OPERATOR_CLOSED",
                ExecError::Timeout(_) => "TIMEOUT",
                ExecError::InsufficientMemory { .. } => "INSUFFICIENT_MEMORY",
                ExecError::TypeMismatch { .. } => "TYPE_MISMATCH",
                ExecError::DivisionByZero => "DIVISION_BY_ZERO",
            },
            DbError::Lock(e) => match e {
                LockError::LockConflict(_) => "LOCK_CONFLICT",
                LockError::LockTimeout(_) => "LOCK_TIMEOUT",
                LockError::DeadlockDetected { .. } => "DEADLOCK_DETECTED",
                LockError::LockNotHeld { .. } => "LOCK_NOT_HELD",
            },
            DbError::Txn(e) => match e {
                TxnError::TxnNotFound(_) => "TXN_NOT_FOUND",
                TxnError::InvalidTxnState { .. } => "INVALID_TXN_STATE",
                TxnError::IsolationViolation(_) => "ISOLATION_VIOLATION",
            },
            DbError::Schema(e) | DbError::Catalog(CatalogError::Schema(e)) => match e {
                SchemaError::SchemaExists(_) => "SCHEMA_EXISTS",
                SchemaError::SchemaNotFound(_) => "SCHEMA_NOT_FOUND",
                SchemaError::DuplicateColumn(_) => "DUPLICATE_COLUMN",
                SchemaError::FkTargetMissing { .. } => "FK_TARGET_MISSING",
            },
            DbError::Catalog(_) => "SCHEMA_NOT_FOUND",
            DbError::Cursor(_) => "OPERATOR_CLOSED",
            DbError::Storage(_) => "TIMEOUT",
            DbError::SpillDir(..) => "INSUFFICIENT_MEMORY",
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Wraps an error with the operator (or component) that raised it, for
/// diagnostics at the driver boundary (spec §7).
#[derive(Error, Debug, Clone)]
#[error("{op}: {message}")]
pub struct ExecutionError {
    pub op: String,
    pub message: String,
    #[source]
    pub cause: Option<Box<DbError>>,
}

impl ExecutionError {
    pub fn new(op: impl Into<String>, cause: DbError) -> Self {
        Self {
            op: op.into(),
            message: cause.to_string(),
            cause: Some(Box::new(cause)),
        }
    }
}
