//! Tagged sum-type for runtime tuple values.
//!
//! Replaces the dynamically-typed `interface{}`-style value the source
//! system used (spec §9): every variant is known statically, so
//! comparison and arithmetic are implemented per-variant instead of via
//! runtime type assertions.

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum ValueType {
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bool,
    Date,
    Timestamp,
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Bool(bool),
    /// Days since the Unix epoch.
    Date(i32),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::I32(_) => ValueType::Int32,
            Value::I64(_) => ValueType::Int64,
            Value::F32(_) => ValueType::Float32,
            Value::F64(_) => ValueType::Float64,
            Value::Str(_) => ValueType::String,
            Value::Bool(_) => ValueType::Bool,
            Value::Date(_) => ValueType::Date,
            Value::Timestamp(_) => ValueType::Timestamp,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric promotion rank used by arithmetic and comparison:
    /// int32 -> int64 -> float32 -> float64 (spec §4.1.5).
    fn numeric_rank(&self) -> Option<u8> {
        match self {
            Value::I32(_) => Some(0),
            Value::I64(_) => Some(1),
            Value::F32(_) => Some(2),
            Value::F64(_) => Some(3),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I32(v) => Some(*v as f64),
            Value::I64(v) => Some(*v as f64),
            Value::F32(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Canonical byte encoding used as a hash-join / hash-aggregate key
    /// (spec §9: replaces `interface{}`-keyed maps with a well-typed
    /// encoding). NULL values never equal any other encoding.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Value::Null => buf.push(0),
            Value::I32(v) => {
                buf.push(1);
                buf.extend_from_slice(&(*v as i64).to_be_bytes());
            }
            Value::I64(v) => {
                buf.push(1);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            Value::F32(v) => {
                buf.push(2);
                buf.extend_from_slice(&(*v as f64).to_be_bytes());
            }
            Value::F64(v) => {
                buf.push(2);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            Value::Str(s) => {
                buf.push(3);
                buf.extend_from_slice(s.as_bytes());
            }
            Value::Bool(b) => {
                buf.push(4);
                buf.push(*b as u8);
            }
            Value::Date(d) => {
                buf.push(5);
                buf.extend_from_slice(&d.to_be_bytes());
            }
            Value::Timestamp(t) => {
                buf.push(6);
                buf.extend_from_slice(&t.to_be_bytes());
            }
        }
        buf
    }

    /// Three-valued comparison: `None` propagates NULL per SQL semantics.
    pub fn partial_cmp_sql(&self, other: &Value) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => {
                let (a, b) = (self.as_f64()?, other.as_f64()?);
                a.partial_cmp(&b)
            }
        }
    }

    fn promoted_numeric_op(
        &self,
        other: &Value,
        op: &'static str,
        i_op: impl Fn(i64, i64) -> Option<i64>,
        f_op: impl Fn(f64, f64) -> f64,
    ) -> Result<Value, crate::error::ExecError> {
        use crate::error::ExecError;
        let (Some(ra), Some(rb)) = (self.numeric_rank(), other.numeric_rank()) else {
            return Err(ExecError::TypeMismatch {
                op,
                left: self.value_type(),
                right: other.value_type(),
            });
        };
        if ra <= 1 && rb <= 1 {
            // Both integral: wraps per declared-column semantics, spec §4.1.5.
            let (a, b) = (self.as_f64().unwrap() as i64, other.as_f64().unwrap() as i64);
            if let Some(v) = i_op(a, b) {
                return Ok(if ra == 0 && rb == 0 && v >= i32::MIN as i64 && v <= i32::MAX as i64 {
                    Value::I32(v as i32)
                } else {
                    Value::I64(v)
                });
            }
            return Err(ExecError::DivisionByZero);
        }
        let (a, b) = (self.as_f64().unwrap(), other.as_f64().unwrap());
        Ok(Value::F64(f_op(a, b)))
    }

    pub fn add(&self, other: &Value) -> Result<Value, crate::error::ExecError> {
        self.promoted_numeric_op(other, "+", |a, b| a.checked_add(b).or(Some(a.wrapping_add(b))), |a, b| a + b)
    }

    pub fn sub(&self, other: &Value) -> Result<Value, crate::error::ExecError> {
        self.promoted_numeric_op(other, "-", |a, b| a.checked_sub(b).or(Some(a.wrapping_sub(b))), |a, b| a - b)
    }

    pub fn mul(&self, other: &Value) -> Result<Value, crate::error::ExecError> {
        self.promoted_numeric_op(other, "*", |a, b| a.checked_mul(b).or(Some(a.wrapping_mul(b))), |a, b| a * b)
    }

    pub fn div(&self, other: &Value) -> Result<Value, crate::error::ExecError> {
        use crate::error::ExecError;
        if let Some(b) = other.as_f64() {
            if b == 0.0 {
                return Err(ExecError::DivisionByZero);
            }
        }
        self.promoted_numeric_op(
            other,
            "/",
            |a, b| if b == 0 { None } else { Some(a / b) },
            |a, b| a / b,
        )
    }

    pub fn rem(&self, other: &Value) -> Result<Value, crate::error::ExecError> {
        self.promoted_numeric_op(
            other,
            "%",
            |a, b| if b == 0 { None } else { Some(a % b) },
            |a, b| a % b,
        )
    }

    pub fn neg(&self) -> Result<Value, crate::error::ExecError> {
        use crate::error::ExecError;
        match self {
            Value::I32(v) => Ok(Value::I32(v.wrapping_neg())),
            Value::I64(v) => Ok(Value::I64(v.wrapping_neg())),
            Value::F32(v) => Ok(Value::F32(-v)),
            Value::F64(v) => Ok(Value::F64(-v)),
            Value::Null => Ok(Value::Null),
            other => Err(ExecError::TypeMismatch {
                op: "-",
                left: other.value_type(),
                right: other.value_type(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Date(v) => write!(f, "date({v})"),
            Value::Timestamp(v) => write!(f, "ts({v})"),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_propagates_through_comparison() {
        assert_eq!(Value::Null.partial_cmp_sql(&Value::I32(1)), None);
        assert_eq!(Value::I32(1).partial_cmp_sql(&Value::Null), None);
    }

    #[test]
    fn numeric_promotion_int_to_float() {
        let v = Value::I32(3).add(&Value::F64(0.5)).unwrap();
        assert_eq!(v, Value::F64(3.5));
    }

    #[test]
    fn division_by_zero_errors() {
        assert!(Value::I32(1).div(&Value::I32(0)).is_err());
        assert!(Value::F64(1.0).div(&Value::F64(0.0)).is_err());
    }

    #[test]
    fn canonical_bytes_distinguish_null() {
        assert_ne!(Value::Null.canonical_bytes(), Value::I32(0).canonical_bytes());
    }
}
