//! Expression trees and their evaluator (spec §4.1.5).

use crate::error::ExecError;
use crate::tuple::{Tuple, TupleSchema};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    ColumnRef(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    FunctionCall(String, Vec<Expr>),
}

/// SQL three-valued logic: `Unknown` is the NULL result of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tri {
    True,
    False,
    Unknown,
}

impl Tri {
    pub fn from_bool_value(v: &Value) -> Tri {
        match v {
            Value::Bool(true) => Tri::True,
            Value::Bool(false) => Tri::False,
            Value::Null => Tri::Unknown,
            _ => Tri::Unknown,
        }
    }

    fn and(self, other: Tri) -> Tri {
        use Tri::*;
        match (self, other) {
            (False, _) | (_, False) => False,
            (True, True) => True,
            _ => Unknown,
        }
    }

    fn or(self, other: Tri) -> Tri {
        use Tri::*;
        match (self, other) {
            (True, _) | (_, True) => True,
            (False, False) => False,
            _ => Unknown,
        }
    }

    fn not(self) -> Tri {
        match self {
            Tri::True => Tri::False,
            Tri::False => Tri::True,
            Tri::Unknown => Tri::Unknown,
        }
    }

    pub fn to_value(self) -> Value {
        match self {
            Tri::True => Value::Bool(true),
            Tri::False => Value::Bool(false),
            Tri::Unknown => Value::Null,
        }
    }

    /// Unknown is treated as False, matching SQL WHERE semantics
    /// (spec §4.1.2).
    pub fn as_where_bool(self) -> bool {
        matches!(self, Tri::True)
    }
}

impl Expr {
    pub fn eval(&self, schema: &TupleSchema, tuple: &Tuple) -> Result<Value, ExecError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::ColumnRef(name) => {
                let idx = schema
                    .index_of(name)
                    .ok_or_else(|| ExecError::ColumnNotFound(name.clone()))?;
                Ok(tuple.get(idx).cloned().unwrap_or(Value::Null))
            }
            Expr::Unary(op, operand) => Self::eval_unary(*op, operand, schema, tuple),
            Expr::Binary(op, l, r) => Self::eval_binary(*op, l, r, schema, tuple),
            Expr::FunctionCall(name, args) => Self::eval_function(name, args, schema, tuple),
        }
    }

    /// Evaluates this expression as a WHERE-style predicate, collapsing
    /// Unknown to False (spec §4.1.2).
    pub fn eval_predicate(&self, schema: &TupleSchema, tuple: &Tuple) -> Result<bool, ExecError> {
        let v = self.eval(schema, tuple)?;
        Ok(Tri::from_bool_value(&v).as_where_bool())
    }

    fn eval_unary(op: UnaryOp, operand: &Expr, schema: &TupleSchema, tuple: &Tuple) -> Result<Value, ExecError> {
        match op {
            UnaryOp::IsNull => {
                let v = operand.eval(schema, tuple)?;
                Ok(Value::Bool(v.is_null()))
            }
            UnaryOp::IsNotNull => {
                let v = operand.eval(schema, tuple)?;
                Ok(Value::Bool(!v.is_null()))
            }
            UnaryOp::Not => {
                let v = operand.eval(schema, tuple)?;
                Ok(Tri::from_bool_value(&v).not().to_value())
            }
            UnaryOp::Neg => {
                let v = operand.eval(schema, tuple)?;
                Ok(v.neg()?)
            }
        }
    }

    fn eval_binary(op: BinaryOp, l: &Expr, r: &Expr, schema: &TupleSchema, tuple: &Tuple) -> Result<Value, ExecError> {
        // AND/OR short-circuit per spec §4.1.5.
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let lv = Tri::from_bool_value(&l.eval(schema, tuple)?);
            return match op {
                BinaryOp::And if lv == Tri::False => Ok(Tri::False.to_value()),
                BinaryOp::Or if lv == Tri::True => Ok(Tri::True.to_value()),
                _ => {
                    let rv = Tri::from_bool_value(&r.eval(schema, tuple)?);
                    Ok(match op {
                        BinaryOp::And => lv.and(rv),
                        BinaryOp::Or => lv.or(rv),
                        _ => unreachable!(),
                    }
                    .to_value())
                }
            };
        }

        let lv = l.eval(schema, tuple)?;
        let rv = r.eval(schema, tuple)?;

        match op {
            BinaryOp::Add => lv.add(&rv),
            BinaryOp::Sub => lv.sub(&rv),
            BinaryOp::Mul => lv.mul(&rv),
            BinaryOp::Div => lv.div(&rv),
            BinaryOp::Mod => lv.rem(&rv),
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                Ok(Self::eval_comparison(op, &lv, &rv))
            }
            BinaryOp::And | BinaryOp::Or => unreachable!(),
        }
    }

    fn eval_comparison(op: BinaryOp, lv: &Value, rv: &Value) -> Value {
        if lv.is_null() || rv.is_null() {
            return Value::Null;
        }
        let ord = match lv.partial_cmp_sql(rv) {
            Some(o) => o,
            None => return Value::Null,
        };
        use std::cmp::Ordering::*;
        let b = match op {
            BinaryOp::Eq => ord == Equal,
            BinaryOp::Ne => ord != Equal,
            BinaryOp::Lt => ord == Less,
            BinaryOp::Le => ord != Greater,
            BinaryOp::Gt => ord == Greater,
            BinaryOp::Ge => ord != Less,
            _ => unreachable!(),
        };
        Value::Bool(b)
    }

    fn eval_function(name: &str, args: &[Expr], schema: &TupleSchema, tuple: &Tuple) -> Result<Value, ExecError> {
        let vals: Vec<Value> = args
            .iter()
            .map(|a| a.eval(schema, tuple))
            .collect::<Result<_, _>>()?;
        match name.to_ascii_uppercase().as_str() {
            "UPPER" => match vals.first() {
                Some(Value::Str(s)) => Ok(Value::Str(s.to_uppercase())),
                Some(Value::Null) | None => Ok(Value::Null),
                Some(other) => Err(ExecError::TypeMismatch {
                    op: "UPPER",
                    left: other.value_type(),
                    right: other.value_type(),
                }),
            },
            "LOWER" => match vals.first() {
                Some(Value::Str(s)) => Ok(Value::Str(s.to_lowercase())),
                Some(Value::Null) | None => Ok(Value::Null),
                Some(other) => Err(ExecError::TypeMismatch {
                    op: "LOWER",
                    left: other.value_type(),
                    right: other.value_type(),
                }),
            },
            "SUBSTRING" => {
                let (Some(Value::Str(s)), Some(start)) = (vals.first(), vals.get(1)) else {
                    return Ok(Value::Null);
                };
                let start = match start {
                    Value::I32(v) => (*v).max(1) as usize - 1,
                    Value::I64(v) => (*v).max(1) as usize - 1,
                    _ => 0,
                };
                let len = match vals.get(2) {
                    Some(Value::I32(v)) => Some(*v as usize),
                    Some(Value::I64(v)) => Some(*v as usize),
                    _ => None,
                };
                let chars: Vec<char> = s.chars().collect();
                let end = len.map(|l| (start + l).min(chars.len())).unwrap_or(chars.len());
                let start = start.min(chars.len());
                Ok(Value::Str(chars[start..end.max(start)].iter().collect()))
            }
            "COALESCE" => Ok(vals.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null)),
            other => Err(ExecError::UnsupportedExpression(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::ColumnInfo;
    use crate::value::ValueType;

    fn schema() -> TupleSchema {
        TupleSchema::new(vec![ColumnInfo::new("age", ValueType::Int32)])
    }

    #[test]
    fn true_and_unknown_is_unknown() {
        assert_eq!(Tri::True.and(Tri::Unknown), Tri::Unknown);
    }

    #[test]
    fn false_and_unknown_is_false() {
        assert_eq!(Tri::False.and(Tri::Unknown), Tri::False);
    }

    #[test]
    fn true_or_unknown_is_true() {
        assert_eq!(Tri::True.or(Tri::Unknown), Tri::True);
    }

    #[test]
    fn unknown_or_unknown_is_unknown() {
        assert_eq!(Tri::Unknown.or(Tri::Unknown), Tri::Unknown);
    }

    #[test]
    fn predicate_treats_unknown_as_false() {
        let e = Expr::Binary(
            BinaryOp::Gt,
            Box::new(Expr::ColumnRef("age".into())),
            Box::new(Expr::Literal(Value::Null)),
        );
        let t = Tuple::new([Value::I32(30)]);
        assert!(!e.eval_predicate(&schema(), &t).unwrap());
    }

    #[test]
    fn coalesce_returns_first_non_null() {
        let e = Expr::FunctionCall("COALESCE".into(), vec![Expr::Literal(Value::Null), Expr::Literal(Value::I32(7))]);
        assert_eq!(e.eval(&schema(), &Tuple::new([Value::Null])).unwrap(), Value::I32(7));
    }
}
