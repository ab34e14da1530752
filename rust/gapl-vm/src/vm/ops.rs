//! Arithmetic, comparison and boolean operators.
//!
//! Operands must have the same kind; there is no implicit promotion.

use super::{ExecutionContext, VmError};
use gapl_core::{OpCode, Value};
use std::cmp::Ordering;

pub(crate) fn arithmetic(op: OpCode, a: &Value, b: &Value) -> Result<Value, VmError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => int_arithmetic(op, *x, *y).map(Value::Int),
        (Value::Float(x), Value::Float(y)) => float_arithmetic(op, *x, *y).map(Value::Float),
        _ => Err(VmError::type_error(
            op.to_string(),
            format!("operands {} and {}", a.kind(), b.kind()),
        )),
    }
}

fn int_arithmetic(op: OpCode, x: i64, y: i64) -> Result<i64, VmError> {
    let overflow = || VmError::Arithmetic(format!("integer overflow in {}", op));
    match op {
        OpCode::Add => x.checked_add(y).ok_or_else(overflow),
        OpCode::Sub => x.checked_sub(y).ok_or_else(overflow),
        OpCode::Mul => x.checked_mul(y).ok_or_else(overflow),
        OpCode::Div | OpCode::Mod if y == 0 => Err(VmError::Arithmetic("division by zero".into())),
        OpCode::Div => x.checked_div(y).ok_or_else(overflow),
        OpCode::Mod => x.checked_rem(y).ok_or_else(overflow),
        OpCode::BitOr => Ok(x | y),
        OpCode::BitAnd => Ok(x & y),
        _ => Err(VmError::type_error(op.to_string(), "not an arithmetic operator")),
    }
}

fn float_arithmetic(op: OpCode, x: f64, y: f64) -> Result<f64, VmError> {
    match op {
        OpCode::Add => Ok(x + y),
        OpCode::Sub => Ok(x - y),
        OpCode::Mul => Ok(x * y),
        OpCode::Div if y == 0.0 => Err(VmError::Arithmetic("division by zero".into())),
        OpCode::Div => Ok(x / y),
        _ => Err(VmError::type_error(op.to_string(), "operands real and real")),
    }
}

pub(crate) fn compare(op: OpCode, a: &Value, b: &Value) -> Result<bool, VmError> {
    let ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.partial_cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.partial_cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.partial_cmp(y),
        (Value::String(x), Value::String(y))
        | (Value::Identifier(x), Value::Identifier(y))
        | (Value::TypedIdentifier(x), Value::TypedIdentifier(y)) => x.partial_cmp(y),
        _ => {
            return Err(VmError::type_error(
                op.to_string(),
                format!("cannot compare {} with {}", a.kind(), b.kind()),
            ))
        }
    };
    Ok(match (op, ordering) {
        (OpCode::Eq, o) => o == Some(Ordering::Equal),
        (OpCode::Ne, o) => o != Some(Ordering::Equal),
        // NaN is unordered
        (_, None) => false,
        (OpCode::Gt, Some(o)) => o == Ordering::Greater,
        (OpCode::Ge, Some(o)) => o != Ordering::Less,
        (OpCode::Lt, Some(o)) => o == Ordering::Less,
        (OpCode::Le, Some(o)) => o != Ordering::Greater,
        _ => return Err(VmError::type_error(op.to_string(), "not a comparison operator")),
    })
}

impl ExecutionContext<'_> {
    fn pop_pair(&mut self) -> Result<(Value, Value), VmError> {
        let b = self.stack.pop_value()?;
        let a = self.stack.pop_value()?;
        Ok((a, b))
    }

    pub(super) fn arithmetic(&mut self, op: OpCode) -> Result<(), VmError> {
        let (a, b) = self.pop_pair()?;
        let result = arithmetic(op, &a, &b)?;
        self.stack.push_value(result)
    }

    pub(super) fn negate(&mut self) -> Result<(), VmError> {
        let result = match self.stack.pop_value()? {
            Value::Int(n) => Value::Int(
                n.checked_neg()
                    .ok_or_else(|| VmError::Arithmetic("integer overflow in neg".into()))?,
            ),
            Value::Float(f) => Value::Float(-f),
            other => return Err(VmError::type_error("neg", format!("operand {}", other.kind()))),
        };
        self.stack.push_value(result)
    }

    pub(super) fn compare(&mut self, op: OpCode) -> Result<(), VmError> {
        let (a, b) = self.pop_pair()?;
        let result = compare(op, &a, &b)?;
        self.stack.push_value(Value::Bool(result))
    }

    pub(super) fn logic(&mut self, op: OpCode) -> Result<(), VmError> {
        let (a, b) = self.pop_pair()?;
        let result = match (&a, &b, op) {
            (Value::Bool(x), Value::Bool(y), OpCode::And) => *x && *y,
            (Value::Bool(x), Value::Bool(y), OpCode::Or) => *x || *y,
            _ => {
                return Err(VmError::type_error(
                    op.to_string(),
                    format!("operands {} and {}", a.kind(), b.kind()),
                ))
            }
        };
        self.stack.push_value(Value::Bool(result))
    }

    pub(super) fn not(&mut self) -> Result<(), VmError> {
        match self.stack.pop_value()? {
            Value::Bool(b) => self.stack.push_value(Value::Bool(!b)),
            other => Err(VmError::type_error("not", format!("operand {}", other.kind()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gapl_core::Timestamp;

    #[test]
    fn int_arithmetic_is_checked() {
        assert_eq!(arithmetic(OpCode::Add, &Value::Int(2), &Value::Int(3)).unwrap(), Value::Int(5));
        assert_eq!(arithmetic(OpCode::Mod, &Value::Int(7), &Value::Int(3)).unwrap(), Value::Int(1));
        assert_eq!(arithmetic(OpCode::BitAnd, &Value::Int(6), &Value::Int(3)).unwrap(), Value::Int(2));
        assert!(arithmetic(OpCode::Add, &Value::Int(i64::MAX), &Value::Int(1))
            .unwrap_err()
            .is_arithmetic());
        assert!(arithmetic(OpCode::Div, &Value::Int(i64::MIN), &Value::Int(-1))
            .unwrap_err()
            .is_arithmetic());
    }

    #[test]
    fn division_by_zero() {
        assert!(arithmetic(OpCode::Div, &Value::Int(1), &Value::Int(0)).unwrap_err().is_arithmetic());
        assert!(arithmetic(OpCode::Mod, &Value::Int(1), &Value::Int(0)).unwrap_err().is_arithmetic());
        assert!(arithmetic(OpCode::Div, &Value::Float(1.0), &Value::Float(0.0))
            .unwrap_err()
            .is_arithmetic());
    }

    #[test]
    fn mixed_kinds_are_type_errors() {
        assert!(arithmetic(OpCode::Add, &Value::Int(1), &Value::Float(1.0))
            .unwrap_err()
            .is_type_error());
        assert!(arithmetic(OpCode::Mod, &Value::Float(1.0), &Value::Float(1.0))
            .unwrap_err()
            .is_type_error());
        assert!(compare(OpCode::Lt, &Value::Int(1), &Value::Float(2.0)).unwrap_err().is_type_error());
    }

    #[test]
    fn comparisons() {
        assert!(compare(OpCode::Lt, &Value::String("a".into()), &Value::String("b".into())).unwrap());
        assert!(compare(OpCode::Ge, &Value::Int(3), &Value::Int(3)).unwrap());
        assert!(compare(OpCode::Gt, &Value::Bool(true), &Value::Bool(false)).unwrap());
        let early = Value::Timestamp(Timestamp::from_secs(1));
        let late = Value::Timestamp(Timestamp::from_secs(2));
        assert!(compare(OpCode::Le, &early, &late).unwrap());
        assert!(compare(OpCode::Ne, &Value::Float(f64::NAN), &Value::Float(f64::NAN)).unwrap());
        assert!(!compare(OpCode::Lt, &Value::Float(f64::NAN), &Value::Float(1.0)).unwrap());
    }

    #[test]
    fn structured_values_do_not_compare() {
        let m = Value::new_map(gapl_core::ValueKind::Int);
        assert!(compare(OpCode::Eq, &m, &m).unwrap_err().is_type_error());
    }
}
