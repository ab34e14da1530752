//! Bounded operand stack.

use crate::vm::VmError;
use gapl_core::Value;

pub const DEFAULT_STACK_CAPACITY: usize = 256;

/// How an operand came onto the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Produced by a constant, an operator or a builtin.
    Owned,
    /// Read from a variable; shares the variable's payload.
    Alias,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub value: Value,
    pub binding: Binding,
}

impl Operand {
    pub fn owned(value: Value) -> Self {
        Self {
            value,
            binding: Binding::Owned,
        }
    }

    pub fn alias(value: Value) -> Self {
        Self {
            value,
            binding: Binding::Alias,
        }
    }

    pub fn is_alias(&self) -> bool {
        self.binding == Binding::Alias
    }
}

#[derive(Debug)]
pub struct OperandStack {
    items: Vec<Operand>,
    capacity: usize,
}

impl Default for OperandStack {
    fn default() -> Self {
        Self::new(DEFAULT_STACK_CAPACITY)
    }
}

impl OperandStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, operand: Operand) -> Result<(), VmError> {
        if self.items.len() >= self.capacity {
            return Err(VmError::StackOverflow(self.capacity));
        }
        self.items.push(operand);
        Ok(())
    }

    pub fn push_value(&mut self, value: Value) -> Result<(), VmError> {
        self.push(Operand::owned(value))
    }

    pub fn pop(&mut self) -> Result<Operand, VmError> {
        self.items.pop().ok_or(VmError::StackUnderflow)
    }

    pub fn pop_value(&mut self) -> Result<Value, VmError> {
        self.pop().map(|o| o.value)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_at_capacity() {
        let mut stack = OperandStack::new(2);
        stack.push_value(Value::Int(1)).unwrap();
        stack.push_value(Value::Int(2)).unwrap();
        let err = stack.push_value(Value::Int(3)).unwrap_err();
        assert!(err.is_stack_overflow());
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn underflow_when_empty() {
        let mut stack = OperandStack::default();
        assert_eq!(stack.capacity(), DEFAULT_STACK_CAPACITY);
        assert!(matches!(stack.pop(), Err(VmError::StackUnderflow)));
    }

    #[test]
    fn pop_is_lifo_and_keeps_binding() {
        let mut stack = OperandStack::default();
        stack.push(Operand::alias(Value::Int(1))).unwrap();
        stack.push_value(Value::Int(2)).unwrap();
        assert_eq!(stack.pop().unwrap(), Operand::owned(Value::Int(2)));
        let first = stack.pop().unwrap();
        assert!(first.is_alias());
        assert!(stack.is_empty());
    }
}
