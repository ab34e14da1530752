//! Per-automaton variable environment.

use crate::vm::VmError;
use gapl_core::{Event, Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identifier to value bindings. A variable's kind is fixed by its
/// declaration; later assignments must keep it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableEnvironment {
    vars: BTreeMap<String, Value>,
}

impl VariableEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `name` with the initial value for `kind`.
    pub fn declare(&mut self, name: impl Into<String>, kind: ValueKind) -> &mut Self {
        self.vars.insert(name.into(), Value::default_for(kind));
        self
    }

    /// Declare `name` with an explicit initial value.
    pub fn define(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.vars.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Result<&Value, VmError> {
        self.vars
            .get(name)
            .ok_or_else(|| VmError::UndefinedVariable(name.to_string()))
    }

    pub fn kind_of(&self, name: &str) -> Option<ValueKind> {
        self.vars.get(name).map(Value::kind)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), VmError> {
        let slot = self
            .vars
            .get_mut(name)
            .ok_or_else(|| VmError::UndefinedVariable(name.to_string()))?;
        if slot.kind() != value.kind() {
            return Err(VmError::TypeMismatch {
                name: name.to_string(),
                expected: slot.kind(),
                found: value.kind(),
            });
        }
        *slot = value;
        Ok(())
    }

    /// Reset a structured variable to its null state.
    pub fn destroy(&mut self, name: &str) -> Result<(), VmError> {
        let slot = self
            .vars
            .get_mut(name)
            .ok_or_else(|| VmError::UndefinedVariable(name.to_string()))?;
        let kind = slot.kind();
        if !kind.is_structured() {
            return Err(VmError::IllegalDestroy {
                name: name.to_string(),
                kind,
            });
        }
        *slot = Value::Null(kind);
        Ok(())
    }

    pub fn bind_event(&mut self, name: &str, event: Arc<Event>) -> Result<(), VmError> {
        self.assign(name, Value::Event(event))
    }

    /// Deep copy used when instantiating an automaton from a template.
    pub fn duplicate(&self) -> Self {
        Self {
            vars: self
                .vars
                .iter()
                .map(|(k, v)| (k.clone(), v.duplicate()))
                .collect(),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }
}
