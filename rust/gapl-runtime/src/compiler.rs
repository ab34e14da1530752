//! The boundary between GAPL source text and the runtime.
//!
//! The runtime never parses GAPL itself. A [`Compiler`] turns source text
//! into a [`CompiledAutomaton`]: two validated programs, the declared
//! variables and the topic each event variable is bound to.

use gapl_core::{Program, ValueKind};
use gapl_vm::VariableEnvironment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("malformed compiled automaton: {0}")]
    Json(#[from] serde_json::Error),
    #[error("subscription to {topic} is bound to {variable}, which is not an event variable")]
    UnboundSubscription { topic: String, variable: String },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledAutomaton {
    /// Runs once, before any event is delivered.
    pub init: Program,
    /// Runs once per delivered event.
    pub behavior: Program,
    /// Declared variables with their initial values.
    pub variables: VariableEnvironment,
    /// Topic name to the event variable that receives it.
    pub subscriptions: BTreeMap<String, String>,
}

impl CompiledAutomaton {
    pub fn new(init: Program, behavior: Program, variables: VariableEnvironment) -> Self {
        Self {
            init,
            behavior,
            variables,
            subscriptions: BTreeMap::new(),
        }
    }

    /// Bind `topic` to the event variable `variable`.
    pub fn subscribe(mut self, topic: impl Into<String>, variable: impl Into<String>) -> Self {
        self.subscriptions.insert(topic.into(), variable.into());
        self
    }

    /// Every subscription must name a declared event variable.
    pub fn validate(&self) -> Result<(), CompileError> {
        for (topic, variable) in &self.subscriptions {
            if self.variables.kind_of(variable) != Some(ValueKind::Event) {
                return Err(CompileError::UnboundSubscription {
                    topic: topic.clone(),
                    variable: variable.clone(),
                });
            }
        }
        Ok(())
    }
}

pub trait Compiler: Send + Sync {
    fn compile(&self, source: &str) -> Result<CompiledAutomaton, CompileError>;
}

impl<F> Compiler for F
where
    F: Fn(&str) -> Result<CompiledAutomaton, CompileError> + Send + Sync,
{
    fn compile(&self, source: &str) -> Result<CompiledAutomaton, CompileError> {
        self(source)
    }
}

/// Accepts a [`CompiledAutomaton`] serialized as JSON.
///
/// Program structure is checked during deserialization; subscriptions are
/// checked afterwards.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCompiler;

impl Compiler for JsonCompiler {
    fn compile(&self, source: &str) -> Result<CompiledAutomaton, CompileError> {
        let compiled: CompiledAutomaton = serde_json::from_str(source)?;
        compiled.validate()?;
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gapl_core::{ProgramBuilder, Value};

    fn counter() -> CompiledAutomaton {
        let mut vars = VariableEnvironment::new();
        vars.declare("t", ValueKind::Event).declare("n", ValueKind::Int);
        let init = ProgramBuilder::new().finish().unwrap();
        let behavior = ProgramBuilder::new()
            .eval("n")
            .constant(Value::Int(1))
            .op(gapl_core::OpCode::Add)
            .assign("n")
            .finish()
            .unwrap();
        CompiledAutomaton::new(init, behavior, vars).subscribe("Timer", "t")
    }

    #[test]
    fn json_round_trip() {
        let text = serde_json::to_string(&counter()).unwrap();
        let compiled = JsonCompiler.compile(&text).unwrap();
        assert_eq!(compiled.subscriptions.get("Timer").map(String::as_str), Some("t"));
        assert_eq!(compiled.behavior.len(), counter().behavior.len());
        assert_eq!(compiled.variables.kind_of("n"), Some(ValueKind::Int));
    }

    #[test]
    fn subscription_must_name_event_variable() {
        let bad = counter().subscribe("Other", "n");
        assert!(matches!(
            bad.validate(),
            Err(CompileError::UnboundSubscription { ref variable, .. }) if variable == "n"
        ));
        let text = serde_json::to_string(&bad).unwrap();
        assert!(JsonCompiler.compile(&text).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(JsonCompiler.compile("subscribe Timer;"), Err(CompileError::Json(_))));
    }

    #[test]
    fn closures_are_compilers() {
        let compiler = |source: &str| -> Result<CompiledAutomaton, CompileError> {
            if source == "counter" {
                Ok(counter())
            } else {
                Err(CompileError::Syntax(source.to_string()))
            }
        };
        assert!(compiler.compile("counter").is_ok());
        assert!(matches!(compiler.compile("x"), Err(CompileError::Syntax(_))));
    }
}
