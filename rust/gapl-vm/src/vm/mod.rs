//! Stack machine dispatch loop for GAPL bytecode.

mod intrinsics;
mod ops;

pub use intrinsics::{lookup_builtin, Builtin, BuiltinId, BUILTINS, MAX_ARGS};

use crate::env::VariableEnvironment;
use crate::host::{Host, HostError};
use crate::stack::{Operand, OperandStack, DEFAULT_STACK_CAPACITY};
use gapl_core::{InstructionKind, OpCode, Program, Value, ValueError, ValueKind, WindowBound};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum VmError {
    #[error("stack overflow: capacity {0} exceeded")]
    StackOverflow(usize),
    #[error("stack underflow")]
    StackUnderflow,
    #[error("type error in {context}: {message}")]
    TypeError { context: String, message: String },
    #[error("cannot assign {found} to {name}, declared as {expected}")]
    TypeMismatch {
        name: String,
        expected: ValueKind,
        found: ValueKind,
    },
    #[error("incorrect number of arguments for {name}: expected {min}..={max}, got {got}")]
    ArgumentCount {
        name: String,
        min: usize,
        max: usize,
        got: i64,
    },
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),
    #[error("cannot destroy {name} of kind {kind}")]
    IllegalDestroy { name: String, kind: ValueKind },
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
    #[error("memory allocation failure in {0}")]
    Allocation(String),
    #[error("index out of range: {0}")]
    IndexOutOfRange(String),
    #[error("attempt to create an alias in assignment to {0}")]
    Alias(String),
    #[error("unknown builtin: {0}")]
    UnknownBuiltin(String),
    #[error("invalid argument to {name}: {message}")]
    InvalidArgument { name: String, message: String },
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("malformed program: {0}")]
    MalformedProgram(String),
}

impl VmError {
    pub(crate) fn type_error(context: impl Into<String>, message: impl Into<String>) -> Self {
        VmError::TypeError {
            context: context.into(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid(name: impl Into<String>, message: impl Into<String>) -> Self {
        VmError::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Classify a value-level failure raised while running `context`.
    pub(crate) fn from_value(context: &str, err: ValueError) -> Self {
        match err {
            ValueError::IndexOutOfRange { .. } => VmError::IndexOutOfRange(format!("{}: {}", context, err)),
            ValueError::Allocation => VmError::Allocation(context.to_string()),
            ValueError::Exhausted
            | ValueError::Parse { .. }
            | ValueError::InvalidBound(_)
            | ValueError::UnknownCode { .. }
            | ValueError::MissingTimestamp
            | ValueError::Arity { .. } => VmError::invalid(context, err.to_string()),
            ValueError::KindMismatch { .. } | ValueError::NotNumeric(_) | ValueError::NotBasic(_) => {
                VmError::type_error(context, err.to_string())
            }
        }
    }

    pub fn is_stack_overflow(&self) -> bool {
        matches!(self, VmError::StackOverflow(_))
    }

    pub fn is_type_error(&self) -> bool {
        matches!(self, VmError::TypeError { .. })
    }

    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, VmError::TypeMismatch { .. })
    }

    pub fn is_argument_count(&self) -> bool {
        matches!(self, VmError::ArgumentCount { .. })
    }

    pub fn is_undefined_variable(&self) -> bool {
        matches!(self, VmError::UndefinedVariable(_))
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(self, VmError::Arithmetic(_))
    }

    pub fn is_index_out_of_range(&self) -> bool {
        matches!(self, VmError::IndexOutOfRange(_))
    }

    pub fn is_alias(&self) -> bool {
        matches!(self, VmError::Alias(_))
    }

    pub fn is_host(&self) -> bool {
        matches!(self, VmError::Host(_))
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

/// Executes programs against an environment. One per automaton; the operand
/// stack is reused between runs.
#[derive(Debug)]
pub struct Interpreter {
    stack: OperandStack,
    residue: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_stack_capacity(DEFAULT_STACK_CAPACITY)
    }

    pub fn with_stack_capacity(capacity: usize) -> Self {
        Self {
            stack: OperandStack::new(capacity),
            residue: 0,
        }
    }

    pub fn stack_capacity(&self) -> usize {
        self.stack.capacity()
    }

    /// Operands the last successful run left on the stack before it was
    /// cleared. Zero for a balanced program.
    pub fn residue(&self) -> usize {
        self.residue
    }

    /// Run `program` to its final `Stop`. `topic` is what `currentTopic()`
    /// reports. The stack is left empty whether or not the run succeeds.
    pub fn run(
        &mut self,
        program: &Program,
        env: &mut VariableEnvironment,
        host: &mut dyn Host,
        topic: &str,
    ) -> Result<(), VmError> {
        self.stack.clear();
        let mut ctx = ExecutionContext {
            program,
            stack: &mut self.stack,
            env,
            host,
            topic,
        };
        let result = ctx.execute(0);
        if result.is_ok() {
            self.residue = self.stack.len();
            if self.residue > 0 {
                debug!(residue = self.residue, "program left operands on the stack");
            }
        }
        self.stack.clear();
        result
    }
}

pub(crate) struct ExecutionContext<'a> {
    program: &'a Program,
    stack: &'a mut OperandStack,
    env: &'a mut VariableEnvironment,
    host: &'a mut dyn Host,
    topic: &'a str,
}

impl<'a> ExecutionContext<'a> {
    /// Run from `start` until the matching `Stop`.
    fn execute(&mut self, start: usize) -> Result<(), VmError> {
        let program = self.program;
        let mut pc = start;
        loop {
            let op = match program.get(pc).map(|ins| &ins.kind) {
                Some(InstructionKind::Op(op)) => *op,
                _ => return Err(VmError::MalformedProgram(format!("expected an operation at {}", pc))),
            };
            trace!(pc, op = %op, depth = self.stack.len(), "step");
            let base = pc;
            pc += 1;

            match op {
                OpCode::Stop => return Ok(()),
                OpCode::ConstPush => {
                    // the constant pool stays untouched by later mutation
                    let value = self.immediate(base + 1)?.duplicate();
                    self.stack.push_value(value)?;
                    pc += 1;
                }
                OpCode::VarPush => {
                    let value = self.immediate(base + 1)?.clone();
                    self.stack.push_value(value)?;
                    pc += 1;
                }
                OpCode::Eval => self.eval()?,
                OpCode::Extract => self.extract()?,
                OpCode::Assign => self.assign()?,
                OpCode::Destroy => {
                    let name = self.immediate_text(base + 1)?;
                    self.env.destroy(name)?;
                    pc += 1;
                }
                OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Mod
                | OpCode::BitOr
                | OpCode::BitAnd => self.arithmetic(op)?,
                OpCode::Neg => self.negate()?,
                OpCode::Gt | OpCode::Ge | OpCode::Lt | OpCode::Le | OpCode::Eq | OpCode::Ne => self.compare(op)?,
                OpCode::And | OpCode::Or => self.logic(op)?,
                OpCode::Not => self.not()?,
                OpCode::Print => {
                    let value = self.stack.pop_value()?;
                    self.host.print(&value.render());
                }
                OpCode::Function | OpCode::Procedure => {
                    let name = self.immediate_text(base + 1)?;
                    let argc = self.immediate_int(base + 2)?;
                    self.call_builtin(name, argc, op == OpCode::Function)?;
                    pc += 2;
                }
                OpCode::NewMap => {
                    let kind = ValueKind::from_code(self.immediate_int(base + 1)?)
                        .map_err(|e| VmError::from_value("newmap", e))?;
                    self.stack.push_value(Value::new_map(kind))?;
                    pc += 1;
                }
                OpCode::NewWindow => {
                    let kind = ValueKind::from_code(self.immediate_int(base + 1)?)
                        .map_err(|e| VmError::from_value("newwindow", e))?;
                    let bound = WindowBound::from_code(self.immediate_int(base + 2)?, self.immediate_int(base + 3)?)
                        .map_err(|e| VmError::from_value("newwindow", e))?;
                    self.stack.push_value(Value::new_window(kind, bound))?;
                    pc += 3;
                }
                OpCode::If => {
                    let then = self.target(base, base + 1)?;
                    let otherwise = self.optional_target(base, base + 2)?;
                    let next = self.target(base, base + 3)?;
                    self.execute(base + 4)?;
                    if self.pop_condition("if")? {
                        self.execute(then)?;
                    } else if let Some(otherwise) = otherwise {
                        self.execute(otherwise)?;
                    }
                    pc = next;
                }
                OpCode::While => {
                    let body = self.target(base, base + 1)?;
                    let next = self.target(base, base + 2)?;
                    loop {
                        self.execute(base + 3)?;
                        if !self.pop_condition("while")? {
                            break;
                        }
                        self.execute(body)?;
                    }
                    pc = next;
                }
            }
        }
    }

    // -- operand decoding ---------------------------------------------------

    fn immediate(&self, at: usize) -> Result<&'a Value, VmError> {
        let program: &'a Program = self.program;
        match program.get(at).map(|ins| &ins.kind) {
            Some(InstructionKind::Immediate(value)) => Ok(value),
            _ => Err(VmError::MalformedProgram(format!("expected an immediate at {}", at))),
        }
    }

    fn immediate_text(&self, at: usize) -> Result<&'a str, VmError> {
        self.immediate(at)?
            .as_text()
            .ok_or_else(|| VmError::MalformedProgram(format!("expected a name at {}", at)))
    }

    fn immediate_int(&self, at: usize) -> Result<i64, VmError> {
        self.immediate(at)?
            .as_int()
            .ok_or_else(|| VmError::MalformedProgram(format!("expected an integer at {}", at)))
    }

    fn optional_target(&self, base: usize, at: usize) -> Result<Option<usize>, VmError> {
        let offset = match self.program.get(at).map(|ins| &ins.kind) {
            Some(InstructionKind::Offset(offset)) => *offset,
            _ => return Err(VmError::MalformedProgram(format!("expected an offset at {}", at))),
        };
        if offset == 0 {
            return Ok(None);
        }
        let target = base as i64 + offset as i64;
        if target <= base as i64 || target >= self.program.len() as i64 {
            return Err(VmError::MalformedProgram(format!("offset {} at {} out of range", offset, at)));
        }
        Ok(Some(target as usize))
    }

    fn target(&self, base: usize, at: usize) -> Result<usize, VmError> {
        self.optional_target(base, at)?
            .ok_or_else(|| VmError::MalformedProgram(format!("zero offset at {}", at)))
    }

    // -- variables ----------------------------------------------------------

    fn pop_name(&mut self, context: &str) -> Result<String, VmError> {
        match self.stack.pop_value()? {
            Value::Identifier(name) | Value::TypedIdentifier(name) => Ok(name),
            other => Err(VmError::type_error(
                context,
                format!("expected an identifier, found {}", other.kind()),
            )),
        }
    }

    fn pop_condition(&mut self, context: &str) -> Result<bool, VmError> {
        match self.stack.pop_value()? {
            Value::Bool(b) => Ok(b),
            other => Err(VmError::type_error(
                context,
                format!("condition must be bool, found {}", other.kind()),
            )),
        }
    }

    fn eval(&mut self) -> Result<(), VmError> {
        let name = self.pop_name("eval")?;
        let value = self.env.get(&name)?.clone();
        self.stack.push(Operand::alias(value))
    }

    fn extract(&mut self) -> Result<(), VmError> {
        let index = match self.stack.pop_value()? {
            Value::Int(i) => i,
            other => {
                return Err(VmError::type_error(
                    "extract",
                    format!("column index must be int, found {}", other.kind()),
                ))
            }
        };
        let name = self.pop_name("extract")?;
        let event = match self.env.get(&name)? {
            Value::Event(event) => Arc::clone(event),
            other => {
                return Err(VmError::type_error(
                    "extract",
                    format!("{} holds {}, not an event", name, other.kind()),
                ))
            }
        };
        let value = usize::try_from(index)
            .ok()
            .and_then(|i| event.column(i))
            .cloned()
            .ok_or_else(|| {
                VmError::IndexOutOfRange(format!(
                    "column {} of {}-column event on {}",
                    index,
                    event.len(),
                    event.topic()
                ))
            })?;
        self.stack.push_value(value)
    }

    fn assign(&mut self) -> Result<(), VmError> {
        let name = self.pop_name("assign")?;
        let operand = self.stack.pop()?;
        if operand.is_alias() && operand.value.kind().is_shared() {
            return Err(VmError::Alias(name));
        }
        self.env.assign(&name, operand.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::CaptureHost;
    use gapl_core::{Event, ProgramBuilder};

    fn run(program: &Program, env: &mut VariableEnvironment) -> Result<CaptureHost, VmError> {
        let mut host = CaptureHost::new();
        Interpreter::new().run(program, env, &mut host, "Test")?;
        Ok(host)
    }

    #[test]
    fn assign_and_print() {
        let mut env = VariableEnvironment::new();
        env.declare("x", ValueKind::Int);
        let program = ProgramBuilder::new()
            .constant(Value::Int(41))
            .constant(Value::Int(1))
            .op(OpCode::Add)
            .assign("x")
            .eval("x")
            .print()
            .finish()
            .unwrap();
        let host = run(&program, &mut env).unwrap();
        assert_eq!(env.get("x").unwrap(), &Value::Int(42));
        assert_eq!(host.output, vec!["42"]);
    }

    #[test]
    fn if_else_picks_branch() {
        let mut env = VariableEnvironment::new();
        env.declare("x", ValueKind::Int);
        let program = ProgramBuilder::new()
            .emit_if_else(
                |b| {
                    b.constant(Value::Int(1)).constant(Value::Int(2)).op(OpCode::Gt);
                },
                |b| {
                    b.constant(Value::Int(10)).assign("x");
                },
                |b| {
                    b.constant(Value::Int(20)).assign("x");
                },
            )
            .finish()
            .unwrap();
        run(&program, &mut env).unwrap();
        assert_eq!(env.get("x").unwrap(), &Value::Int(20));
    }

    #[test]
    fn while_loop_counts() {
        let mut env = VariableEnvironment::new();
        env.declare("i", ValueKind::Int).declare("sum", ValueKind::Int);
        let program = ProgramBuilder::new()
            .emit_while(
                |b| {
                    b.eval("i").constant(Value::Int(5)).op(OpCode::Lt);
                },
                |b| {
                    b.eval("sum").eval("i").op(OpCode::Add).assign("sum");
                    b.eval("i").constant(Value::Int(1)).op(OpCode::Add).assign("i");
                },
            )
            .finish()
            .unwrap();
        run(&program, &mut env).unwrap();
        assert_eq!(env.get("sum").unwrap(), &Value::Int(10));
        assert_eq!(env.get("i").unwrap(), &Value::Int(5));
    }

    #[test]
    fn non_bool_condition_is_type_error() {
        let mut env = VariableEnvironment::new();
        let program = ProgramBuilder::new()
            .emit_if(
                |b| {
                    b.constant(Value::Int(1));
                },
                |b| {
                    b.print();
                },
            )
            .finish()
            .unwrap();
        assert!(run(&program, &mut env).unwrap_err().is_type_error());
    }

    #[test]
    fn assigning_structured_alias_is_rejected() {
        let mut env = VariableEnvironment::new();
        env.define("a", Value::new_map(ValueKind::Int));
        env.declare("b", ValueKind::Map);
        let program = ProgramBuilder::new().eval("a").assign("b").finish().unwrap();
        assert!(run(&program, &mut env).unwrap_err().is_alias());
    }

    #[test]
    fn new_map_can_be_assigned() {
        let mut env = VariableEnvironment::new();
        env.declare("m", ValueKind::Map);
        let program = ProgramBuilder::new()
            .new_map(ValueKind::Int)
            .assign("m")
            .finish()
            .unwrap();
        run(&program, &mut env).unwrap();
        assert!(matches!(env.get("m").unwrap(), Value::Map(_)));
    }

    #[test]
    fn kind_mismatch_on_assign() {
        let mut env = VariableEnvironment::new();
        env.declare("x", ValueKind::Int);
        let program = ProgramBuilder::new()
            .constant(Value::String("no".into()))
            .assign("x")
            .finish()
            .unwrap();
        assert!(run(&program, &mut env).unwrap_err().is_type_mismatch());
    }

    #[test]
    fn extract_reads_event_columns() {
        let mut env = VariableEnvironment::new();
        env.declare("e", ValueKind::Event).declare("x", ValueKind::Int);
        env.bind_event("e", Arc::new(Event::new("T", vec![Value::Int(7), Value::Int(9)])))
            .unwrap();
        let program = ProgramBuilder::new().extract("e", 1).assign("x").finish().unwrap();
        run(&program, &mut env).unwrap();
        assert_eq!(env.get("x").unwrap(), &Value::Int(9));

        let program = ProgramBuilder::new().extract("e", 2).assign("x").finish().unwrap();
        assert!(run(&program, &mut env).unwrap_err().is_index_out_of_range());
    }

    #[test]
    fn eval_of_unknown_variable() {
        let mut env = VariableEnvironment::new();
        let program = ProgramBuilder::new().eval("ghost").print().finish().unwrap();
        assert!(run(&program, &mut env).unwrap_err().is_undefined_variable());
    }

    #[test]
    fn destroy_resets_structured_variable() {
        let mut env = VariableEnvironment::new();
        env.define("w", Value::new_window(ValueKind::Int, WindowBound::Rows(2)));
        let program = ProgramBuilder::new().destroy("w").finish().unwrap();
        run(&program, &mut env).unwrap();
        assert_eq!(env.get("w").unwrap(), &Value::Null(ValueKind::Window));
    }

    #[test]
    fn stack_overflow_is_reported() {
        let mut env = VariableEnvironment::new();
        let mut b = ProgramBuilder::new();
        for i in 0..4 {
            b.constant(Value::Int(i));
        }
        let program = b.finish().unwrap();
        let mut host = CaptureHost::new();
        let err = Interpreter::with_stack_capacity(3)
            .run(&program, &mut env, &mut host, "")
            .unwrap_err();
        assert!(err.is_stack_overflow());
    }

    #[test]
    fn stack_is_cleared_between_runs() {
        let mut env = VariableEnvironment::new();
        let program = ProgramBuilder::new().constant(Value::Int(1)).finish().unwrap();
        let mut host = CaptureHost::new();
        let mut interp = Interpreter::with_stack_capacity(1);
        interp.run(&program, &mut env, &mut host, "").unwrap();
        interp.run(&program, &mut env, &mut host, "").unwrap();
    }

    #[test]
    fn balanced_programs_leave_no_residue() {
        let mut env = VariableEnvironment::new();
        env.declare("i", ValueKind::Int).declare("m", ValueKind::Map);
        let program = ProgramBuilder::new()
            .new_map(ValueKind::Int)
            .assign("m")
            .emit_while(
                |b| {
                    b.eval("i").constant(Value::Int(3)).op(OpCode::Lt);
                },
                |b| {
                    b.eval("m")
                        .eval("i")
                        .call_function("String", 1)
                        .eval("i")
                        .call_procedure("insert", 3);
                    b.eval("i").constant(Value::Int(1)).op(OpCode::Add).assign("i");
                },
            )
            .eval("m")
            .constant(Value::String("2".into()))
            .call_function("hasEntry", 2)
            .print()
            .finish()
            .unwrap();
        let mut host = CaptureHost::new();
        let mut interp = Interpreter::new();
        interp.run(&program, &mut env, &mut host, "").unwrap();
        assert_eq!(host.output, vec!["true"]);
        assert_eq!(interp.residue(), 0);

        let leaky = ProgramBuilder::new().constant(Value::Int(1)).finish().unwrap();
        interp.run(&leaky, &mut env, &mut host, "").unwrap();
        assert_eq!(interp.residue(), 1);
    }

    #[test]
    fn constants_are_copied_on_push() {
        let program = ProgramBuilder::new()
            .constant(Value::new_sequence(gapl_core::SequenceValue::new()))
            .assign("s")
            .eval("s")
            .constant(Value::Int(7))
            .call_procedure("append", 2)
            .eval("s")
            .call_function("seqSize", 1)
            .print()
            .finish()
            .unwrap();
        let mut interp = Interpreter::new();
        let mut host = CaptureHost::new();
        for _ in 0..3 {
            let mut env = VariableEnvironment::new();
            env.declare("s", ValueKind::Sequence);
            interp.run(&program, &mut env, &mut host, "").unwrap();
        }
        assert_eq!(host.output, vec!["1", "1", "1"]);
    }
}
