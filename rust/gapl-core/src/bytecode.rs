//! Bytecode for the GAPL stack machine.
//!
//! A [`Program`] is a flat array of [`Instruction`]s. Operands follow the
//! operation that consumes them: immediates for constants, names and counts,
//! offsets for control flow. Offsets are relative to the `If`/`While` that
//! owns them, and every nested block (condition, branch, loop body) ends in
//! its own `Stop`.
//!
//! ```text
//! If   | then | else | next | <cond> Stop | <then> Stop | [<else> Stop] | ...
//! While| body | next | <cond> Stop | <body> Stop | ...
//! ```

use crate::values::{Value, ValueKind, WindowBound};
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

/// Opcodes for the GAPL stack machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum OpCode {
    Stop = 0,

    // Operand loading
    ConstPush = 1, // Imm: push constant
    VarPush = 2,   // Imm: push identifier
    Eval = 3,      // pop identifier, push its value
    Extract = 4,   // pop index, pop event identifier, push column
    Assign = 5,    // pop identifier, pop value, store

    // Arithmetic
    Add = 6,
    Sub = 7,
    Mul = 8,
    Div = 9,
    Mod = 10,
    Neg = 11,
    BitOr = 12,
    BitAnd = 13,

    // Comparison
    Gt = 14,
    Ge = 15,
    Lt = 16,
    Le = 17,
    Eq = 18,
    Ne = 19,

    // Logic
    And = 20,
    Or = 21,
    Not = 22,

    // Effects and builtins
    Print = 23,
    Function = 24,  // Imm name, Imm argc
    Procedure = 25, // Imm name, Imm argc

    // Structured values
    NewMap = 26,    // Imm kind code
    NewWindow = 27, // Imm kind code, Imm bound code, Imm size
    Destroy = 28,   // Imm identifier

    // Control flow
    If = 29,    // Off then, Off else (0 = none), Off next
    While = 30, // Off body, Off next
}

/// Operand shape expected after an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operand {
    Any,
    Identifier,
    Name,
    Int,
    Offset,
    OptionalOffset,
}

impl OpCode {
    fn operands(self) -> &'static [Operand] {
        use Operand::*;
        match self {
            OpCode::ConstPush => &[Any],
            OpCode::VarPush | OpCode::Destroy => &[Identifier],
            OpCode::Function | OpCode::Procedure => &[Name, Int],
            OpCode::NewMap => &[Int],
            OpCode::NewWindow => &[Int, Int, Int],
            OpCode::If => &[Offset, OptionalOffset, Offset],
            OpCode::While => &[Offset, Offset],
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstructionKind {
    Op(OpCode),
    Immediate(Value),
    Offset(i32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub kind: InstructionKind,
    /// Free-form text kept for listings and traces.
    #[serde(default)]
    pub label: String,
}

impl Instruction {
    pub fn op(op: OpCode) -> Self {
        Self {
            kind: InstructionKind::Op(op),
            label: op.to_string(),
        }
    }

    pub fn immediate(value: Value) -> Self {
        Self {
            kind: InstructionKind::Immediate(value),
            label: String::new(),
        }
    }

    pub fn offset(offset: i32) -> Self {
        Self {
            kind: InstructionKind::Offset(offset),
            label: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgramError {
    #[error("program is empty")]
    Empty,
    #[error("program does not end with stop")]
    MissingStop,
    #[error("{op} at {at} expects {expected} operand")]
    Operand {
        op: OpCode,
        at: usize,
        expected: &'static str,
    },
    #[error("operand at {0} does not follow an operation")]
    StrayOperand(usize),
    #[error("offset {offset} of instruction at {at} leaves the program")]
    OffsetOutOfRange { at: usize, offset: i32 },
    #[error("control flow at {at} nested deeper than {limit}")]
    TooDeep { at: usize, limit: usize },
}

/// Deepest `if`/`while` nesting a program may have. Each level is a native
/// call frame in the interpreter.
pub const MAX_NESTING: usize = 128;

/// Validated, immutable instruction array ending in `Stop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Instruction>", into = "Vec<Instruction>")]
pub struct Program {
    code: Vec<Instruction>,
}

impl Program {
    pub fn new(code: Vec<Instruction>) -> Result<Self, ProgramError> {
        validate(&code)?;
        Ok(Self { code })
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.code
    }

    pub fn get(&self, pc: usize) -> Option<&Instruction> {
        self.code.get(pc)
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// A program that does nothing.
    pub fn empty() -> Self {
        Self {
            code: vec![Instruction::op(OpCode::Stop)],
        }
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::empty()
    }
}

impl TryFrom<Vec<Instruction>> for Program {
    type Error = ProgramError;

    fn try_from(code: Vec<Instruction>) -> Result<Self, Self::Error> {
        Self::new(code)
    }
}

impl From<Program> for Vec<Instruction> {
    fn from(program: Program) -> Self {
        program.code
    }
}

fn validate(code: &[Instruction]) -> Result<(), ProgramError> {
    match code.last() {
        None => return Err(ProgramError::Empty),
        Some(Instruction {
            kind: InstructionKind::Op(OpCode::Stop),
            ..
        }) => {}
        Some(_) => return Err(ProgramError::MissingStop),
    }

    let len = code.len() as i64;
    // ends of the enclosing if/while regions
    let mut open: Vec<usize> = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let op = match &code[pc].kind {
            InstructionKind::Op(op) => *op,
            _ => return Err(ProgramError::StrayOperand(pc)),
        };
        let base = pc;
        for (i, shape) in op.operands().iter().enumerate() {
            let at = base + 1 + i;
            let bad = |expected| ProgramError::Operand { op, at, expected };
            let kind = code.get(at).map(|ins| &ins.kind);
            match (shape, kind) {
                (Operand::Any, Some(InstructionKind::Immediate(_))) => {}
                (Operand::Identifier, Some(InstructionKind::Immediate(v))) => {
                    if !matches!(v, Value::Identifier(_) | Value::TypedIdentifier(_)) {
                        return Err(bad("an identifier"));
                    }
                }
                (Operand::Name, Some(InstructionKind::Immediate(v))) => {
                    if v.as_text().is_none() {
                        return Err(bad("a name"));
                    }
                }
                (Operand::Int, Some(InstructionKind::Immediate(v))) => {
                    if v.as_int().is_none() {
                        return Err(bad("an integer"));
                    }
                }
                (Operand::Offset | Operand::OptionalOffset, Some(InstructionKind::Offset(off))) => {
                    if *off == 0 && *shape == Operand::OptionalOffset {
                        continue;
                    }
                    let target = base as i64 + *off as i64;
                    if *off <= 0 || target >= len {
                        return Err(ProgramError::OffsetOutOfRange { at: base, offset: *off });
                    }
                }
                (Operand::Offset | Operand::OptionalOffset, _) => return Err(bad("an offset")),
                (_, _) => return Err(bad("an immediate")),
            }
        }
        let last = base + op.operands().len();
        if let (OpCode::If | OpCode::While, InstructionKind::Offset(next)) = (op, &code[last].kind) {
            while open.last().is_some_and(|end| *end <= base) {
                open.pop();
            }
            open.push(base + *next as usize);
            if open.len() > MAX_NESTING {
                return Err(ProgramError::TooDeep {
                    at: base,
                    limit: MAX_NESTING,
                });
            }
        }
        pc = last + 1;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Emits well-formed programs, patching control-flow offsets.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    code: Vec<Instruction>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(&mut self, op: OpCode) -> &mut Self {
        self.code.push(Instruction::op(op));
        self
    }

    fn immediate(&mut self, value: Value) -> &mut Self {
        self.code.push(Instruction::immediate(value));
        self
    }

    pub fn constant(&mut self, value: Value) -> &mut Self {
        self.op(OpCode::ConstPush).immediate(value)
    }

    pub fn var(&mut self, name: &str) -> &mut Self {
        self.op(OpCode::VarPush).immediate(Value::Identifier(name.to_string()))
    }

    /// Push the value bound to `name`.
    pub fn eval(&mut self, name: &str) -> &mut Self {
        self.var(name).op(OpCode::Eval)
    }

    /// Store the value on top of the stack into `name`.
    pub fn assign(&mut self, name: &str) -> &mut Self {
        self.var(name).op(OpCode::Assign)
    }

    /// Push column `index` of the event bound to `name`.
    pub fn extract(&mut self, name: &str, index: i64) -> &mut Self {
        self.var(name).constant(Value::Int(index)).op(OpCode::Extract)
    }

    pub fn call_function(&mut self, name: &str, argc: i64) -> &mut Self {
        self.op(OpCode::Function)
            .immediate(Value::String(name.to_string()))
            .immediate(Value::Int(argc))
    }

    pub fn call_procedure(&mut self, name: &str, argc: i64) -> &mut Self {
        self.op(OpCode::Procedure)
            .immediate(Value::String(name.to_string()))
            .immediate(Value::Int(argc))
    }

    pub fn new_map(&mut self, element: ValueKind) -> &mut Self {
        self.op(OpCode::NewMap).immediate(Value::Int(element.code()))
    }

    pub fn new_window(&mut self, element: ValueKind, bound: WindowBound) -> &mut Self {
        self.op(OpCode::NewWindow)
            .immediate(Value::Int(element.code()))
            .immediate(Value::Int(bound.code()))
            .immediate(Value::Int(bound.size() as i64))
    }

    pub fn destroy(&mut self, name: &str) -> &mut Self {
        self.op(OpCode::Destroy).immediate(Value::Identifier(name.to_string()))
    }

    pub fn print(&mut self) -> &mut Self {
        self.op(OpCode::Print)
    }

    fn block(&mut self, emit: impl FnOnce(&mut Self)) -> usize {
        let start = self.code.len();
        emit(self);
        self.op(OpCode::Stop);
        start
    }

    fn patch(&mut self, at: usize, base: usize, target: usize) {
        self.code[at] = Instruction::offset((target - base) as i32);
    }

    pub fn emit_if(&mut self, cond: impl FnOnce(&mut Self), then: impl FnOnce(&mut Self)) -> &mut Self {
        self.emit_conditional(cond, then, None::<fn(&mut Self)>)
    }

    pub fn emit_if_else(
        &mut self,
        cond: impl FnOnce(&mut Self),
        then: impl FnOnce(&mut Self),
        otherwise: impl FnOnce(&mut Self),
    ) -> &mut Self {
        self.emit_conditional(cond, then, Some(otherwise))
    }

    fn emit_conditional<E: FnOnce(&mut Self)>(
        &mut self,
        cond: impl FnOnce(&mut Self),
        then: impl FnOnce(&mut Self),
        otherwise: Option<E>,
    ) -> &mut Self {
        let base = self.code.len();
        self.op(OpCode::If);
        for _ in 0..3 {
            self.code.push(Instruction::offset(0));
        }
        self.block(cond);
        let then_start = self.block(then);
        self.patch(base + 1, base, then_start);
        if let Some(otherwise) = otherwise {
            let else_start = self.block(otherwise);
            self.patch(base + 2, base, else_start);
        }
        let next = self.code.len();
        self.patch(base + 3, base, next);
        self
    }

    pub fn emit_while(&mut self, cond: impl FnOnce(&mut Self), body: impl FnOnce(&mut Self)) -> &mut Self {
        let base = self.code.len();
        self.op(OpCode::While);
        self.code.push(Instruction::offset(0));
        self.code.push(Instruction::offset(0));
        self.block(cond);
        let body_start = self.block(body);
        self.patch(base + 1, base, body_start);
        let next = self.code.len();
        self.patch(base + 2, base, next);
        self
    }

    /// Terminate with `Stop` and validate.
    pub fn finish(&mut self) -> Result<Program, ProgramError> {
        let mut code = std::mem::take(&mut self.code);
        code.push(Instruction::op(OpCode::Stop));
        Program::new(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_patches_if_offsets() {
        let program = ProgramBuilder::new()
            .emit_if_else(
                |b| {
                    b.constant(Value::Bool(true));
                },
                |b| {
                    b.constant(Value::Int(1)).print();
                },
                |b| {
                    b.constant(Value::Int(2)).print();
                },
            )
            .finish()
            .unwrap();
        let code = program.instructions();
        assert_eq!(code[0].kind, InstructionKind::Op(OpCode::If));
        // cond: ConstPush Imm Stop at 4..=6, then starts at 7
        assert_eq!(code[1].kind, InstructionKind::Offset(7));
        // then: ConstPush Imm Print Stop at 7..=10, else starts at 11
        assert_eq!(code[2].kind, InstructionKind::Offset(11));
        assert_eq!(code[3].kind, InstructionKind::Offset(15));
        assert_eq!(code[15].kind, InstructionKind::Op(OpCode::Stop));
    }

    #[test]
    fn if_without_else_has_zero_offset() {
        let program = ProgramBuilder::new()
            .emit_if(
                |b| {
                    b.constant(Value::Bool(false));
                },
                |b| {
                    b.print();
                },
            )
            .finish()
            .unwrap();
        assert_eq!(program.instructions()[2].kind, InstructionKind::Offset(0));
    }

    #[test]
    fn rejects_missing_stop() {
        let code = vec![Instruction::op(OpCode::ConstPush), Instruction::immediate(Value::Int(1))];
        assert_eq!(Program::new(code), Err(ProgramError::MissingStop));
        assert_eq!(Program::new(Vec::new()), Err(ProgramError::Empty));
    }

    #[test]
    fn rejects_offset_out_of_range() {
        let code = vec![
            Instruction::op(OpCode::While),
            Instruction::offset(3),
            Instruction::offset(40),
            Instruction::op(OpCode::Stop),
        ];
        assert!(matches!(
            Program::new(code),
            Err(ProgramError::OffsetOutOfRange { at: 0, offset: 40 })
        ));
    }

    #[test]
    fn rejects_missing_operands() {
        let code = vec![Instruction::op(OpCode::ConstPush), Instruction::op(OpCode::Stop)];
        assert!(matches!(Program::new(code), Err(ProgramError::Operand { .. })));

        let code = vec![
            Instruction::op(OpCode::Function),
            Instruction::immediate(Value::String("tstampNow".into())),
            Instruction::immediate(Value::String("zero".into())),
            Instruction::op(OpCode::Stop),
        ];
        assert!(matches!(
            Program::new(code),
            Err(ProgramError::Operand { expected: "an integer", .. })
        ));
    }

    fn nest(b: &mut ProgramBuilder, depth: usize) {
        if depth == 0 {
            b.constant(Value::Int(1)).print();
            return;
        }
        b.emit_if(
            |b| {
                b.constant(Value::Bool(true));
            },
            |b| nest(b, depth - 1),
        );
    }

    #[test]
    fn nesting_is_bounded() {
        let mut b = ProgramBuilder::new();
        nest(&mut b, MAX_NESTING);
        assert!(b.finish().is_ok());

        let mut b = ProgramBuilder::new();
        nest(&mut b, MAX_NESTING + 1);
        assert!(matches!(b.finish(), Err(ProgramError::TooDeep { limit: MAX_NESTING, .. })));
    }

    #[test]
    fn sibling_blocks_do_not_add_depth() {
        let mut b = ProgramBuilder::new();
        for _ in 0..MAX_NESTING + 10 {
            nest(&mut b, 1);
        }
        assert!(b.finish().is_ok());
    }

    #[test]
    fn rejects_stray_operand() {
        let code = vec![Instruction::immediate(Value::Int(1)), Instruction::op(OpCode::Stop)];
        assert_eq!(Program::new(code), Err(ProgramError::StrayOperand(0)));
    }

    #[test]
    fn serde_validates_on_load() {
        let mut b = ProgramBuilder::new();
        b.eval("x").constant(Value::Int(1)).op(OpCode::Add).assign("x");
        let program = b.finish().unwrap();
        let json = serde_json::to_string(&program).unwrap();
        let back: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(back, program);

        let broken = r#"[{"kind":{"Op":"Add"}}]"#;
        assert!(serde_json::from_str::<Program>(broken).is_err());
    }

    #[test]
    fn opcode_names() {
        assert_eq!(OpCode::NewWindow.to_string(), "newwindow");
        assert_eq!(OpCode::ConstPush as u8, 1);
    }
}
