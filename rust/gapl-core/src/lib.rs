//! GAPL Core
//!
//! Data shared by the interpreter and the automaton runtime: the tagged value
//! system, timestamps, topic schemas, events, packed tuples and bytecode.

pub mod bytecode;
pub mod event;
pub mod schema;
pub mod timestamp;
pub mod values;

pub use bytecode::{Instruction, InstructionKind, OpCode, Program, ProgramBuilder, ProgramError, MAX_NESTING};
pub use event::{Event, PackedColumn, PackedTuple, PACK_SEPARATOR};
pub use schema::{Column, ColumnType, Schema};
pub use timestamp::{TimeField, Timestamp};
pub use values::{
    IteratorValue, MapValue, SequenceValue, Shared, Value, ValueError, ValueKind, WindowBound, WindowValue,
};
