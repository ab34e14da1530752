//! Builtin procedure and function dispatch.
//!
//! Builtins are looked up by name in [`BUILTINS`]. Arguments are popped in
//! reverse so that `args[0]` is the first argument written in the source.
//! Procedures leave nothing on the stack; functions push exactly one value.

use super::{ExecutionContext, VmError};
use crate::stack::Operand;
use gapl_core::{
    IteratorValue, PackedTuple, SequenceValue, TimeField, Timestamp, Value, ValueKind, WindowBound,
};
use std::net::Ipv4Addr;
use tracing::trace;

/// Largest argument count any builtin accepts, and the column limit of
/// `publish`.
pub const MAX_ARGS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinId {
    Insert,
    Remove,
    Append,
    Send,
    Publish,
    Float,
    Identifier,
    String,
    Lookup,
    HasEntry,
    Average,
    StdDev,
    CurrentTopic,
    Iterator,
    HasNext,
    Next,
    Sequence,
    SeqElement,
    SeqSize,
    TstampNow,
    TstampDelta,
    TstampDiff,
    Timestamp,
    Field(TimeField),
    Ip4Addr,
    Ip4Mask,
    MatchNetwork,
}

#[derive(Debug, Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub min: usize,
    pub max: usize,
    pub id: BuiltinId,
    pub returns_value: bool,
}

const fn procedure(name: &'static str, min: usize, max: usize, id: BuiltinId) -> Builtin {
    Builtin {
        name,
        min,
        max,
        id,
        returns_value: false,
    }
}

const fn function(name: &'static str, min: usize, max: usize, id: BuiltinId) -> Builtin {
    Builtin {
        name,
        min,
        max,
        id,
        returns_value: true,
    }
}

pub static BUILTINS: &[Builtin] = &[
    procedure("insert", 3, 3, BuiltinId::Insert),
    procedure("remove", 2, 2, BuiltinId::Remove),
    procedure("append", 2, MAX_ARGS, BuiltinId::Append),
    procedure("send", 1, MAX_ARGS, BuiltinId::Send),
    procedure("publish", 2, MAX_ARGS, BuiltinId::Publish),
    function("float", 1, 1, BuiltinId::Float),
    function("Identifier", 1, MAX_ARGS, BuiltinId::Identifier),
    function("String", 1, MAX_ARGS, BuiltinId::String),
    function("lookup", 2, 2, BuiltinId::Lookup),
    function("hasEntry", 2, 2, BuiltinId::HasEntry),
    function("average", 1, 1, BuiltinId::Average),
    function("stdDev", 1, 1, BuiltinId::StdDev),
    function("currentTopic", 0, 0, BuiltinId::CurrentTopic),
    function("Iterator", 1, 1, BuiltinId::Iterator),
    function("hasNext", 1, 1, BuiltinId::HasNext),
    function("next", 1, 1, BuiltinId::Next),
    function("Sequence", 0, MAX_ARGS, BuiltinId::Sequence),
    function("seqElement", 2, 2, BuiltinId::SeqElement),
    function("seqSize", 1, 1, BuiltinId::SeqSize),
    function("tstampNow", 0, 0, BuiltinId::TstampNow),
    function("tstampDelta", 3, 3, BuiltinId::TstampDelta),
    function("tstampDiff", 2, 2, BuiltinId::TstampDiff),
    function("Timestamp", 1, 1, BuiltinId::Timestamp),
    function("secondInMinute", 1, 1, BuiltinId::Field(TimeField::SecondInMinute)),
    function("minuteInHour", 1, 1, BuiltinId::Field(TimeField::MinuteInHour)),
    function("hourInDay", 1, 1, BuiltinId::Field(TimeField::HourInDay)),
    function("dayInMonth", 1, 1, BuiltinId::Field(TimeField::DayInMonth)),
    function("monthInYear", 1, 1, BuiltinId::Field(TimeField::MonthInYear)),
    function("yearIn", 1, 1, BuiltinId::Field(TimeField::Year)),
    function("dayInWeek", 1, 1, BuiltinId::Field(TimeField::DayInWeek)),
    function("IP4Addr", 1, 1, BuiltinId::Ip4Addr),
    function("IP4Mask", 1, 1, BuiltinId::Ip4Mask),
    function("matchNetwork", 3, 3, BuiltinId::MatchNetwork),
];

pub fn lookup_builtin(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn wrong_kind(name: &str, index: usize, expected: &str, found: &Value) -> VmError {
    let found = if found.is_null() {
        format!("uncreated {}", found.kind())
    } else {
        found.kind().to_string()
    };
    VmError::type_error(
        name,
        format!("argument {} must be {}, found {}", index + 1, expected, found),
    )
}

fn int_arg(name: &str, args: &[Value], index: usize) -> Result<i64, VmError> {
    args[index]
        .as_int()
        .ok_or_else(|| wrong_kind(name, index, "int", &args[index]))
}

fn bool_arg(name: &str, args: &[Value], index: usize) -> Result<bool, VmError> {
    args[index]
        .as_bool()
        .ok_or_else(|| wrong_kind(name, index, "bool", &args[index]))
}

fn timestamp_arg(name: &str, args: &[Value], index: usize) -> Result<Timestamp, VmError> {
    args[index]
        .as_timestamp()
        .ok_or_else(|| wrong_kind(name, index, "tstamp", &args[index]))
}

fn string_arg<'v>(name: &str, args: &'v [Value], index: usize) -> Result<&'v str, VmError> {
    match &args[index] {
        Value::String(s) => Ok(s),
        other => Err(wrong_kind(name, index, "string", other)),
    }
}

/// Map and table keys may be written as identifiers or strings.
fn key_arg<'v>(name: &str, args: &'v [Value], index: usize) -> Result<&'v str, VmError> {
    args[index]
        .as_text()
        .ok_or_else(|| wrong_kind(name, index, "identifier", &args[index]))
}

fn parse_ip4(name: &str, text: &str) -> Result<i64, VmError> {
    text.trim()
        .parse::<Ipv4Addr>()
        .map(|addr| u32::from(addr) as i64)
        .map_err(|_| VmError::invalid(name, format!("invalid IP address {}", text)))
}

fn ip4_mask(bits: i64) -> Result<i64, VmError> {
    if !(0..=32).contains(&bits) {
        return Err(VmError::invalid("IP4Mask", format!("mask length {} out of range", bits)));
    }
    Ok(((u64::from(u32::MAX) << (32 - bits)) & u64::from(u32::MAX)) as i64)
}

/// Pack values into tuple columns, expanding sequences (and events, when
/// `expand_events` is set).
fn pack_into(
    name: &str,
    tuple: &mut PackedTuple,
    values: &[Value],
    expand_events: bool,
    limit: Option<usize>,
) -> Result<(), VmError> {
    let push = |tuple: &mut PackedTuple, value: &Value| -> Result<(), VmError> {
        if limit.is_some_and(|limit| tuple.len() >= limit) {
            return Err(VmError::invalid(name, "too many columns"));
        }
        tuple.push(value).map_err(|e| VmError::from_value(name, e))
    };
    for value in values {
        match value {
            Value::Sequence(seq) => {
                for v in seq.lock().values() {
                    push(tuple, v)?;
                }
            }
            Value::Event(event) if expand_events => {
                for v in event.values() {
                    push(tuple, v)?;
                }
            }
            other => push(tuple, other)?,
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

impl ExecutionContext<'_> {
    pub(super) fn call_builtin(&mut self, name: &str, argc: i64, as_function: bool) -> Result<(), VmError> {
        let builtin = lookup_builtin(name).ok_or_else(|| VmError::UnknownBuiltin(name.to_string()))?;
        let count = usize::try_from(argc)
            .ok()
            .filter(|n| (builtin.min..=builtin.max).contains(n))
            .ok_or_else(|| VmError::ArgumentCount {
                name: name.to_string(),
                min: builtin.min,
                max: builtin.max,
                got: argc,
            })?;
        if as_function && !builtin.returns_value {
            return Err(VmError::type_error(name, "procedure used as a function"));
        }

        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(self.stack.pop()?);
        }
        args.reverse();
        let args: Vec<Value> = args.into_iter().map(|o: Operand| o.value).collect();

        trace!(
            automaton = self.host.automaton_id(),
            builtin = name,
            argc = count,
            "call builtin"
        );

        let result = self.dispatch(builtin, &args)?;
        match result {
            Some(value) if as_function => self.stack.push_value(value),
            _ => Ok(()),
        }
    }

    fn dispatch(&mut self, builtin: &Builtin, args: &[Value]) -> Result<Option<Value>, VmError> {
        let name = builtin.name;
        let value = match builtin.id {
            BuiltinId::Insert => {
                self.insert(name, args)?;
                return Ok(None);
            }
            BuiltinId::Remove => {
                let key = key_arg(name, args, 1)?;
                match &args[0] {
                    Value::Map(map) => {
                        map.lock().remove(key);
                    }
                    other => return Err(wrong_kind(name, 0, "map", other)),
                }
                return Ok(None);
            }
            BuiltinId::Append => {
                self.append(name, args)?;
                return Ok(None);
            }
            BuiltinId::Send => {
                let mut tuple = PackedTuple::new();
                if !matches!(args[0], Value::Timestamp(_) | Value::Event(_)) {
                    pack_into(name, &mut tuple, &[Value::Timestamp(Timestamp::now())], false, None)?;
                }
                pack_into(name, &mut tuple, args, true, None)?;
                self.host.send(tuple)?;
                return Ok(None);
            }
            BuiltinId::Publish => {
                let topic = string_arg(name, args, 0)?;
                let mut tuple = PackedTuple::new();
                pack_into(name, &mut tuple, &args[1..], false, Some(MAX_ARGS))?;
                self.host.publish(topic, tuple)?;
                return Ok(None);
            }
            BuiltinId::Float => Value::Float(int_arg(name, args, 0)? as f64),
            BuiltinId::Identifier => Value::Identifier(
                args.iter()
                    .map(Value::concat_text)
                    .collect::<Vec<_>>()
                    .join("|"),
            ),
            BuiltinId::String => Value::String(args.iter().map(Value::concat_text).collect()),
            BuiltinId::Lookup => self.lookup(name, args)?,
            BuiltinId::HasEntry => {
                let key = key_arg(name, args, 1)?;
                let found = match &args[0] {
                    Value::Map(map) => map.lock().contains(key),
                    Value::Table(table) => self.host.tables().has_entry(table, key)?,
                    other => return Err(wrong_kind(name, 0, "map or table", other)),
                };
                Value::Bool(found)
            }
            BuiltinId::Average | BuiltinId::StdDev => match &args[0] {
                Value::Window(window) => {
                    let window = window.lock();
                    let stat = if builtin.id == BuiltinId::Average {
                        window.average()
                    } else {
                        window.std_dev()
                    };
                    Value::Float(stat.map_err(|e| VmError::from_value(name, e))?)
                }
                other => return Err(wrong_kind(name, 0, "window", other)),
            },
            BuiltinId::CurrentTopic => Value::String(self.topic.to_string()),
            BuiltinId::Iterator => {
                let it = match &args[0] {
                    Value::Map(map) => IteratorValue::over_map(&map.lock()),
                    Value::Window(window) => IteratorValue::over_window(&window.lock()),
                    Value::Table(table) => IteratorValue::over_keys(self.host.tables().keys(table)?),
                    other => return Err(wrong_kind(name, 0, "map, table or window", other)),
                };
                Value::new_iterator(it)
            }
            BuiltinId::HasNext => match &args[0] {
                Value::Iterator(it) => Value::Bool(it.lock().has_next()),
                other => return Err(wrong_kind(name, 0, "iterator", other)),
            },
            BuiltinId::Next => match &args[0] {
                Value::Iterator(it) => it.lock().next_item().map_err(|e| VmError::from_value(name, e))?,
                other => return Err(wrong_kind(name, 0, "iterator", other)),
            },
            BuiltinId::Sequence => {
                let seq = SequenceValue::from_values(args.iter().map(Value::duplicate))
                    .map_err(|e| VmError::from_value(name, e))?;
                Value::new_sequence(seq)
            }
            BuiltinId::SeqElement => {
                let index = int_arg(name, args, 1)?;
                match &args[0] {
                    Value::Sequence(seq) => seq.lock().element(index).map_err(|e| VmError::from_value(name, e))?,
                    other => return Err(wrong_kind(name, 0, "sequence", other)),
                }
            }
            BuiltinId::SeqSize => match &args[0] {
                Value::Sequence(seq) => Value::Int(seq.lock().len() as i64),
                other => return Err(wrong_kind(name, 0, "sequence", other)),
            },
            BuiltinId::TstampNow => Value::Timestamp(Timestamp::now()),
            BuiltinId::TstampDelta => {
                let ts = timestamp_arg(name, args, 0)?;
                let units = int_arg(name, args, 1)?;
                let millis = bool_arg(name, args, 2)?;
                Value::Timestamp(ts.shift(units, millis))
            }
            BuiltinId::TstampDiff => {
                let a = timestamp_arg(name, args, 0)?;
                let b = timestamp_arg(name, args, 1)?;
                Value::Int(a.diff(b))
            }
            BuiltinId::Timestamp => {
                let text = string_arg(name, args, 0)?;
                Value::Timestamp(Timestamp::parse_date(text).map_err(|e| VmError::from_value(name, e))?)
            }
            BuiltinId::Field(field) => Value::Int(timestamp_arg(name, args, 0)?.field(field)),
            BuiltinId::Ip4Addr => Value::Int(parse_ip4(name, string_arg(name, args, 0)?)?),
            BuiltinId::Ip4Mask => Value::Int(ip4_mask(int_arg(name, args, 0)?)?),
            BuiltinId::MatchNetwork => {
                let addr = parse_ip4(name, string_arg(name, args, 0)?)?;
                let mask = int_arg(name, args, 1)?;
                let subnet = int_arg(name, args, 2)?;
                Value::Bool(addr & mask == subnet)
            }
        };
        Ok(Some(value))
    }

    fn insert(&mut self, name: &str, args: &[Value]) -> Result<(), VmError> {
        let key = key_arg(name, args, 1)?;
        match &args[0] {
            Value::Map(map) => {
                map.lock()
                    .insert(key, args[2].clone())
                    .map_err(|e| VmError::from_value(name, e))?;
            }
            Value::Table(table) => {
                let row = match &args[2] {
                    Value::Sequence(seq) => seq.lock().values().to_vec(),
                    other => return Err(wrong_kind(name, 2, "sequence", other)),
                };
                self.host.tables().update(table, key, row)?;
            }
            other => return Err(wrong_kind(name, 0, "map or table", other)),
        }
        Ok(())
    }

    fn lookup(&mut self, name: &str, args: &[Value]) -> Result<Value, VmError> {
        let key = key_arg(name, args, 1)?;
        let missing = || VmError::invalid(name, format!("{} not mapped to a value", key));
        match &args[0] {
            Value::Map(map) => map.lock().get(key).cloned().ok_or_else(missing),
            Value::Table(table) => {
                let row = self.host.tables().lookup(table, key)?.ok_or_else(missing)?;
                let seq = SequenceValue::from_values(row).map_err(|e| VmError::from_value(name, e))?;
                Ok(Value::new_sequence(seq))
            }
            other => Err(wrong_kind(name, 0, "map or table", other)),
        }
    }

    fn append(&mut self, name: &str, args: &[Value]) -> Result<(), VmError> {
        match &args[0] {
            Value::Window(window) => {
                let mut window = window.lock();
                let timestamp = match window.bound() {
                    WindowBound::Rows(_) if args.len() != 2 => {
                        return Err(VmError::invalid(name, "row limited windows require 2 arguments"))
                    }
                    WindowBound::Seconds(_) if args.len() != 3 => {
                        return Err(VmError::invalid(name, "time limited windows require 3 arguments"))
                    }
                    WindowBound::Rows(_) => None,
                    WindowBound::Seconds(_) => Some(timestamp_arg(name, args, 2)?),
                };
                window
                    .append(args[1].duplicate(), timestamp)
                    .map_err(|e| VmError::from_value(name, e))?;
            }
            Value::Sequence(seq) => {
                seq.lock()
                    .append(args[1..].iter().map(Value::duplicate))
                    .map_err(|e| VmError::from_value(name, e))?;
            }
            other => return Err(wrong_kind(name, 0, "window or sequence", other)),
        }
        Ok(())
    }
}
