//! Tagged value representation for the GAPL virtual machine.
//!
//! Scalars are stored inline. Maps, windows, iterators and sequences live
//! behind a [`Shared`] handle: cloning a [`Value`] clones the handle, while
//! [`Value::duplicate`] produces an independent deep copy.

use crate::event::Event;
use crate::timestamp::Timestamp;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use strum::{Display, EnumString};
use thiserror::Error;

/// Number of slots a sequence grows by when it runs out of room.
pub const SEQUENCE_GROWTH: usize = 10;

/// Window bound code for a row-limited window.
pub const WINDOW_ROWS: i64 = 21;
/// Window bound code for a time-limited window.
pub const WINDOW_SECONDS: i64 = 22;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("expected {expected} but found {found}")]
    KindMismatch { expected: ValueKind, found: ValueKind },
    #[error("{0} is not a numeric kind")]
    NotNumeric(ValueKind),
    #[error("{0} is not a basic kind")]
    NotBasic(ValueKind),
    #[error("index {index} out of range for sequence of {len} elements")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("iterator is exhausted")]
    Exhausted,
    #[error("unknown {what} code {code}")]
    UnknownCode { what: &'static str, code: i64 },
    #[error("invalid window size {0}")]
    InvalidBound(i64),
    #[error("time-limited window requires a timestamp")]
    MissingTimestamp,
    #[error("cannot parse {text:?} as {what}")]
    Parse { what: &'static str, text: String },
    #[error("expected {expected} columns, found {found}")]
    Arity { expected: usize, found: usize },
    #[error("memory allocation failure")]
    Allocation,
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// The kind tag of a [`Value`]. Display names are the ones the automaton
/// language uses in declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum ValueKind {
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "int")]
    Int,
    #[strum(serialize = "real")]
    Float,
    #[strum(serialize = "tstamp")]
    Timestamp,
    #[strum(serialize = "string")]
    String,
    #[strum(serialize = "tuple")]
    Event,
    #[strum(serialize = "map")]
    Map,
    #[strum(serialize = "identifier")]
    Identifier,
    #[strum(serialize = "typed identifier")]
    TypedIdentifier,
    #[strum(serialize = "window")]
    Window,
    #[strum(serialize = "iterator")]
    Iterator,
    #[strum(serialize = "sequence")]
    Sequence,
    #[strum(serialize = "table")]
    Table,
}

impl ValueKind {
    pub fn code(self) -> i64 {
        match self {
            ValueKind::Bool => 1,
            ValueKind::Int => 2,
            ValueKind::Float => 3,
            ValueKind::Timestamp => 4,
            ValueKind::String => 5,
            ValueKind::Event => 6,
            ValueKind::Map => 7,
            ValueKind::Identifier => 8,
            ValueKind::TypedIdentifier => 9,
            ValueKind::Window => 10,
            ValueKind::Iterator => 11,
            ValueKind::Sequence => 12,
            ValueKind::Table => 13,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, ValueError> {
        Ok(match code {
            1 => ValueKind::Bool,
            2 => ValueKind::Int,
            3 => ValueKind::Float,
            4 => ValueKind::Timestamp,
            5 => ValueKind::String,
            6 => ValueKind::Event,
            7 => ValueKind::Map,
            8 => ValueKind::Identifier,
            9 => ValueKind::TypedIdentifier,
            10 => ValueKind::Window,
            11 => ValueKind::Iterator,
            12 => ValueKind::Sequence,
            13 => ValueKind::Table,
            _ => return Err(ValueError::UnknownCode { what: "kind", code }),
        })
    }

    /// Kinds that can be packed into a tuple column.
    pub fn is_basic(self) -> bool {
        matches!(
            self,
            ValueKind::Bool | ValueKind::Int | ValueKind::Float | ValueKind::String | ValueKind::Timestamp
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ValueKind::Int | ValueKind::Float)
    }

    /// Kinds whose payload lives behind a shared handle.
    pub fn is_shared(self) -> bool {
        matches!(
            self,
            ValueKind::Map | ValueKind::Window | ValueKind::Iterator | ValueKind::Sequence
        )
    }

    /// Kinds that `destroy` may reset.
    pub fn is_structured(self) -> bool {
        self.is_shared() || matches!(self, ValueKind::Identifier | ValueKind::Table)
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Reference-counted, lock-protected payload of a heap-backed value.
pub struct Shared<T>(Arc<Mutex<T>>);

impl<T> Shared<T> {
    pub fn new(inner: T) -> Self {
        Self(Arc::new(Mutex::new(inner)))
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone> Shared<T> {
    pub fn deep_clone(&self) -> Self {
        Self::new(self.lock().clone())
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_lock() {
            Some(inner) => f.debug_tuple("Shared").field(&*inner).finish(),
            None => f.write_str("Shared(<locked>)"),
        }
    }
}

impl<T: Serialize> Serialize for Shared<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.lock().serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Shared<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Shared::new)
    }
}

// ---------------------------------------------------------------------------
// Map
// ---------------------------------------------------------------------------

/// String-keyed map whose values all have the same kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapValue {
    element: ValueKind,
    entries: BTreeMap<String, Value>,
}

impl MapValue {
    pub fn new(element: ValueKind) -> Self {
        Self {
            element,
            entries: BTreeMap::new(),
        }
    }

    pub fn element(&self) -> ValueKind {
        self.element
    }

    /// Insert or replace `key`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Result<Option<Value>, ValueError> {
        if value.kind() != self.element {
            return Err(ValueError::KindMismatch {
                expected: self.element,
                found: value.kind(),
            });
        }
        Ok(self.entries.insert(key.into(), value))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn duplicate(&self) -> Self {
        Self {
            element: self.element,
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.duplicate()))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowBound {
    Rows(u32),
    Seconds(u32),
}

impl WindowBound {
    pub fn from_code(code: i64, size: i64) -> Result<Self, ValueError> {
        let size = u32::try_from(size).map_err(|_| ValueError::InvalidBound(size))?;
        match code {
            WINDOW_ROWS => Ok(WindowBound::Rows(size)),
            WINDOW_SECONDS => Ok(WindowBound::Seconds(size)),
            _ => Err(ValueError::UnknownCode { what: "window", code }),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            WindowBound::Rows(_) => WINDOW_ROWS,
            WindowBound::Seconds(_) => WINDOW_SECONDS,
        }
    }

    pub fn size(self) -> u32 {
        match self {
            WindowBound::Rows(n) | WindowBound::Seconds(n) => n,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowEntry {
    timestamp: Option<Timestamp>,
    value: Value,
}

/// Bounded queue of recent values, evicted by row count or by age.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowValue {
    element: ValueKind,
    bound: WindowBound,
    entries: VecDeque<WindowEntry>,
}

impl WindowValue {
    pub fn new(element: ValueKind, bound: WindowBound) -> Self {
        Self {
            element,
            bound,
            entries: VecDeque::new(),
        }
    }

    pub fn element(&self) -> ValueKind {
        self.element
    }

    pub fn bound(&self) -> WindowBound {
        self.bound
    }

    /// Append `value` and evict expired entries. Returns how many entries
    /// were evicted.
    ///
    /// Row windows keep the newest `n` entries. Time windows drop every entry
    /// stamped at or before `timestamp - n` seconds, scanning from the front.
    pub fn append(&mut self, value: Value, timestamp: Option<Timestamp>) -> Result<usize, ValueError> {
        if value.kind() != self.element {
            return Err(ValueError::KindMismatch {
                expected: self.element,
                found: value.kind(),
            });
        }
        let mut evicted = 0;
        match self.bound {
            WindowBound::Rows(n) => {
                self.entries.push_back(WindowEntry { timestamp, value });
                while self.entries.len() > n as usize {
                    self.entries.pop_front();
                    evicted += 1;
                }
            }
            WindowBound::Seconds(n) => {
                let ts = timestamp.ok_or(ValueError::MissingTimestamp)?;
                self.entries.push_back(WindowEntry {
                    timestamp: Some(ts),
                    value,
                });
                let cutoff = ts.shift(-(n as i64), false);
                while self
                    .entries
                    .front()
                    .is_some_and(|e| e.timestamp.is_some_and(|t| t <= cutoff))
                {
                    self.entries.pop_front();
                    evicted += 1;
                }
            }
        }
        Ok(evicted)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|e| &e.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn numbers(&self) -> Result<Vec<f64>, ValueError> {
        if !self.element.is_numeric() {
            return Err(ValueError::NotNumeric(self.element));
        }
        Ok(self
            .values()
            .filter_map(|v| match v {
                Value::Int(n) => Some(*n as f64),
                Value::Float(f) => Some(*f),
                _ => None,
            })
            .collect())
    }

    /// Mean of the entries, 0.0 when empty.
    pub fn average(&self) -> Result<f64, ValueError> {
        let xs = self.numbers()?;
        if xs.is_empty() {
            return Ok(0.0);
        }
        Ok(xs.iter().sum::<f64>() / xs.len() as f64)
    }

    /// Sample standard deviation, 0.0 with fewer than two entries.
    pub fn std_dev(&self) -> Result<f64, ValueError> {
        let xs = self.numbers()?;
        if xs.len() < 2 {
            return Ok(0.0);
        }
        let n = xs.len() as f64;
        let sum: f64 = xs.iter().sum();
        let sum_sq: f64 = xs.iter().map(|x| x * x).sum();
        let var = (sum_sq - sum * sum / n) / (n - 1.0);
        Ok(var.max(0.0).sqrt())
    }

    fn duplicate(&self) -> Self {
        Self {
            element: self.element,
            bound: self.bound,
            entries: self
                .entries
                .iter()
                .map(|e| WindowEntry {
                    timestamp: e.timestamp,
                    value: e.value.duplicate(),
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sequence
// ---------------------------------------------------------------------------

/// Growable array of basic values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceValue {
    entries: Vec<Value>,
}

impl Default for SequenceValue {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceValue {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(SEQUENCE_GROWTH),
        }
    }

    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Result<Self, ValueError> {
        let mut seq = Self::new();
        seq.append(values)?;
        Ok(seq)
    }

    /// Append basic values, growing in steps of [`SEQUENCE_GROWTH`] slots.
    pub fn append(&mut self, values: impl IntoIterator<Item = Value>) -> Result<(), ValueError> {
        for value in values {
            if !value.kind().is_basic() {
                return Err(ValueError::NotBasic(value.kind()));
            }
            if self.entries.len() == self.entries.capacity() {
                self.entries
                    .try_reserve_exact(SEQUENCE_GROWTH)
                    .map_err(|_| ValueError::Allocation)?;
            }
            self.entries.push(value);
        }
        Ok(())
    }

    pub fn element(&self, index: i64) -> Result<Value, ValueError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.entries.get(i))
            .cloned()
            .ok_or(ValueError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })
    }

    pub fn values(&self) -> &[Value] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Iterator
// ---------------------------------------------------------------------------

/// Single-pass cursor over a snapshot taken at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IteratorValue {
    items: Vec<Value>,
    next: usize,
}

impl IteratorValue {
    /// Keys of a map, yielded as identifiers.
    pub fn over_map(map: &MapValue) -> Self {
        Self {
            items: map.keys().map(|k| Value::Identifier(k.to_string())).collect(),
            next: 0,
        }
    }

    /// Values currently held by a window, oldest first.
    pub fn over_window(window: &WindowValue) -> Self {
        Self {
            items: window.values().map(Value::duplicate).collect(),
            next: 0,
        }
    }

    /// Keys of a table, yielded as identifiers.
    pub fn over_keys(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            items: keys.into_iter().map(Value::Identifier).collect(),
            next: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn has_next(&self) -> bool {
        self.next < self.items.len()
    }

    pub fn next_item(&mut self) -> Result<Value, ValueError> {
        let item = self.items.get(self.next).cloned().ok_or(ValueError::Exhausted)?;
        self.next += 1;
        Ok(item)
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// Runtime values in the GAPL VM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(Timestamp),
    String(String),
    Identifier(String),
    TypedIdentifier(String),
    Event(Arc<Event>),
    Map(Shared<MapValue>),
    Window(Shared<WindowValue>),
    Iterator(Shared<IteratorValue>),
    Sequence(Shared<SequenceValue>),
    /// Handle naming a table in the host's table store.
    Table(String),
    /// Structured variable that has not been created or was destroyed.
    Null(ValueKind),
}

impl Value {
    /// Initial value of a freshly declared variable of `kind`.
    pub fn default_for(kind: ValueKind) -> Value {
        match kind {
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Int => Value::Int(0),
            ValueKind::Float => Value::Float(0.0),
            ValueKind::Timestamp => Value::Timestamp(Timestamp::default()),
            ValueKind::String => Value::String(String::new()),
            other => Value::Null(other),
        }
    }

    pub fn new_map(element: ValueKind) -> Value {
        Value::Map(Shared::new(MapValue::new(element)))
    }

    pub fn new_window(element: ValueKind, bound: WindowBound) -> Value {
        Value::Window(Shared::new(WindowValue::new(element, bound)))
    }

    pub fn new_sequence(seq: SequenceValue) -> Value {
        Value::Sequence(Shared::new(seq))
    }

    pub fn new_iterator(it: IteratorValue) -> Value {
        Value::Iterator(Shared::new(it))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::String(_) => ValueKind::String,
            Value::Identifier(_) => ValueKind::Identifier,
            Value::TypedIdentifier(_) => ValueKind::TypedIdentifier,
            Value::Event(_) => ValueKind::Event,
            Value::Map(_) => ValueKind::Map,
            Value::Window(_) => ValueKind::Window,
            Value::Iterator(_) => ValueKind::Iterator,
            Value::Sequence(_) => ValueKind::Sequence,
            Value::Table(_) => ValueKind::Table,
            Value::Null(kind) => *kind,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Text of strings and identifiers.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Identifier(s) | Value::TypedIdentifier(s) => Some(s),
            _ => None,
        }
    }

    /// Deep copy: heap-backed payloads are cloned into fresh handles.
    pub fn duplicate(&self) -> Value {
        match self {
            Value::Map(m) => Value::Map(Shared::new(m.lock().duplicate())),
            Value::Window(w) => Value::Window(Shared::new(w.lock().duplicate())),
            Value::Iterator(it) => Value::Iterator(it.deep_clone()),
            Value::Sequence(s) => Value::Sequence(s.deep_clone()),
            other => other.clone(),
        }
    }

    /// Text used by `String()` and `Identifier()` when concatenating.
    pub fn concat_text(&self) -> String {
        match self {
            Value::Bool(b) => (if *b { "T" } else { "F" }).to_string(),
            Value::Float(f) => format!("{:.8}", f),
            other => other.render(),
        }
    }

    /// Text written by `print`.
    pub fn render(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format!("{:.8}", f),
            Value::Timestamp(t) => t.to_string(),
            Value::String(s) | Value::Identifier(s) | Value::TypedIdentifier(s) => s.clone(),
            Value::Event(e) => e.to_string(),
            Value::Map(m) => {
                let m = m.lock();
                let body = m
                    .entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.render()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{}}}", body)
            }
            Value::Window(w) => w.lock().values().map(Value::render).collect::<Vec<_>>().join(" "),
            Value::Iterator(it) => {
                let it = it.lock();
                format!("<iterator {}/{}>", it.next, it.size())
            }
            Value::Sequence(s) => s.lock().values().iter().map(Value::render).collect::<Vec<_>>().join("<|>"),
            Value::Table(name) => format!("<table {}>", name),
            Value::Null(kind) => format!("<null {}>", kind),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Identifier(a), Value::Identifier(b)) => a == b,
            (Value::TypedIdentifier(a), Value::TypedIdentifier(b)) => a == b,
            (Value::Event(a), Value::Event(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Map(a), Value::Map(b)) => a.ptr_eq(b),
            (Value::Window(a), Value::Window(b)) => a.ptr_eq(b),
            (Value::Iterator(a), Value::Iterator(b)) => a.ptr_eq(b),
            (Value::Sequence(a), Value::Sequence(b)) => a.ptr_eq(b),
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Null(a), Value::Null(b)) => a == b,
            _ => false,
        }
    }
}
